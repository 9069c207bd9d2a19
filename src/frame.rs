use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;
use uuid::Uuid;

pub const MAGIC: &[u8; 4] = b".evc";
pub const VERSION: u32 = 1;

/// Byte length of the superblock at offset 0.
pub const SUPERBLOCK_SIZE: usize = 4 + 4 + 16 + 8;
/// Byte length of the fixed trailer at EOF.
pub const TRAILER_SIZE: usize = 8 + 8 + 4 + 4;

pub const FRAME_MAGIC: u32 = 0x4556_4346; // "EVCF"
pub const TRAILER_MAGIC: u32 = 0x4556_4354; // "EVCT"

/// Superblock flag: the archive body is a single encrypted member.
pub const SB_FLAG_ENCRYPTED: u64 = 1 << 0;

/// Frame flag: the payload is a `[len u32 | bytes]*` chunk sequence
/// terminated by `len == 0`; `comp_size` and `crc32` in the header are zero.
pub const FRAME_FLAG_CHUNKED: u16 = 1 << 0;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Invalid magic number")]
    InvalidMagic,
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),
    #[error("Member name exceeds {} bytes", u16::MAX)]
    NameTooLong,
    #[error("Unknown codec id: {0}")]
    UnknownCodec(u8),
    #[error("Unknown frame kind: {0}")]
    UnknownKind(u8),
    #[error("Payload checksum mismatch for member {0:?}")]
    ChecksumMismatch(String),
    #[error("Truncated trailer")]
    TruncatedTrailer,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Superblock ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Superblock {
    pub version: u32,
    pub uuid: Uuid,
    pub flags: u64,
}

impl Superblock {
    pub fn new(flags: u64) -> Self {
        Self { version: VERSION, uuid: Uuid::new_v4(), flags }
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_all(self.uuid.as_bytes())?;
        writer.write_u64::<LittleEndian>(self.flags)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, FormatError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(FormatError::InvalidMagic);
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }
        let mut uuid_bytes = [0u8; 16];
        reader.read_exact(&mut uuid_bytes)?;
        let flags = reader.read_u64::<LittleEndian>()?;
        Ok(Self { version, uuid: Uuid::from_bytes(uuid_bytes), flags })
    }
}

// ── Member frames ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Data,
    Index,
}

impl FrameKind {
    pub fn from_u8(v: u8) -> Result<Self, FormatError> {
        match v {
            0 => Ok(FrameKind::Data),
            1 => Ok(FrameKind::Index),
            other => Err(FormatError::UnknownKind(other)),
        }
    }
}

/// Per-member compression method. Store is used at level 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberCodec {
    Store,
    Zstd,
}

impl MemberCodec {
    pub fn from_u8(v: u8) -> Result<Self, FormatError> {
        match v {
            0 => Ok(MemberCodec::Store),
            1 => Ok(MemberCodec::Zstd),
            other => Err(FormatError::UnknownCodec(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MemberCodec::Store => "store",
            MemberCodec::Zstd => "zstd",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub flags: u16,
    pub name: String,
    /// Unix seconds; 0 means "no recorded mtime".
    pub mtime: i64,
    pub codec: MemberCodec,
    pub level: i8,
    pub comp_size: u64,
    pub orig_size: u64,
    pub crc32: u32,
}

impl FrameHeader {
    pub fn is_chunked(&self) -> bool {
        self.flags & FRAME_FLAG_CHUNKED != 0
    }

    /// Encoded size of this header on disk.
    pub fn encoded_len(&self) -> u64 {
        (4 + 1 + 2 + 2 + self.name.len() + 8 + 1 + 1 + 8 + 8 + 4) as u64
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<(), FormatError> {
        if self.name.len() > u16::MAX as usize {
            return Err(FormatError::NameTooLong);
        }
        writer.write_u32::<LittleEndian>(FRAME_MAGIC)?;
        writer.write_u8(self.kind as u8)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        writer.write_u16::<LittleEndian>(self.name.len() as u16)?;
        writer.write_all(self.name.as_bytes())?;
        writer.write_i64::<LittleEndian>(self.mtime)?;
        writer.write_u8(self.codec as u8)?;
        writer.write_i8(self.level)?;
        writer.write_u64::<LittleEndian>(self.comp_size)?;
        writer.write_u64::<LittleEndian>(self.orig_size)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, FormatError> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != FRAME_MAGIC {
            return Err(FormatError::InvalidMagic);
        }
        let kind = FrameKind::from_u8(reader.read_u8()?)?;
        let flags = reader.read_u16::<LittleEndian>()?;
        let name_len = reader.read_u16::<LittleEndian>()? as usize;
        let mut name_bytes = vec![0u8; name_len];
        reader.read_exact(&mut name_bytes)?;
        let name = String::from_utf8_lossy(&name_bytes).into_owned();
        Ok(Self {
            kind,
            flags,
            name,
            mtime: reader.read_i64::<LittleEndian>()?,
            codec: MemberCodec::from_u8(reader.read_u8()?)?,
            level: reader.read_i8()?,
            comp_size: reader.read_u64::<LittleEndian>()?,
            orig_size: reader.read_u64::<LittleEndian>()?,
            crc32: reader.read_u32::<LittleEndian>()?,
        })
    }
}

pub fn crc32(payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

// ── Chunked payloads ─────────────────────────────────────────────────────────

/// Write one length-framed chunk of a CHUNKED payload.
pub fn write_chunk<W: Write>(mut writer: W, chunk: &[u8]) -> io::Result<()> {
    writer.write_u32::<LittleEndian>(chunk.len() as u32)?;
    writer.write_all(chunk)
}

/// Terminate a CHUNKED payload.
pub fn write_chunk_end<W: Write>(mut writer: W) -> io::Result<()> {
    writer.write_u32::<LittleEndian>(0)
}

/// Read the next chunk of a CHUNKED payload; `None` at the terminator.
pub fn read_chunk<R: Read>(mut reader: R) -> io::Result<Option<Vec<u8>>> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    if len == 0 {
        return Ok(None);
    }
    let mut chunk = vec![0u8; len];
    reader.read_exact(&mut chunk)?;
    Ok(Some(chunk))
}

// ── Trailer ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Trailer {
    pub index_offset: u64,
    pub index_size: u64,
    pub member_count: u32,
}

impl Trailer {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.index_offset)?;
        writer.write_u64::<LittleEndian>(self.index_size)?;
        writer.write_u32::<LittleEndian>(self.member_count)?;
        writer.write_u32::<LittleEndian>(TRAILER_MAGIC)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, FormatError> {
        let index_offset = reader.read_u64::<LittleEndian>()?;
        let index_size = reader.read_u64::<LittleEndian>()?;
        let member_count = reader.read_u32::<LittleEndian>()?;
        if reader.read_u32::<LittleEndian>()? != TRAILER_MAGIC {
            return Err(FormatError::TruncatedTrailer);
        }
        Ok(Self { index_offset, index_size, member_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_header_roundtrip() {
        let header = FrameHeader {
            kind: FrameKind::Data,
            flags: 0,
            name: "uploads/c/Windows/notepad.exe".to_string(),
            mtime: 1_700_000_000,
            codec: MemberCodec::Zstd,
            level: 5,
            comp_size: 1234,
            orig_size: 4096,
            crc32: 0xDEADBEEF,
        };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, header.encoded_len());

        let parsed = FrameHeader::read(Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.name, header.name);
        assert_eq!(parsed.codec, MemberCodec::Zstd);
        assert_eq!(parsed.comp_size, 1234);
        assert_eq!(parsed.orig_size, 4096);
        assert_eq!(parsed.crc32, 0xDEADBEEF);
    }

    #[test]
    fn superblock_rejects_bad_magic() {
        let err = Superblock::read(Cursor::new(b"nope_____________________________".to_vec()));
        assert!(matches!(err, Err(FormatError::InvalidMagic)));
    }

    #[test]
    fn chunk_sequence_roundtrip() {
        let mut buf = Vec::new();
        write_chunk(&mut buf, b"first").unwrap();
        write_chunk(&mut buf, b"second chunk").unwrap();
        write_chunk_end(&mut buf).unwrap();

        let mut cur = Cursor::new(&buf);
        assert_eq!(read_chunk(&mut cur).unwrap().unwrap(), b"first");
        assert_eq!(read_chunk(&mut cur).unwrap().unwrap(), b"second chunk");
        assert!(read_chunk(&mut cur).unwrap().is_none());
    }
}
