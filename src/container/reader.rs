//! Reading finished containers back: listing, extraction, verification, and
//! a recovery scan for containers whose collection crashed before close.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use crate::container::{ContainerError, ENCRYPTED_PAYLOAD_NAME};
use crate::crypto::{derive_key, open_chunk};
use crate::frame::{
    crc32, read_chunk, FormatError, FrameHeader, FrameKind, MemberCodec, Superblock, Trailer,
    SB_FLAG_ENCRYPTED, SUPERBLOCK_SIZE, TRAILER_SIZE,
};
use crate::index::{ContainerIndex, MemberRecord};

pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

pub struct ContainerReader {
    src: Box<dyn ReadSeek>,
    pub superblock: Superblock,
    pub index: ContainerIndex,
}

impl ContainerReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ContainerError> {
        Self::from_reader(Box::new(File::open(path)?))
    }

    /// Open a password-protected container and unwrap the inner archive.
    ///
    /// Opening an unencrypted container with a password succeeds and the
    /// password is ignored.
    pub fn open_encrypted<P: AsRef<Path>>(
        path: P,
        password: &str,
    ) -> Result<Self, ContainerError> {
        Self::open(path)?.unseal(password)
    }

    pub fn from_reader(mut src: Box<dyn ReadSeek>) -> Result<Self, ContainerError> {
        src.seek(SeekFrom::Start(0))?;
        let superblock = Superblock::read(&mut src)?;

        let end = src.seek(SeekFrom::End(0))?;
        if end < (SUPERBLOCK_SIZE + TRAILER_SIZE) as u64 {
            return Err(FormatError::TruncatedTrailer.into());
        }
        src.seek(SeekFrom::Start(end - TRAILER_SIZE as u64))?;
        let trailer = Trailer::read(&mut src)?;

        src.seek(SeekFrom::Start(trailer.index_offset))?;
        let header = FrameHeader::read(&mut src)?;
        if header.kind != FrameKind::Index {
            return Err(FormatError::TruncatedTrailer.into());
        }
        let mut payload = vec![0u8; header.comp_size as usize];
        src.read_exact(&mut payload)?;
        if crc32(&payload) != header.crc32 {
            return Err(FormatError::ChecksumMismatch("<index>".to_string()).into());
        }
        let index = ContainerIndex::from_bytes(&payload)?;

        Ok(Self { src, superblock, index })
    }

    pub fn is_encrypted(&self) -> bool {
        self.superblock.flags & SB_FLAG_ENCRYPTED != 0
    }

    pub fn list(&self) -> &[MemberRecord] {
        &self.index.members
    }

    fn unseal(mut self, password: &str) -> Result<Self, ContainerError> {
        if !self.is_encrypted() {
            return Ok(self);
        }
        let key = derive_key(password, self.superblock.uuid.as_bytes())?;

        let record = self
            .index
            .find(ENCRYPTED_PAYLOAD_NAME)
            .cloned()
            .ok_or_else(|| ContainerError::MemberNotFound(ENCRYPTED_PAYLOAD_NAME.to_string()))?;
        self.src.seek(SeekFrom::Start(record.offset))?;
        let header = FrameHeader::read(&mut self.src)?;
        if !header.is_chunked() {
            return Err(FormatError::InvalidMagic.into());
        }

        let mut inner = Vec::with_capacity(record.orig_size as usize);
        while let Some(sealed) = read_chunk(&mut self.src)? {
            inner.extend(open_chunk(&key, &sealed)?);
        }
        Self::from_reader(Box::new(Cursor::new(inner)))
    }

    /// Read one member's decompressed contents, verifying its checksum.
    ///
    /// A chunk-framed member (the sealed payload of an encrypted container
    /// opened without its password) is returned raw; use
    /// [`ContainerReader::open_encrypted`] for transparent decryption.
    pub fn read_member(&mut self, name: &str) -> Result<Vec<u8>, ContainerError> {
        let record = self
            .index
            .find(name)
            .cloned()
            .ok_or_else(|| ContainerError::MemberNotFound(name.to_string()))?;
        self.src.seek(SeekFrom::Start(record.offset))?;
        let header = FrameHeader::read(&mut self.src)?;

        if header.is_chunked() {
            let mut out = Vec::new();
            while let Some(chunk) = read_chunk(&mut self.src)? {
                out.extend(chunk);
            }
            return Ok(out);
        }

        let mut payload = vec![0u8; header.comp_size as usize];
        self.src.read_exact(&mut payload)?;
        if crc32(&payload) != header.crc32 {
            return Err(FormatError::ChecksumMismatch(name.to_string()).into());
        }
        match header.codec {
            MemberCodec::Store => Ok(payload),
            MemberCodec::Zstd => Ok(zstd::decode_all(&payload[..])?),
        }
    }

    /// Recompute the SHA-256 over the complete byte stream this reader sits
    /// on.  For containers opened with [`ContainerReader::open`] this matches
    /// the digest reported at close.
    pub fn verify(&mut self) -> Result<(u64, String), ContainerError> {
        self.src.seek(SeekFrom::Start(0))?;
        let mut hasher = Sha256::new();
        let mut count = 0u64;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = self.src.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            count += n as u64;
        }
        Ok((count, hex::encode(hasher.finalize())))
    }

    /// Reconstruct the member list of a truncated or crashed container by
    /// walking frame headers sequentially from the superblock onward.  Stops
    /// cleanly at the first unreadable frame; the central index and trailer
    /// are not consulted.
    pub fn scan<R: Read + Seek>(mut src: R) -> Result<ContainerIndex, ContainerError> {
        src.seek(SeekFrom::Start(0))?;
        Superblock::read(&mut src)?;

        let mut index = ContainerIndex::default();
        loop {
            let pos = match src.stream_position() {
                Ok(p) => p,
                Err(_) => break,
            };
            let header = match FrameHeader::read(&mut src) {
                Ok(h) => h,
                Err(_) => break, // EOF or torn frame, stop here
            };
            if header.kind == FrameKind::Index {
                break;
            }
            let chunked = header.is_chunked();

            let mut comp_size = header.comp_size;
            if chunked {
                comp_size = 0;
                loop {
                    match read_chunk(&mut src) {
                        Ok(Some(chunk)) => comp_size += 4 + chunk.len() as u64,
                        Ok(None) => {
                            // The terminator word is part of the payload.
                            comp_size += 4;
                            break;
                        }
                        Err(_) => return Ok(index), // torn mid-chunk
                    }
                }
            } else if src.seek(SeekFrom::Current(header.comp_size as i64)).is_err() {
                break;
            }

            index.members.push(MemberRecord {
                name: header.name,
                offset: pos,
                comp_size,
                orig_size: header.orig_size,
                mtime: header.mtime,
                codec: header.codec as u8,
                crc32: header.crc32,
                chunked,
            });
        }
        Ok(index)
    }
}
