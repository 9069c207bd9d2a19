//! The evidence container writer.
//!
//! A [`Container`] owns one output stream and hands out independent
//! [`MemberWriter`]s to concurrent producers (artifact evaluators, upload
//! handlers).  The `.evc` format requires each entry's header and payload to
//! be written contiguously, so members buffer and compress in memory and the
//! complete frame is emitted under the container lock when the member is
//! closed.  No ordering guarantee exists between distinct members beyond
//! per-member contiguity.
//!
//! # Lifecycle
//! One container per collection.  Every `create` registers an outstanding
//! writer; every member close signs it off.  [`Container::close`] marks the
//! container closed, blocks until the outstanding count reaches zero, then
//! writes the central index and trailer, finalizes the encrypted outer
//! wrapper if one is configured, and releases the underlying stream exactly
//! once.  Close is idempotent; callers must invoke it on every code path,
//! including error paths, or the outstanding count leaks and close deadlocks.
//!
//! # Encryption
//! With a password configured the publicly written bytes are an outer `.evc`
//! holding exactly one chunk-framed member, [`ENCRYPTED_PAYLOAD_NAME`],
//! whose sealed payload decrypts to a complete inner archive with the same
//! member layout.  The sink variant is chosen once at construction; member
//! writers never know which one is active.
//!
//! # Digest
//! The reported SHA-256 covers the full outer byte stream, framing overhead
//! included, and is only reported when more than the fixed format overhead
//! was written.

pub mod reader;

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use thiserror::Error;

use crate::crypto::{derive_key, CipherWriter, CryptoError};
use crate::frame::{
    crc32, FormatError, FrameHeader, FrameKind, MemberCodec, Superblock, Trailer,
    FRAME_FLAG_CHUNKED, SB_FLAG_ENCRYPTED, SUPERBLOCK_SIZE, TRAILER_SIZE,
};
use crate::index::{ContainerIndex, MemberRecord};
use crate::tee::StreamDigest;

/// Name of the single encrypted member in a password-protected container.
pub const ENCRYPTED_PAYLOAD_NAME: &str = "data.evc";

/// An empty container (superblock + empty index + trailer) comes to just
/// over 100 bytes; the digest is only reported above this.
const DIGEST_THRESHOLD: u64 = 128;

const DEFAULT_LEVEL: i64 = 5;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Container is closed")]
    Closed,
    #[error("Invalid member name {0:?}")]
    InvalidName(String),
    #[error("Duplicate member name {0:?}")]
    DuplicateName(String),
    #[error("Member not found: {0:?}")]
    MemberNotFound(String),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Tabular output error: {0}")]
    Csv(#[from] csv::Error),
}

/// Configuration for a container, scoped to its lifetime.
#[derive(Debug, Clone)]
pub struct ContainerOptions {
    /// Compression level 0–9; 0 stores members verbatim.  Out-of-range
    /// values fall back to the default.
    pub level: i64,
    /// When set, the container body is AES-256-GCM sealed.
    pub password: Option<String>,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self { level: DEFAULT_LEVEL, password: None }
    }
}

/// Result of [`Container::close`].
#[derive(Debug, Clone, Default)]
pub struct CloseSummary {
    pub bytes_written: u64,
    /// Hex SHA-256 of the full outer byte stream; `None` when nothing beyond
    /// format overhead was written.
    pub sha256: Option<String>,
}

// ── Sink ─────────────────────────────────────────────────────────────────────

type BoxedSink = StreamDigest<Box<dyn Write + Send>>;

/// Chosen once at construction; the writer stays agnostic afterwards.
enum Sink {
    Direct(BoxedSink),
    Encrypted {
        cipher: CipherWriter<BoxedSink>,
        /// Outer-stream offset where the sealed payload begins.
        payload_start: u64,
    },
    Released,
}

impl Sink {
    fn writer(&mut self) -> Result<&mut dyn Write, ContainerError> {
        match self {
            Sink::Direct(w) => Ok(w),
            Sink::Encrypted { cipher, .. } => Ok(cipher),
            Sink::Released => Err(ContainerError::Closed),
        }
    }
}

// ── Container ────────────────────────────────────────────────────────────────

struct State {
    sink: Sink,
    index: ContainerIndex,
    names: HashSet<String>,
    /// Logical offset within the (inner) archive stream.
    written: u64,
    outstanding: usize,
    closed: bool,
    summary: Option<CloseSummary>,
}

struct Core {
    state: Mutex<State>,
    cond: Condvar,
    level: i64,
}

#[derive(Clone)]
pub struct Container {
    core: Arc<Core>,
}

impl Container {
    pub fn create_file<P: AsRef<Path>>(
        path: P,
        opts: ContainerOptions,
    ) -> Result<Self, ContainerError> {
        let fd = File::create(path)?;
        Self::from_writer(Box::new(BufWriter::new(fd)), opts)
    }

    pub fn from_writer(
        out: Box<dyn Write + Send>,
        opts: ContainerOptions,
    ) -> Result<Self, ContainerError> {
        let level = if (0..=9).contains(&opts.level) { opts.level } else { DEFAULT_LEVEL };
        let mut digest = StreamDigest::new(out);

        let sink = match &opts.password {
            None => {
                Superblock::new(0).write(&mut digest)?;
                Sink::Direct(digest)
            }
            Some(password) => {
                let outer = Superblock::new(SB_FLAG_ENCRYPTED);
                let key = derive_key(password, outer.uuid.as_bytes())?;
                outer.write(&mut digest)?;

                // The single outer member is opened here and finished at
                // close; its sizes live in the outer index, not the header.
                let header = FrameHeader {
                    kind: FrameKind::Data,
                    flags: FRAME_FLAG_CHUNKED,
                    name: ENCRYPTED_PAYLOAD_NAME.to_string(),
                    mtime: 0,
                    codec: MemberCodec::Store,
                    level: 0,
                    comp_size: 0,
                    orig_size: 0,
                    crc32: 0,
                };
                header.write(&mut digest)?;
                let payload_start = SUPERBLOCK_SIZE as u64 + header.encoded_len();

                let mut cipher = CipherWriter::new(digest, key);
                Superblock::new(0).write(&mut cipher)?;
                Sink::Encrypted { cipher, payload_start }
            }
        };

        Ok(Self {
            core: Arc::new(Core {
                state: Mutex::new(State {
                    sink,
                    index: ContainerIndex::default(),
                    names: HashSet::new(),
                    written: SUPERBLOCK_SIZE as u64,
                    outstanding: 0,
                    closed: false,
                    summary: None,
                }),
                cond: Condvar::new(),
                level,
            }),
        })
    }

    /// Open a new member stream.  Registers one outstanding writer; the
    /// caller must close the returned [`MemberWriter`].
    pub fn create(
        &self,
        name: &str,
        mtime: Option<DateTime<Utc>>,
    ) -> Result<MemberWriter, ContainerError> {
        validate_member_name(name)?;

        let level = self.core.level;
        let (codec, encoder) = if level == 0 {
            (MemberCodec::Store, Encoder::Store(Vec::new()))
        } else {
            let enc = zstd::stream::write::Encoder::new(Vec::new(), level as i32)?;
            (MemberCodec::Zstd, Encoder::Zstd(enc))
        };

        let mut state = self.core.state.lock().unwrap();
        if state.closed {
            return Err(ContainerError::Closed);
        }
        if !state.names.insert(name.to_string()) {
            return Err(ContainerError::DuplicateName(name.to_string()));
        }
        state.outstanding += 1;
        drop(state);

        Ok(MemberWriter {
            core: Arc::clone(&self.core),
            name: name.to_string(),
            mtime: mtime.map(|t| t.timestamp()).unwrap_or(0),
            codec,
            level: level as i8,
            encoder: Some(encoder),
            orig_size: 0,
            closed: false,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.core.state.lock().unwrap().closed
    }

    /// Finalize the container.  Blocks until every outstanding member has
    /// been closed, then writes the central index and trailer and releases
    /// the underlying stream.  Safe to call from multiple code paths; later
    /// calls return the cached summary.
    pub fn close(&self) -> Result<CloseSummary, ContainerError> {
        let mut state = self.core.state.lock().unwrap();
        if let Some(summary) = &state.summary {
            return Ok(summary.clone());
        }
        if state.closed {
            // Another thread is finalizing; wait for its result.
            while state.summary.is_none() {
                state = self.core.cond.wait(state).unwrap();
            }
            return Ok(state.summary.clone().unwrap());
        }
        state.closed = true;

        // The sole synchronization barrier for finalization: every in-flight
        // member must report completion before any structural metadata is
        // written.
        while state.outstanding > 0 {
            state = self.core.cond.wait(state).unwrap();
        }

        match Self::finalize(&mut state) {
            Ok(summary) => {
                state.summary = Some(summary.clone());
                self.core.cond.notify_all();
                Ok(summary)
            }
            Err(err) => {
                // Closed stays set so the stream is never finalized twice;
                // the error is reported to this caller only.
                state.summary = Some(CloseSummary::default());
                self.core.cond.notify_all();
                Err(err)
            }
        }
    }

    fn finalize(state: &mut State) -> Result<CloseSummary, ContainerError> {
        let index_bytes = state.index.to_bytes()?;
        let index_offset = state.written;
        let header = FrameHeader {
            kind: FrameKind::Index,
            flags: 0,
            name: String::new(),
            mtime: 0,
            codec: MemberCodec::Store,
            level: 0,
            comp_size: index_bytes.len() as u64,
            orig_size: index_bytes.len() as u64,
            crc32: crc32(&index_bytes),
        };
        let trailer = Trailer {
            index_offset,
            index_size: index_bytes.len() as u64,
            member_count: state.index.members.len() as u32,
        };
        {
            let w = state.sink.writer()?;
            header.write(&mut *w)?;
            w.write_all(&index_bytes)?;
            trailer.write(&mut *w)?;
        }
        state.written += header.encoded_len() + index_bytes.len() as u64 + TRAILER_SIZE as u64;

        let mut digest = match std::mem::replace(&mut state.sink, Sink::Released) {
            Sink::Direct(digest) => digest,
            Sink::Encrypted { cipher, payload_start } => {
                // Seal the tail of the inner archive, then finish the outer
                // scaffold around it.
                let mut digest = cipher.finish()?;
                let outer_index = ContainerIndex {
                    members: vec![MemberRecord {
                        name: ENCRYPTED_PAYLOAD_NAME.to_string(),
                        offset: SUPERBLOCK_SIZE as u64,
                        comp_size: digest.count() - payload_start,
                        orig_size: state.written,
                        mtime: 0,
                        codec: MemberCodec::Store as u8,
                        crc32: 0,
                        chunked: true,
                    }],
                };
                let outer_bytes = outer_index.to_bytes()?;
                let outer_offset = digest.count();
                let outer_header = FrameHeader {
                    kind: FrameKind::Index,
                    flags: 0,
                    name: String::new(),
                    mtime: 0,
                    codec: MemberCodec::Store,
                    level: 0,
                    comp_size: outer_bytes.len() as u64,
                    orig_size: outer_bytes.len() as u64,
                    crc32: crc32(&outer_bytes),
                };
                outer_header.write(&mut digest)?;
                digest.write_all(&outer_bytes)?;
                Trailer {
                    index_offset: outer_offset,
                    index_size: outer_bytes.len() as u64,
                    member_count: 1,
                }
                .write(&mut digest)?;
                digest
            }
            Sink::Released => return Err(ContainerError::Closed),
        };

        digest.flush()?;
        let bytes_written = digest.count();
        let sha256 = if bytes_written > DIGEST_THRESHOLD {
            let sum = digest.sum_hex();
            tracing::info!(bytes = bytes_written, sha256 = %sum, "container finalized");
            Some(sum)
        } else {
            None
        };
        // Dropping the digest releases the underlying descriptor.
        drop(digest);
        Ok(CloseSummary { bytes_written, sha256 })
    }
}

fn validate_member_name(name: &str) -> Result<(), ContainerError> {
    let malformed = name.is_empty()
        || name.starts_with('/')
        || name.split('/').any(|c| c.is_empty() || c == "." || c == "..");
    if malformed {
        return Err(ContainerError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ── MemberWriter ─────────────────────────────────────────────────────────────

enum Encoder {
    Store(Vec<u8>),
    Zstd(zstd::stream::write::Encoder<'static, Vec<u8>>),
}

/// Writable stream for one archive entry, 1:1 with a member frame.
///
/// Data is buffered (and compressed) in memory; [`MemberWriter::close`]
/// writes the complete frame under the container lock and signs the writer
/// off the outstanding count.  A member that is never closed leaks the count
/// and deadlocks [`Container::close`].
pub struct MemberWriter {
    core: Arc<Core>,
    name: String,
    mtime: i64,
    codec: MemberCodec,
    level: i8,
    encoder: Option<Encoder>,
    orig_size: u64,
    closed: bool,
}

impl MemberWriter {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finalize the entry.  Repeated calls are no-ops.
    pub fn close(&mut self) -> Result<(), ContainerError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let finished: Result<Vec<u8>, ContainerError> = match self.encoder.take() {
            Some(Encoder::Store(buf)) => Ok(buf),
            Some(Encoder::Zstd(enc)) => enc.finish().map_err(ContainerError::from),
            None => Ok(Vec::new()),
        };

        let mut state = self.core.state.lock().unwrap();
        let result = match finished {
            Ok(payload) => {
                let offset = state.written;
                let header = FrameHeader {
                    kind: FrameKind::Data,
                    flags: 0,
                    name: self.name.clone(),
                    mtime: self.mtime,
                    codec: self.codec,
                    level: self.level,
                    comp_size: payload.len() as u64,
                    orig_size: self.orig_size,
                    crc32: crc32(&payload),
                };
                let write_frame = (|| -> Result<(), ContainerError> {
                    let w = state.sink.writer()?;
                    header.write(&mut *w)?;
                    w.write_all(&payload)?;
                    Ok(())
                })();
                match write_frame {
                    Ok(()) => {
                        state.written += header.encoded_len() + payload.len() as u64;
                        state.index.members.push(MemberRecord {
                            name: self.name.clone(),
                            offset,
                            comp_size: payload.len() as u64,
                            orig_size: self.orig_size,
                            mtime: self.mtime,
                            codec: self.codec as u8,
                            crc32: header.crc32,
                            chunked: false,
                        });
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        };

        // Sign off even on error, or Container::close would block forever
        // behind a member that can never complete.
        state.outstanding -= 1;
        self.core.cond.notify_all();
        result
    }
}

impl Write for MemberWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.encoder.as_mut() {
            Some(Encoder::Store(vec)) => vec.extend_from_slice(buf),
            Some(Encoder::Zstd(enc)) => enc.write_all(buf)?,
            None => {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "member is closed"));
            }
        }
        self.orig_size += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
