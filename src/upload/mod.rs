//! Upload encoding: streaming file collection into container members.
//!
//! Uploads come from two kinds of sources.  A plain byte stream is copied
//! into a single member while SHA-256/MD5 accumulate.  A range-aware source
//! (NTFS extracts, sparse disk images) is copied run by run: sparse runs are
//! recorded in a side index and never written as zero bytes; only data runs
//! reach the member.  When at least one run was sparse, the serialized index
//! is stored as a second member at `name + ".idx"`.
//!
//! A short read inside a data run (decompression trouble in the source, for
//! example) is recoverable: the shortfall is zero-padded to preserve logical
//! alignment, a warning is logged and the copy continues.

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::warn;

use crate::container::{Container, ContainerError};
use crate::sanitize::sanitize_name;
use crate::tee::{TeeWriter, UploadHashes};

/// One run of a range-aware byte source, in source order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
    /// The run is absent from the source and reconstructible as zeros.
    pub is_sparse: bool,
}

/// A byte source that can report its runs.
pub trait RangeReader: Read + Seek {
    fn ranges(&self) -> Vec<ByteRange>;
}

/// Capability of the upload source, chosen by the caller.
pub enum UploadSource<'a> {
    /// No range information; falls back to a plain streaming copy.
    Stream(&'a mut dyn Read),
    Ranged(&'a mut dyn RangeReader),
}

// ── Sparse index ─────────────────────────────────────────────────────────────

/// One entry of the `.idx` sidecar.  `file_length` is 0 for sparse runs.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IndexRange {
    pub file_offset: u64,
    pub original_offset: u64,
    pub file_length: u64,
    pub length: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SparseIndex {
    pub ranges: Vec<IndexRange>,
}

// ── UploadResponse ───────────────────────────────────────────────────────────

/// Result reported for every collected file.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct UploadResponse {
    pub path: String,
    pub size: u64,
    pub sha256: String,
    pub md5: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResponse {
    /// Wire-format rendition of a failed upload.
    pub fn from_error(path: &str, err: &ContainerError) -> Self {
        Self { path: path.to_string(), error: Some(err.to_string()), ..Default::default() }
    }
}

impl Container {
    /// Collect one file into the container under a sanitized member name.
    ///
    /// Uploads always run to completion; cancellation of the surrounding
    /// collection does not interrupt an in-flight upload.
    pub fn upload(
        &self,
        store_as_name: &str,
        mtime: Option<chrono::DateTime<chrono::Utc>>,
        source: UploadSource<'_>,
    ) -> Result<UploadResponse, ContainerError> {
        let sanitized = sanitize_name(store_as_name);
        match source {
            UploadSource::Stream(reader) => self.upload_stream(&sanitized, mtime, reader),
            UploadSource::Ranged(reader) => {
                self.upload_ranges(store_as_name, &sanitized, mtime, reader)
            }
        }
    }

    fn upload_stream(
        &self,
        sanitized: &str,
        mtime: Option<chrono::DateTime<chrono::Utc>>,
        reader: &mut dyn Read,
    ) -> Result<UploadResponse, ContainerError> {
        let mut member = self.create(sanitized, mtime)?;
        let mut hashes = UploadHashes::new();

        let copied = {
            let mut tee = TeeWriter::new(vec![&mut member, &mut hashes]);
            io::copy(reader, &mut tee)
        };
        let close_result = member.close();
        let size = copied?;
        close_result?;

        let (sha256, md5) = hashes.finish();
        Ok(UploadResponse { path: sanitized.to_string(), size, sha256, md5, error: None })
    }

    fn upload_ranges(
        &self,
        store_as_name: &str,
        sanitized: &str,
        mtime: Option<chrono::DateTime<chrono::Utc>>,
        reader: &mut dyn RangeReader,
    ) -> Result<UploadResponse, ContainerError> {
        let ranges = reader.ranges();

        let mut member = self.create(sanitized, mtime)?;
        let mut hashes = UploadHashes::new();

        // Bytes physically written to the member so far; the next data run's
        // file_offset.
        let mut count = 0u64;
        let mut index = SparseIndex::default();
        let mut is_sparse = false;

        let copy_result = (|| -> Result<(), ContainerError> {
            for range in &ranges {
                index.ranges.push(IndexRange {
                    file_offset: count,
                    original_offset: range.offset,
                    file_length: if range.is_sparse { 0 } else { range.length },
                    length: range.length,
                });

                if range.is_sparse {
                    // Gaps exist only in the index, never as written zeros.
                    is_sparse = true;
                    continue;
                }

                reader.seek(SeekFrom::Start(range.offset))?;
                let mut tee = TeeWriter::new(vec![&mut member, &mut hashes]);
                let n = copy_n(&mut tee, reader, range.length)?;
                if n < range.length {
                    // Could not fully read this run; keep alignment by
                    // padding with zeros and carry on.
                    let shortfall = range.length - n;
                    warn!(
                        name = store_as_name,
                        offset = range.offset,
                        padding = shortfall,
                        "unable to fully copy range, padding"
                    );
                    copy_n(&mut tee, &mut io::repeat(0), shortfall)?;
                }
                count += range.length;
            }
            Ok(())
        })();

        let close_result = member.close();
        copy_result?;
        close_result?;

        // Only sparse sources get an index sidecar.
        if is_sparse {
            let mut idx_member = self.create(&format!("{sanitized}.idx"), None)?;
            let write_result = (|| -> Result<(), ContainerError> {
                let serialized = serde_json::to_vec(&index)?;
                idx_member.write_all(&serialized)?;
                Ok(())
            })();
            let close_result = idx_member.close();
            write_result?;
            close_result?;
        }

        let (sha256, md5) = hashes.finish();
        Ok(UploadResponse { path: sanitized.to_string(), size: count, sha256, md5, error: None })
    }
}

/// Copy up to `limit` bytes, returning the number actually copied.
fn copy_n<W, R>(writer: &mut W, reader: &mut R, limit: u64) -> io::Result<u64>
where
    W: Write + ?Sized,
    R: Read + ?Sized,
{
    let mut taken = (&mut *reader).take(limit);
    io::copy(&mut taken, writer)
}
