//! Write-duplicating plumbing.
//!
//! [`TeeWriter`] forwards every write to N sinks in fixed order, failing the
//! whole write if any destination fails.  [`StreamDigest`] wraps the owning
//! output stream with a byte counter and a running SHA-256.  [`UploadHashes`]
//! accumulates the SHA-256/MD5 pair reported for every collected file.

use md5::Md5;
use sha2::{Digest, Sha256};
use std::io::{self, Write};

// ── TeeWriter ────────────────────────────────────────────────────────────────

pub struct TeeWriter<'a> {
    sinks: Vec<&'a mut dyn Write>,
}

impl<'a> TeeWriter<'a> {
    pub fn new(sinks: Vec<&'a mut dyn Write>) -> Self {
        Self { sinks }
    }
}

impl Write for TeeWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for sink in &mut self.sinks {
            sink.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for sink in &mut self.sinks {
            sink.flush()?;
        }
        Ok(())
    }
}

// ── StreamDigest ─────────────────────────────────────────────────────────────

/// Counting SHA-256 wrapper over the container's physical output stream.
///
/// The digest covers every byte written through it, framing included.
pub struct StreamDigest<W: Write> {
    inner: W,
    hasher: Sha256,
    count: u64,
}

impl<W: Write> StreamDigest<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, hasher: Sha256::new(), count: 0 }
    }

    /// Total bytes written so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Hex SHA-256 of everything written so far.
    pub fn sum_hex(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }
}

impl<W: Write> Write for StreamDigest<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write_all(buf)?;
        self.hasher.update(buf);
        self.count += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ── UploadHashes ─────────────────────────────────────────────────────────────

/// SHA-256 + MD5 accumulator pair, single-writer per member.
#[derive(Default)]
pub struct UploadHashes {
    sha256: Sha256,
    md5: Md5,
}

impl UploadHashes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> (String, String) {
        (hex::encode(self.sha256.finalize()), hex::encode(self.md5.finalize()))
    }
}

impl Write for UploadHashes {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sha256.update(buf);
        self.md5.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tee_duplicates_to_all_sinks() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        {
            let mut tee = TeeWriter::new(vec![&mut a, &mut b]);
            tee.write_all(b"evidence").unwrap();
        }
        assert_eq!(a, b"evidence");
        assert_eq!(b, b"evidence");
    }

    #[test]
    fn upload_hashes_match_known_digests() {
        let mut hashes = UploadHashes::new();
        hashes.write_all(b"hello world").unwrap();
        let (sha256, md5) = hashes.finish();
        assert_eq!(sha256, "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9");
        assert_eq!(md5, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn stream_digest_counts_and_hashes() {
        let mut out = Vec::new();
        let mut digest = StreamDigest::new(&mut out);
        digest.write_all(b"abc").unwrap();
        assert_eq!(digest.count(), 3);
        assert_eq!(
            digest.sum_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
