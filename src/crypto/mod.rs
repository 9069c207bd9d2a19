//! Password protection for evidence containers.
//!
//! Key derivation: Argon2id(password, salt=outer_archive_uuid) → 32-byte key.
//! The inner archive byte stream is sealed in fixed-size chunks, each
//! AES-256-GCM encrypted with a fresh random nonce:
//!
//! Sealed chunk layout: `[ nonce (12 B) | ciphertext | GCM tag (16 B) ]`
//!
//! [`CipherWriter`] emits sealed chunks as the length-framed payload of the
//! single outer member, so the inner archive never has to be buffered whole.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng};
use aes_gcm::Aes256Gcm;
use argon2::{Algorithm, Argon2, Params, Version};
use std::io::{self, Write};
use thiserror::Error;

use crate::frame::{write_chunk, write_chunk_end};

/// Byte length of the AES-GCM nonce prepended to every sealed chunk.
pub const NONCE_LEN: usize = 12;

/// Plaintext bytes sealed per chunk.
pub const SEAL_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed — wrong password or corrupted data")]
    DecryptionFailed,
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("Sealed chunk too short (minimum {NONCE_LEN} bytes)")]
    TooShort,
}

/// Derive a 256-bit key from a password and a salt using Argon2id.
///
/// `salt` is the 16-byte outer archive UUID, giving each container a unique
/// key even when the same password is reused across collections.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; 32], CryptoError> {
    let params = Params::new(64 * 1024, 3, 1, Some(32))
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// Seal one plaintext chunk: `nonce || ciphertext || tag`.
pub fn seal_chunk(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptionFailed)?;
    let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open one sealed chunk produced by [`seal_chunk`].
pub fn open_chunk(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_LEN {
        return Err(CryptoError::TooShort);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptionFailed)?;
    let nonce = aes_gcm::Nonce::from_slice(&data[..NONCE_LEN]);
    cipher
        .decrypt(nonce, &data[NONCE_LEN..])
        .map_err(|_| CryptoError::DecryptionFailed)
}

// ── CipherWriter ─────────────────────────────────────────────────────────────

/// Streams plaintext into length-framed sealed chunks on the underlying
/// writer.  [`CipherWriter::finish`] seals the remainder, terminates the
/// chunk sequence and hands the underlying writer back.
pub struct CipherWriter<W: Write> {
    out: W,
    key: [u8; 32],
    buf: Vec<u8>,
    chunk_size: usize,
}

impl<W: Write> CipherWriter<W> {
    pub fn new(out: W, key: [u8; 32]) -> Self {
        Self::with_chunk_size(out, key, SEAL_CHUNK_SIZE)
    }

    pub fn with_chunk_size(out: W, key: [u8; 32], chunk_size: usize) -> Self {
        Self { out, key, buf: Vec::new(), chunk_size: chunk_size.max(1) }
    }

    fn seal_buffered(&mut self) -> io::Result<()> {
        let sealed = seal_chunk(&self.key, &self.buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        write_chunk(&mut self.out, &sealed)?;
        self.buf.clear();
        Ok(())
    }

    pub fn finish(mut self) -> io::Result<W> {
        if !self.buf.is_empty() {
            self.seal_buffered()?;
        }
        write_chunk_end(&mut self.out)?;
        Ok(self.out)
    }
}

impl<W: Write> Write for CipherWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        while self.buf.len() >= self.chunk_size {
            let rest = self.buf.split_off(self.chunk_size);
            let full = std::mem::replace(&mut self.buf, rest);
            let sealed = seal_chunk(&self.key, &full)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            write_chunk(&mut self.out, &sealed)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Buffered plaintext is held until a full chunk or finish(); flushing
        // mid-chunk would emit undersized sealed chunks.
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::read_chunk;
    use std::io::Cursor;

    fn test_key() -> [u8; 32] {
        derive_key("secret", b"0123456789abcdef").unwrap()
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = test_key();
        let sealed = seal_chunk(&key, b"chunk of inner archive").unwrap();
        assert_eq!(open_chunk(&key, &sealed).unwrap(), b"chunk of inner archive");
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal_chunk(&test_key(), b"data").unwrap();
        let other = derive_key("other", b"0123456789abcdef").unwrap();
        assert!(matches!(open_chunk(&other, &sealed), Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn cipher_writer_chunks_and_terminates() {
        let key = test_key();
        let mut out = Vec::new();
        {
            let mut writer = CipherWriter::with_chunk_size(&mut out, key, 8);
            writer.write_all(b"0123456789abcdefXYZ").unwrap();
            writer.finish().unwrap();
        }

        let mut cur = Cursor::new(&out);
        let mut plain = Vec::new();
        while let Some(sealed) = read_chunk(&mut cur).unwrap() {
            plain.extend(open_chunk(&key, &sealed).unwrap());
        }
        assert_eq!(plain, b"0123456789abcdefXYZ");
    }
}
