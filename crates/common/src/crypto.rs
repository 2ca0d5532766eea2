//! Token crypter for the boot exchange
//!
//! A shared textual token is normalized to a 32-byte key with SHA-256 and
//! used with the extended-nonce XChaCha20-Poly1305 AEAD. The sealed layout
//! is `nonce || ciphertext+tag` with a 24-byte random nonce, so sealing the
//! same plaintext twice never produces the same bytes.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Nonce length of the extended-nonce AEAD
pub const NONCE_LEN: usize = 24;

/// Symmetric cipher derived from a shared boot token
#[derive(Clone)]
pub struct TokenCipher {
    cipher: XChaCha20Poly1305,
}

impl TokenCipher {
    /// Derive a cipher from the shared token
    pub fn new(token: &str) -> Self {
        let key = Sha256::digest(token.as_bytes());
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key.as_slice())),
        }
    }

    /// Seal plaintext under a fresh random nonce
    pub fn seal(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plain)
            .map_err(|_| Error::Crypto("seal failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open a sealed payload. Fails with [`Error::AuthFailure`] when the tag
    /// does not verify under this token.
    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(Error::Crypto("sealed payload too short".to_string()));
        }
        let (nonce, sealed) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), sealed)
            .map_err(|_| Error::AuthFailure)
    }
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}
