//! Group key and frame sealing for peers registered as encrypted.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length of the primary and local master keys.
pub const MASTER_KEY_LEN: usize = 16;

const NONCE_LEN: usize = 12;

/// Bytes a sealed body adds on top of its plaintext (nonce + tag).
pub const SEAL_OVERHEAD: usize = NONCE_LEN + 16;

/// Key shared by every station in the group.
#[derive(Clone)]
pub struct GroupKey([u8; 32]);

impl GroupKey {
    /// Derive the group key from the primary master key and the local master key.
    pub fn derive(pmk: &[u8], lmk: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"linkshake-group-v1");
        hasher.update(pmk);
        hasher.update(lmk);
        GroupKey(hasher.finalize().into())
    }

    /// ChaCha20-Poly1305 with a random nonce; output is nonce || ciphertext.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0).map_err(|_| CryptoError::Key)?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Seal)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < SEAL_OVERHEAD {
            return Err(CryptoError::Open);
        }
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0).map_err(|_| CryptoError::Key)?;
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Open)
    }
}

impl std::fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GroupKey(..)")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key")]
    Key,
    #[error("sealing failed")]
    Seal,
    #[error("opening failed")]
    Open,
}
