// src/crypto.rs
use crate::config::{KEY_SIZE, NONCE_SIZE, SEAL_OVERHEAD};
use crate::error::{FsError, Result};
use crate::storage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce
};
use log::{debug, info};
use rand::{thread_rng, RngCore};
use std::path::Path;
use zeroize::Zeroizing;

pub type SessionKey = Zeroizing<[u8; KEY_SIZE]>;

/// Generates a fresh random session key.
pub fn generate_key() -> SessionKey {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    thread_rng().fill_bytes(&mut key[..]);
    key
}

/// Stores `key` base64-encoded on a single line.
pub fn write_key_file(path: &Path, key: &[u8; KEY_SIZE]) -> Result<()> {
    let encoded = Zeroizing::new(format!("{}\n", STANDARD.encode(key)));
    storage::write_file_atomic(path, encoded.as_bytes())?;
    info!("Key written to {:?}", path);
    Ok(())
}

pub fn read_key_file(path: &Path) -> Result<SessionKey> {
    let contents = Zeroizing::new(std::fs::read_to_string(path)?);
    let line = contents.lines().next().unwrap_or("").trim();
    let decoded = Zeroizing::new(
        STANDARD
            .decode(line)
            .map_err(|e| FsError::InvalidKey(e.to_string()))?,
    );
    if decoded.len() != KEY_SIZE {
        return Err(FsError::InvalidKey(format!(
            "expected {} key bytes, found {}",
            KEY_SIZE,
            decoded.len()
        )));
    }
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&decoded);
    debug!("Key loaded from {:?}", path);
    Ok(key)
}

/// Authenticated cipher sealing every persisted inode record and block.
///
/// A sealed unit is `nonce ∥ ciphertext ∥ tag`, with a fresh random nonce per
/// call.
pub struct SealCipher {
    cipher: ChaCha20Poly1305,
}

impl SealCipher {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        let key = Key::from_slice(key);
        Self { cipher: ChaCha20Poly1305::new(key) }
    }

    /// Size of a sealed unit holding `plaintext_len` bytes.
    pub fn sealed_len(plaintext_len: usize) -> usize {
        plaintext_len + SEAL_OVERHEAD
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self.cipher.encrypt(nonce, Payload { msg: plaintext, aad: &[] })
            .map_err(|_| FsError::Io(std::io::Error::other("encryption failed")))?;

        let mut packet = Vec::with_capacity(Self::sealed_len(plaintext.len()));
        packet.extend_from_slice(&nonce_bytes);
        packet.extend_from_slice(&ciphertext);
        Ok(packet)
    }

    /// Opens a sealed unit. `None` means the tag did not authenticate.
    pub fn open(&self, packet: &[u8]) -> Option<Vec<u8>> {
        if packet.len() < SEAL_OVERHEAD {
            return None;
        }
        let nonce = Nonce::from_slice(&packet[0..NONCE_SIZE]);
        let ciphertext = &packet[NONCE_SIZE..];
        self.cipher.decrypt(nonce, Payload { msg: ciphertext, aad: &[] }).ok()
    }
}
