//! Credential encryption at rest.
//!
//! Portal passwords are stored AES-256-encrypted with a machine-specific key
//! derived from hostname + username, base64-armored. Decryption happens only
//! inside the login call, and the plaintext lives no longer than that call.

use aes::Aes256;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use campusclock_core::error::{ClockError, Result};
use sha2::{Digest, Sha256};

/// Seals and opens stored credentials.
#[derive(Debug, Clone)]
pub struct Vault {
    encrypt: bool,
    key: [u8; 32],
}

impl Vault {
    pub fn new(encrypt: bool) -> Self {
        Self {
            encrypt,
            key: derive_machine_key(),
        }
    }

    /// Encrypt a plaintext password for storage. Pass-through when
    /// encryption is disabled in config.
    pub fn seal(&self, plaintext: &str) -> String {
        if !self.encrypt {
            return plaintext.to_string();
        }
        BASE64.encode(encrypt_aes256(plaintext.as_bytes(), &self.key))
    }

    /// Decrypt a stored password. Pass-through when encryption is disabled.
    pub fn open(&self, stored: &str) -> Result<String> {
        if !self.encrypt {
            return Ok(stored.to_string());
        }
        let encrypted = BASE64
            .decode(stored.trim())
            .map_err(|e| ClockError::Crypto(format!("Base64 decode failed: {e}")))?;
        let decrypted = decrypt_aes256(&encrypted, &self.key);
        String::from_utf8(decrypted)
            .map_err(|e| ClockError::Crypto(format!("Decryption produced invalid UTF-8: {e}")))
    }
}

/// Derive a machine-specific AES-256 key from hostname + username.
fn derive_machine_key() -> [u8; 32] {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "campusclock".into());
    let username = whoami::username();
    let salt = format!("campusclock::{username}@{hostname}::credentials");

    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    let result = hasher.finalize();

    let mut key = [0u8; 32];
    key.copy_from_slice(&result);
    key
}

/// AES-256-ECB encrypt with PKCS7 padding.
fn encrypt_aes256(data: &[u8], key: &[u8; 32]) -> Vec<u8> {
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let block_size = 16;

    // PKCS7 padding
    let padding_len = block_size - (data.len() % block_size);
    let mut padded = data.to_vec();
    padded.extend(std::iter::repeat_n(padding_len as u8, padding_len));

    let mut encrypted = Vec::with_capacity(padded.len());
    for chunk in padded.chunks(block_size) {
        let mut block = GenericArray::clone_from_slice(chunk);
        cipher.encrypt_block(&mut block);
        encrypted.extend_from_slice(&block);
    }

    encrypted
}

/// AES-256-ECB decrypt with PKCS7 unpadding.
fn decrypt_aes256(data: &[u8], key: &[u8; 32]) -> Vec<u8> {
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let block_size = 16;

    let mut decrypted = Vec::with_capacity(data.len());
    for chunk in data.chunks(block_size) {
        if chunk.len() == block_size {
            let mut block = GenericArray::clone_from_slice(chunk);
            cipher.decrypt_block(&mut block);
            decrypted.extend_from_slice(&block);
        }
    }

    // Remove PKCS7 padding
    if let Some(&pad_len) = decrypted.last() {
        let pad_len = pad_len as usize;
        if pad_len <= block_size && pad_len <= decrypted.len() {
            let valid = decrypted[decrypted.len() - pad_len..]
                .iter()
                .all(|&b| b == pad_len as u8);
            if valid {
                decrypted.truncate(decrypted.len() - pad_len);
            }
        }
    }

    decrypted
}
