// Key sealing
// AES-256-GCM for provider API keys, keyed per machine and user

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_SIZE: usize = 12;
const KEY_CONTEXT: &[u8] = b"zotero-assistant/provider-keys/v1";

/// Sealed value as stored in the database, both fields base64
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncryptedData {
    pub nonce: String,
    pub ciphertext: String,
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Failed to seal value: {0}")]
    Seal(String),
    #[error("Failed to open sealed value: {0}")]
    Open(String),
    #[error("Malformed sealed value: {0}")]
    Malformed(String),
}

/// Cipher bound to one derived key
#[derive(Clone)]
pub struct KeySealer {
    cipher: Aes256Gcm,
}

impl KeySealer {
    /// Sealer for the current host and OS user
    pub fn for_machine() -> Self {
        Self::from_identity(&machine_identity())
    }

    /// Sealer whose key is derived from `identity`
    pub fn from_identity(identity: &str) -> Self {
        let digest = Sha256::new()
            .chain_update(KEY_CONTEXT)
            .chain_update(identity.as_bytes())
            .finalize();
        Self {
            cipher: Aes256Gcm::new(&digest),
        }
    }

    pub fn seal(&self, plaintext: &str) -> Result<EncryptedData, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| CryptoError::Seal(e.to_string()))?;

        Ok(EncryptedData {
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
        })
    }

    pub fn open(&self, sealed: &EncryptedData) -> Result<String, CryptoError> {
        let nonce = decode_field("nonce", &sealed.nonce)?;
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::Malformed(format!(
                "nonce is {} bytes, expected {}",
                nonce.len(),
                NONCE_SIZE
            )));
        }
        let ciphertext = decode_field("ciphertext", &sealed.ciphertext)?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|e| CryptoError::Open(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| CryptoError::Open(e.to_string()))
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    BASE64
        .decode(value)
        .map_err(|e| CryptoError::Malformed(format!("{}: {}", name, e)))
}

fn machine_identity() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();
    format!("{}:{}", host, user)
}
