//! Workload credential generation and encryption.
//!
//! Generated credentials are only ever persisted as an envelope:
//! - Data key: random per envelope
//! - Master key: operator-managed, passed in explicitly
//!
//! Cipher: AES-256-GCM for both payload and key wrapping. The workload id is
//! bound as associated data so an envelope cannot be replayed onto another
//! workload.

use std::fmt;
use std::path::Path;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const DATA_KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;
const WRAP_AAD: &[u8] = b"appz-credentials-wrap-v1";
const CIPHER: &str = "aes-256-gcm";

/// Entropy of generated passwords.
const PASSWORD_BYTES: usize = 16;
/// Entropy of generated encryption keys.
const ENCRYPTION_KEY_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum SecretsCryptoError {
    #[error("invalid secrets master key encoding")]
    InvalidMasterKey,
    #[error("secret encryption failed")]
    EncryptFailed,
    #[error("secret decryption failed")]
    DecryptFailed,
    #[error("unknown master key id: {0}")]
    UnknownMasterKey(String),
    #[error("unsupported cipher: {0}")]
    UnsupportedCipher(String),
}

/// Operator-managed key that wraps per-envelope data keys.
#[derive(Clone)]
pub struct MasterKey {
    pub id: String,
    key_bytes: [u8; DATA_KEY_BYTES],
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl MasterKey {
    pub fn from_bytes(key_bytes: [u8; DATA_KEY_BYTES]) -> Self {
        Self {
            id: master_key_id_for_bytes(&key_bytes),
            key_bytes,
        }
    }

    /// Decode a base64 (standard alphabet) 32-byte key.
    pub fn from_base64(raw: &str) -> Result<Self, SecretsCryptoError> {
        let bytes = STANDARD
            .decode(raw.trim())
            .map_err(|_| SecretsCryptoError::InvalidMasterKey)?;
        let key_bytes: [u8; DATA_KEY_BYTES] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SecretsCryptoError::InvalidMasterKey)?;
        Ok(Self::from_bytes(key_bytes))
    }

    /// Read a base64 key from a file.
    pub fn from_file(path: &Path) -> Result<Self, SecretsCryptoError> {
        let contents =
            std::fs::read_to_string(path).map_err(|_| SecretsCryptoError::InvalidMasterKey)?;
        Self::from_base64(&contents)
    }

    /// A random key. Envelopes sealed with it die with the process.
    pub fn generate() -> Self {
        let mut key_bytes = [0u8; DATA_KEY_BYTES];
        rand::rng().fill_bytes(&mut key_bytes);
        Self::from_bytes(key_bytes)
    }
}

fn master_key_id_for_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)[..8].to_string()
}

/// An AES-256-GCM envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedCredentials {
    pub cipher: String,
    pub master_key_id: String,
    pub nonce: String,
    pub ciphertext: String,
    pub wrapped_data_key: String,
    pub wrapped_data_key_nonce: String,
}

fn random_nonce() -> [u8; NONCE_BYTES] {
    let mut nonce = [0u8; NONCE_BYTES];
    rand::rng().fill_bytes(&mut nonce);
    nonce
}

fn decode(field: &str) -> Result<Vec<u8>, SecretsCryptoError> {
    STANDARD
        .decode(field)
        .map_err(|_| SecretsCryptoError::DecryptFailed)
}

fn check_nonce(bytes: &[u8]) -> Result<&[u8], SecretsCryptoError> {
    if bytes.len() != NONCE_BYTES {
        return Err(SecretsCryptoError::DecryptFailed);
    }
    Ok(bytes)
}

pub fn encrypt(
    master: &MasterKey,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<EncryptedCredentials, SecretsCryptoError> {
    let mut data_key = [0u8; DATA_KEY_BYTES];
    rand::rng().fill_bytes(&mut data_key);

    let nonce_bytes = random_nonce();
    let cipher =
        Aes256Gcm::new_from_slice(&data_key).map_err(|_| SecretsCryptoError::EncryptFailed)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), Payload { msg: plaintext, aad })
        .map_err(|_| SecretsCryptoError::EncryptFailed)?;

    let wrap_nonce_bytes = random_nonce();
    let wrap_cipher = Aes256Gcm::new_from_slice(&master.key_bytes)
        .map_err(|_| SecretsCryptoError::EncryptFailed)?;
    let wrapped_data_key = wrap_cipher
        .encrypt(
            Nonce::from_slice(&wrap_nonce_bytes),
            Payload {
                msg: &data_key,
                aad: WRAP_AAD,
            },
        )
        .map_err(|_| SecretsCryptoError::EncryptFailed)?;

    Ok(EncryptedCredentials {
        cipher: CIPHER.to_string(),
        master_key_id: master.id.clone(),
        nonce: STANDARD.encode(nonce_bytes),
        ciphertext: STANDARD.encode(ciphertext),
        wrapped_data_key: STANDARD.encode(wrapped_data_key),
        wrapped_data_key_nonce: STANDARD.encode(wrap_nonce_bytes),
    })
}

pub fn decrypt(
    master: &MasterKey,
    envelope: &EncryptedCredentials,
    aad: &[u8],
) -> Result<Vec<u8>, SecretsCryptoError> {
    if envelope.cipher != CIPHER {
        return Err(SecretsCryptoError::UnsupportedCipher(envelope.cipher.clone()));
    }
    if master.id != envelope.master_key_id {
        return Err(SecretsCryptoError::UnknownMasterKey(
            envelope.master_key_id.clone(),
        ));
    }

    let wrap_nonce = decode(&envelope.wrapped_data_key_nonce)?;
    let wrapped_data_key = decode(&envelope.wrapped_data_key)?;
    let wrap_cipher = Aes256Gcm::new_from_slice(&master.key_bytes)
        .map_err(|_| SecretsCryptoError::DecryptFailed)?;
    let data_key = wrap_cipher
        .decrypt(
            Nonce::from_slice(check_nonce(&wrap_nonce)?),
            Payload {
                msg: &wrapped_data_key,
                aad: WRAP_AAD,
            },
        )
        .map_err(|_| SecretsCryptoError::DecryptFailed)?;

    let nonce = decode(&envelope.nonce)?;
    let ciphertext = decode(&envelope.ciphertext)?;
    let cipher =
        Aes256Gcm::new_from_slice(&data_key).map_err(|_| SecretsCryptoError::DecryptFailed)?;
    cipher
        .decrypt(
            Nonce::from_slice(check_nonce(&nonce)?),
            Payload {
                msg: &ciphertext,
                aad,
            },
        )
        .map_err(|_| SecretsCryptoError::DecryptFailed)
}

/// The four secrets generated for every deployment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub db_password: String,
    pub db_root_password: String,
    pub admin_password: String,
    pub encryption_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials { .. }")
    }
}

/// A URL-safe random token with `bytes` bytes of entropy.
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

impl Credentials {
    /// Four independent tokens.
    pub fn generate() -> Self {
        Self {
            db_password: random_token(PASSWORD_BYTES),
            db_root_password: random_token(PASSWORD_BYTES),
            admin_password: random_token(PASSWORD_BYTES),
            encryption_key: random_token(ENCRYPTION_KEY_BYTES),
        }
    }

    /// Encrypt for storage on the workload identified by `aad`.
    pub fn seal(&self, master: &MasterKey, aad: &[u8]) -> Result<EncryptedCredentials, SecretsCryptoError> {
        let plaintext = serde_json::to_vec(self).map_err(|_| SecretsCryptoError::EncryptFailed)?;
        encrypt(master, &plaintext, aad)
    }

    pub fn open(
        master: &MasterKey,
        envelope: &EncryptedCredentials,
        aad: &[u8],
    ) -> Result<Self, SecretsCryptoError> {
        let plaintext = decrypt(master, envelope, aad)?;
        serde_json::from_slice(&plaintext).map_err(|_| SecretsCryptoError::DecryptFailed)
    }
}
