//! Login secret encoding.
//!
//! The backend expects the password field as base64(AES-CBC-PKCS7(secret))
//! keyed by a shared secret. The key bytes double as the IV (first block),
//! which is how the counterpart service decrypts it. Changing this needs a
//! coordinated backend release.

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::{Result, SessionError};

const BLOCK_SIZE: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// Encodes plaintext secrets before they leave the process.
#[derive(Clone, Default)]
pub struct CredentialEncoder {
    shared_secret: Option<String>,
}

impl std::fmt::Debug for CredentialEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialEncoder")
            .field("shared_secret", &self.shared_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CredentialEncoder {
    pub fn new(shared_secret: Option<String>) -> Self {
        Self { shared_secret }
    }

    /// Encode with the configured shared secret.
    pub fn encode_secret(&self, plaintext: &str) -> Result<String> {
        let secret = self.shared_secret.as_deref().ok_or_else(|| {
            SessionError::Configuration("shared login secret is not configured".to_string())
        })?;
        encode(plaintext, secret)
    }
}

/// AES-CBC encrypt `plaintext` keyed by `shared_secret`, base64 encoded.
///
/// The secret must be 16, 24, or 32 bytes (AES-128/192/256).
pub fn encode(plaintext: &str, shared_secret: &str) -> Result<String> {
    if shared_secret.is_empty() {
        return Err(SessionError::Configuration(
            "shared login secret is empty".to_string(),
        ));
    }

    let key = shared_secret.as_bytes();
    if key.len() < BLOCK_SIZE {
        return Err(SessionError::Configuration(format!(
            "shared login secret must be 16, 24 or 32 bytes, got {}",
            key.len()
        )));
    }
    let iv = &key[..BLOCK_SIZE];
    let data = plaintext.as_bytes();

    let invalid = |e: aes::cipher::InvalidLength| SessionError::Crypto(e.to_string());
    let ciphertext = match key.len() {
        16 => Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        24 => Aes192CbcEnc::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        32 => Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        n => {
            return Err(SessionError::Configuration(format!(
                "shared login secret must be 16, 24 or 32 bytes, got {}",
                n
            )))
        }
    };

    Ok(STANDARD.encode(ciphertext))
}
