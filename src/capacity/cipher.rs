//! Credential encryption for shared voice accounts
//!
//! Credentials are stored and cached as `enc:v1:<base64(nonce || ciphertext)>`
//! using AES-256-GCM with a key derived from operator-supplied material.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::Credential;

const ENCRYPTED_V1_PREFIX: &str = "enc:v1:";
const NONCE_BYTES: usize = 12;
const CREDENTIAL_AAD: &[u8] = b"outreach-umbrella-credential";
const MIN_KEY_MATERIAL_LEN: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("Credential key material must be at least {MIN_KEY_MATERIAL_LEN} characters")]
    WeakKeyMaterial,

    #[error("Credential key environment variable '{0}' is not set")]
    MissingKey(String),

    #[error("Credential payload is malformed: {0}")]
    Malformed(&'static str),

    #[error("Credential payload integrity check failed")]
    IntegrityCheckFailed,

    #[error("Credential encryption failed")]
    EncryptionFailed,
}

pub type CipherResult<T> = Result<T, CipherError>;

/// Encrypt/decrypt seam used by the capacity resolver
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, credential: &Credential) -> CipherResult<String>;

    fn decrypt(&self, ciphertext: &str) -> CipherResult<Credential>;
}

pub struct AesGcmCredentialCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for AesGcmCredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCredentialCipher").finish_non_exhaustive()
    }
}

impl AesGcmCredentialCipher {
    pub fn new(key_material: &str) -> CipherResult<Self> {
        let key_material = key_material.trim();
        if key_material.len() < MIN_KEY_MATERIAL_LEN {
            return Err(CipherError::WeakKeyMaterial);
        }

        let digest = Sha256::digest(key_material.as_bytes());
        let cipher =
            Aes256Gcm::new_from_slice(&digest).map_err(|_| CipherError::WeakKeyMaterial)?;
        Ok(Self { cipher })
    }

    /// Build from the environment variable named in `credentials.key_env_var`
    pub fn from_env(var_name: &str) -> CipherResult<Self> {
        let key_material =
            std::env::var(var_name).map_err(|_| CipherError::MissingKey(var_name.to_string()))?;
        Self::new(&key_material)
    }
}

impl CredentialCipher for AesGcmCredentialCipher {
    fn encrypt(&self, credential: &Credential) -> CipherResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: credential.expose().as_bytes(),
                    aad: CREDENTIAL_AAD,
                },
            )
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut payload = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(format!(
            "{ENCRYPTED_V1_PREFIX}{}",
            BASE64_STANDARD.encode(payload)
        ))
    }

    fn decrypt(&self, ciphertext: &str) -> CipherResult<Credential> {
        let encoded = ciphertext
            .strip_prefix(ENCRYPTED_V1_PREFIX)
            .ok_or(CipherError::Malformed("missing version prefix"))?;
        let raw = BASE64_STANDARD
            .decode(encoded)
            .map_err(|_| CipherError::Malformed("invalid base64"))?;
        if raw.len() <= NONCE_BYTES {
            return Err(CipherError::Malformed("truncated payload"));
        }

        let (nonce, body) = raw.split_at(NONCE_BYTES);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: body,
                    aad: CREDENTIAL_AAD,
                },
            )
            .map_err(|_| CipherError::IntegrityCheckFailed)?;

        let secret =
            String::from_utf8(plaintext).map_err(|_| CipherError::Malformed("not UTF-8"))?;
        Ok(Credential::new(secret))
    }
}
