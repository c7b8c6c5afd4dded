//! Credential encryption at rest
//!
//! Tenant binding credentials are stored encrypted with AES-256-GCM. The
//! stored form is `v<version>:<base64(nonce || ciphertext)>`; the version
//! byte selects the key from a lookup table so keys can rotate without
//! re-encrypting every row at once. Keys live in process environment:
//!
//! - `WHATSAPP_ENCRYPTION_KEY` — single base64 256-bit key (version 1)
//! - `WHATSAPP_ENCRYPTION_KEYS` — `"<version>:<base64>,..."`; the highest
//!   version encrypts new values, all listed versions decrypt

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::HashMap;

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("unknown key version {0}")]
    UnknownVersion(u8),

    #[error("malformed ciphertext")]
    Malformed,

    #[error("decryption failed")]
    DecryptFailed,
}

/// Versioned AES-256-GCM cipher for binding credentials
pub struct CredentialCipher {
    keys: HashMap<u8, Aes256Gcm>,
    active_version: u8,
}

impl CredentialCipher {
    /// Build a cipher from a single base64 256-bit key (version 1)
    pub fn new(key_b64: &str) -> Result<Self, CryptoError> {
        Self::with_keys(&[(1, key_b64)])
    }

    /// Build a cipher from a versioned key table; the highest version encrypts
    pub fn with_keys(keys: &[(u8, &str)]) -> Result<Self, CryptoError> {
        if keys.is_empty() {
            return Err(CryptoError::InvalidKey("no keys provided".into()));
        }
        let mut table = HashMap::new();
        let mut active_version = 0u8;
        for (version, key_b64) in keys {
            let raw = BASE64
                .decode(key_b64.trim())
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            if raw.len() != 32 {
                return Err(CryptoError::InvalidKey(format!(
                    "key v{version} must be 32 bytes, got {}",
                    raw.len()
                )));
            }
            let key = Key::<Aes256Gcm>::from_slice(&raw);
            table.insert(*version, Aes256Gcm::new(key));
            active_version = active_version.max(*version);
        }
        Ok(Self {
            keys: table,
            active_version,
        })
    }

    /// Build from the environment; `None` when no key is configured (dev mode)
    pub fn from_env() -> Result<Option<Self>, CryptoError> {
        if let Ok(spec) = std::env::var("WHATSAPP_ENCRYPTION_KEYS") {
            let mut keys = Vec::new();
            for part in spec.split(',').filter(|p| !p.trim().is_empty()) {
                let (version, key) = part
                    .split_once(':')
                    .ok_or_else(|| CryptoError::InvalidKey(format!("bad key spec: {part}")))?;
                let version: u8 = version
                    .trim()
                    .parse()
                    .map_err(|_| CryptoError::InvalidKey(format!("bad key version: {version}")))?;
                keys.push((version, key.trim().to_string()));
            }
            let borrowed: Vec<(u8, &str)> =
                keys.iter().map(|(v, k)| (*v, k.as_str())).collect();
            return Self::with_keys(&borrowed).map(Some);
        }
        if let Ok(key) = std::env::var("WHATSAPP_ENCRYPTION_KEY") {
            if !key.is_empty() {
                return Self::new(&key).map(Some);
            }
        }
        Ok(None)
    }

    /// Encrypt a credential with the active key version
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let cipher = self
            .keys
            .get(&self.active_version)
            .ok_or(CryptoError::UnknownVersion(self.active_version))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::DecryptFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(format!("v{}:{}", self.active_version, BASE64.encode(blob)))
    }

    /// Decrypt a stored credential
    pub fn decrypt(&self, stored: &str) -> Result<String, CryptoError> {
        let rest = stored.strip_prefix('v').ok_or(CryptoError::Malformed)?;
        let (version, blob_b64) = rest.split_once(':').ok_or(CryptoError::Malformed)?;
        let version: u8 = version.parse().map_err(|_| CryptoError::Malformed)?;

        let cipher = self
            .keys
            .get(&version)
            .ok_or(CryptoError::UnknownVersion(version))?;

        let blob = BASE64
            .decode(blob_b64)
            .map_err(|_| CryptoError::Malformed)?;
        if blob.len() <= NONCE_LEN {
            return Err(CryptoError::Malformed);
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptFailed)
    }

    /// Whether a stored value carries the versioned-ciphertext prefix
    pub fn looks_encrypted(stored: &str) -> bool {
        stored
            .strip_prefix('v')
            .and_then(|rest| rest.split_once(':'))
            .map(|(version, _)| version.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        BASE64.encode([7u8; 32])
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let cipher = CredentialCipher::new(&test_key()).unwrap();
        let stored = cipher.encrypt("EAAG-super-secret-token").unwrap();
        assert!(stored.starts_with("v1:"));
        assert!(CredentialCipher::looks_encrypted(&stored));
        assert_eq!(cipher.decrypt(&stored).unwrap(), "EAAG-super-secret-token");
    }

    #[test]
    fn test_nonces_differ_between_encryptions() {
        let cipher = CredentialCipher::new(&test_key()).unwrap();
        let a = cipher.encrypt("token").unwrap();
        let b = cipher.encrypt("token").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = CredentialCipher::new(&test_key()).unwrap();
        let stored = cipher.encrypt("token").unwrap();

        let other = CredentialCipher::new(&BASE64.encode([9u8; 32])).unwrap();
        assert!(matches!(
            other.decrypt(&stored),
            Err(CryptoError::DecryptFailed)
        ));
    }

    #[test]
    fn test_key_rotation_decrypts_old_versions() {
        let old_key = test_key();
        let new_key = BASE64.encode([11u8; 32]);

        let v1_only = CredentialCipher::new(&old_key).unwrap();
        let stored_v1 = v1_only.encrypt("token").unwrap();

        let rotated =
            CredentialCipher::with_keys(&[(1, old_key.as_str()), (2, new_key.as_str())]).unwrap();
        assert_eq!(rotated.decrypt(&stored_v1).unwrap(), "token");

        let stored_v2 = rotated.encrypt("token").unwrap();
        assert!(stored_v2.starts_with("v2:"));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let cipher = CredentialCipher::new(&test_key()).unwrap();
        assert!(matches!(
            cipher.decrypt("v9:AAAA"),
            Err(CryptoError::UnknownVersion(9))
        ));
    }

    #[test]
    fn test_plaintext_is_not_mistaken_for_ciphertext() {
        assert!(!CredentialCipher::looks_encrypted("EAAG-plain-token"));
        assert!(!CredentialCipher::looks_encrypted("vault:thing"));
    }
}
