//! Credential vault for per-clinic provider API keys.
//!
//! AES-256-GCM with a process-wide symmetric key that the host injects at
//! construction time. Stored values carry a format prefix so plaintext that
//! leaked into a column before encryption was enabled is detectable.
//!
//! Wire format: `aes256:<base64(nonce || ciphertext)>`.
//!
//! There is no key rotation: rotating means decrypting with the old vault and
//! re-encrypting with the new one in an out-of-band migration.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use rand::RngCore;
use std::path::Path;

use crate::error::AiError;

/// Nonce size for AES-256-GCM (12 bytes / 96 bits).
const NONCE_SIZE: usize = 12;

/// Prefix for vault-encrypted values.
const VAULT_PREFIX: &str = "aes256:";

/// Symmetric encryption engine for stored credentials.
pub struct CredentialVault {
    key: [u8; 32],
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl CredentialVault {
    /// Create a vault with a 256-bit key.
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Create a vault from a base64-encoded key, the form the host keeps in
    /// its environment-level configuration.
    pub fn from_base64(encoded: &str) -> Result<Self, AiError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| AiError::Configuration(format!("vault key is not valid base64: {e}")))?;
        if bytes.len() != 32 {
            return Err(AiError::Configuration(format!(
                "vault key must be exactly 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self { key })
    }

    /// Create a vault by loading the raw key from a file.
    pub fn from_key_file(path: &Path) -> Result<Self, AiError> {
        let bytes = std::fs::read(path)
            .map_err(|e| AiError::Configuration(format!("cannot read vault key file: {e}")))?;
        if bytes.len() != 32 {
            return Err(AiError::Configuration(format!(
                "vault key file must hold exactly 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self { key })
    }

    /// Generate a fresh random 256-bit key.
    pub fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Encrypt a plaintext credential, returning the prefixed base64 form.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, AiError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| AiError::Configuration(format!("vault cipher init failed: {e}")))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| AiError::Configuration(format!("credential encryption failed: {e}")))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        let encoded = base64::engine::general_purpose::STANDARD.encode(&combined);
        Ok(format!("{VAULT_PREFIX}{encoded}"))
    }

    /// Decrypt a prefixed base64 credential back to plaintext.
    pub fn decrypt(&self, encrypted: &str) -> Result<String, AiError> {
        let encoded = encrypted.strip_prefix(VAULT_PREFIX).ok_or_else(|| {
            AiError::Configuration("stored credential is missing the vault prefix".into())
        })?;

        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| AiError::Configuration(format!("stored credential is corrupt: {e}")))?;

        if combined.len() < NONCE_SIZE {
            return Err(AiError::Configuration(
                "stored credential is too short".into(),
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| AiError::Configuration(format!("vault cipher init failed: {e}")))?;

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| AiError::Configuration("credential decryption failed".into()))?;

        String::from_utf8(plaintext)
            .map_err(|e| AiError::Configuration(format!("decrypted credential is not UTF-8: {e}")))
    }

    /// Check whether a stored value carries the vault prefix.
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(VAULT_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> CredentialVault {
        CredentialVault::new(CredentialVault::generate_key())
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let vault = test_vault();
        let plaintext = "sk-clinic-credential-12345";

        let encrypted = vault.encrypt(plaintext).unwrap();
        assert!(encrypted.starts_with(VAULT_PREFIX));
        assert_ne!(encrypted, plaintext);

        let decrypted = vault.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn each_encryption_gets_a_fresh_nonce() {
        let vault = test_vault();
        let a = vault.encrypt("same-secret").unwrap();
        let b = vault.encrypt("same-secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let vault_a = test_vault();
        let vault_b = test_vault();

        let encrypted = vault_a.encrypt("secret").unwrap();
        assert!(vault_b.decrypt(&encrypted).is_err());
    }

    #[test]
    fn missing_prefix_is_a_configuration_error() {
        let vault = test_vault();
        let err = vault.decrypt("plaintext-key-from-before-encryption").unwrap_err();
        assert!(matches!(err, AiError::Configuration(_)));
    }

    #[test]
    fn truncated_ciphertext_fails() {
        let vault = test_vault();
        assert!(vault.decrypt("aes256:AQID").is_err());
    }

    #[test]
    fn from_base64_rejects_wrong_length() {
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; 16]);
        let err = CredentialVault::from_base64(&short).unwrap_err();
        assert!(matches!(err, AiError::Configuration(_)));
    }

    #[test]
    fn from_base64_roundtrips_with_generated_key() {
        let key = CredentialVault::generate_key();
        let encoded = base64::engine::general_purpose::STANDARD.encode(key);

        let vault_a = CredentialVault::new(key);
        let vault_b = CredentialVault::from_base64(&encoded).unwrap();

        let encrypted = vault_a.encrypt("shared").unwrap();
        assert_eq!(vault_b.decrypt(&encrypted).unwrap(), "shared");
    }

    #[test]
    fn key_file_load() {
        let tmp = tempfile::TempDir::new().unwrap();
        let key_path = tmp.path().join("vault.key");
        let key = CredentialVault::generate_key();
        std::fs::write(&key_path, key).unwrap();

        let vault_a = CredentialVault::new(key);
        let vault_b = CredentialVault::from_key_file(&key_path).unwrap();

        let encrypted = vault_a.encrypt("from-file").unwrap();
        assert_eq!(vault_b.decrypt(&encrypted).unwrap(), "from-file");
    }

    #[test]
    fn is_encrypted_detects_prefix() {
        assert!(CredentialVault::is_encrypted("aes256:AAAA"));
        assert!(!CredentialVault::is_encrypted("sk-plain-key"));
    }

    #[test]
    fn unicode_roundtrip() {
        let vault = test_vault();
        let plaintext = "chave-de-aplicação-αβγ";
        let encrypted = vault.encrypt(plaintext).unwrap();
        assert_eq!(vault.decrypt(&encrypted).unwrap(), plaintext);
    }
}
