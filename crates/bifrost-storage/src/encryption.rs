// Secret encryption for config values.
// AES-256-GCM with versioned keys: the primary key encrypts, previous
// keys remain available so rotated secrets still decrypt.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bifrost_core::{Error, Result};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
const PAYLOAD_PREFIX: &str = "enc:v1";

/// Primary key with its identifier
struct PrimaryKey {
    id: String,
    cipher: Aes256Gcm,
}

/// Encryption service for secret-typed config values.
/// Thread-safe; clone freely.
#[derive(Clone)]
pub struct EncryptionService {
    primary: Arc<PrimaryKey>,
    keys: Arc<HashMap<String, Aes256Gcm>>,
}

impl EncryptionService {
    /// Create from versioned key strings in format "key_id:base64_key".
    /// The primary key encrypts; all keys decrypt.
    pub fn new(primary_key: &str, previous_keys: &[&str]) -> Result<Self> {
        let (primary_id, primary_cipher) = parse_versioned_key(primary_key)?;

        let mut keys = HashMap::new();
        keys.insert(primary_id.clone(), primary_cipher.clone());

        for key_str in previous_keys {
            let (id, cipher) = parse_versioned_key(key_str)?;
            if keys.contains_key(&id) {
                return Err(Error::validation(format!("duplicate key id '{id}'")));
            }
            keys.insert(id, cipher);
        }

        Ok(Self {
            primary: Arc::new(PrimaryKey {
                id: primary_id,
                cipher: primary_cipher,
            }),
            keys: Arc::new(keys),
        })
    }

    /// Create from environment variables.
    /// - SECRETS_ENCRYPTION_KEY: primary key (required)
    /// - SECRETS_ENCRYPTION_KEY_PREVIOUS: previous key for rotation (optional)
    pub fn from_env() -> Result<Self> {
        let primary = std::env::var("SECRETS_ENCRYPTION_KEY").map_err(|_| {
            Error::Fatal(anyhow::anyhow!(
                "SECRETS_ENCRYPTION_KEY environment variable not set"
            ))
        })?;

        let previous = std::env::var("SECRETS_ENCRYPTION_KEY_PREVIOUS").ok();
        let previous_refs: Vec<&str> = previous.as_deref().into_iter().collect();

        Self::new(&primary, &previous_refs)
    }

    /// Encrypt a cleartext secret into the stored payload form
    /// `enc:v1:{key_id}:{base64(nonce || ciphertext)}`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .primary
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::decryption(format!("encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(format!(
            "{PAYLOAD_PREFIX}:{}:{}",
            self.primary.id,
            BASE64.encode(sealed)
        ))
    }

    /// Decrypt a stored payload back to the cleartext secret.
    pub fn decrypt(&self, payload: &str) -> Result<String> {
        let rest = payload
            .strip_prefix(PAYLOAD_PREFIX)
            .and_then(|s| s.strip_prefix(':'))
            .ok_or_else(|| Error::decryption("unrecognized secret payload format".to_string()))?;

        let (key_id, encoded) = rest
            .split_once(':')
            .ok_or_else(|| Error::decryption("secret payload missing key id".to_string()))?;

        let cipher = self.keys.get(key_id).ok_or_else(|| {
            Error::decryption(format!("unknown encryption key id '{key_id}'"))
        })?;

        let sealed = BASE64
            .decode(encoded)
            .map_err(|e| Error::decryption(format!("invalid base64 in secret payload: {e}")))?;

        if sealed.len() < NONCE_SIZE {
            return Err(Error::decryption("secret payload too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::decryption("secret decryption failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::decryption("decrypted secret is not valid UTF-8".to_string()))
    }

    /// Whether a stored value looks like an encrypted payload.
    pub fn is_encrypted(payload: &str) -> bool {
        payload.starts_with(PAYLOAD_PREFIX)
    }

    pub fn primary_key_id(&self) -> &str {
        &self.primary.id
    }
}

fn parse_versioned_key(key_str: &str) -> Result<(String, Aes256Gcm)> {
    let (key_id, encoded) = key_str.split_once(':').ok_or_else(|| {
        Error::validation("invalid key format, expected 'key_id:base64_key'".to_string())
    })?;

    let key_bytes = BASE64
        .decode(encoded)
        .map_err(|e| Error::validation(format!("failed to decode key from base64: {e}")))?;

    if key_bytes.len() != KEY_SIZE {
        return Err(Error::validation(format!(
            "key must be {KEY_SIZE} bytes, got {} for key id '{key_id}'",
            key_bytes.len()
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(&key_bytes)
        .map_err(|e| Error::validation(format!("failed to create cipher for '{key_id}': {e}")))?;

    Ok((key_id.to_string(), cipher))
}

/// Generate a new random encryption key in versioned format "key_id:base64_key".
pub fn generate_encryption_key(key_id: &str) -> String {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    format!("{}:{}", key_id, BASE64.encode(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(id: &str) -> String {
        generate_encryption_key(id)
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = test_key("kek-v1");
        let service = EncryptionService::new(&key, &[]).unwrap();

        let plaintext = "plaintext-42";
        let encrypted = service.encrypt(plaintext).unwrap();
        assert_ne!(encrypted, plaintext);
        assert!(EncryptionService::is_encrypted(&encrypted));
        assert_eq!(service.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn same_plaintext_different_ciphertext() {
        let key = test_key("kek-v1");
        let service = EncryptionService::new(&key, &[]).unwrap();

        let a = service.encrypt("same").unwrap();
        let b = service.encrypt("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(service.decrypt(&a).unwrap(), "same");
        assert_eq!(service.decrypt(&b).unwrap(), "same");
    }

    #[test]
    fn rotated_key_still_decrypts() {
        let key_v1 = test_key("kek-v1");
        let key_v2 = test_key("kek-v2");

        let service_v1 = EncryptionService::new(&key_v1, &[]).unwrap();
        let encrypted_v1 = service_v1.encrypt("secret-data").unwrap();

        let service_v2 = EncryptionService::new(&key_v2, &[&key_v1]).unwrap();
        assert_eq!(service_v2.decrypt(&encrypted_v1).unwrap(), "secret-data");

        let encrypted_v2 = service_v2.encrypt("secret-data").unwrap();
        assert!(encrypted_v2.starts_with("enc:v1:kek-v2:"));
    }

    #[test]
    fn unknown_key_id_fails() {
        let key_v1 = test_key("kek-v1");
        let key_v2 = test_key("kek-v2");

        let service_v1 = EncryptionService::new(&key_v1, &[]).unwrap();
        let encrypted = service_v1.encrypt("test").unwrap();

        let service_v2 = EncryptionService::new(&key_v2, &[]).unwrap();
        assert!(service_v2.decrypt(&encrypted).is_err());
    }

    #[test]
    fn invalid_key_formats_rejected() {
        assert!(EncryptionService::new("no-colon-here", &[]).is_err());
        assert!(EncryptionService::new("kek-v1:not-valid-base64!!!", &[]).is_err());

        let short_key = format!("kek-v1:{}", BASE64.encode([0u8; 16]));
        assert!(EncryptionService::new(&short_key, &[]).is_err());
    }

    #[test]
    fn duplicate_key_id_rejected() {
        let key1 = test_key("kek-v1");
        let key2 = test_key("kek-v1");
        assert!(EncryptionService::new(&key1, &[&key2]).is_err());
    }

    #[test]
    fn tampered_payload_fails_decryption() {
        let key = test_key("kek-v1");
        let service = EncryptionService::new(&key, &[]).unwrap();

        let mut encrypted = service.encrypt("secret").unwrap();
        encrypted.pop();
        encrypted.push('A');
        assert!(service.decrypt(&encrypted).is_err());
        assert!(service.decrypt("plain-string").is_err());
    }
}
