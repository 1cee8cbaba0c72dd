// Encryption Service
// Encrypts secrets at rest (SRT passphrases, backend tokens) with a
// machine-specific AES-256-GCM key

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::Rng;
use std::path::Path;
use zeroize::{Zeroize, Zeroizing};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

// Prefix for identifying encrypted secrets
const SECRET_PREFIX: &str = "ENC::";

/// Encryption service for stored secrets
pub struct Encryption;

impl Encryption {
    /// Get or create the machine-specific encryption key
    /// Returns a zeroizing key that will be securely erased from memory
    fn get_or_create_machine_key(app_data_dir: &Path) -> Result<Zeroizing<[u8; KEY_LEN]>, String> {
        let key_file = app_data_dir.join(".secret_key");

        if key_file.exists() {
            let mut key_data = std::fs::read(&key_file)
                .map_err(|e| format!("Failed to read machine key: {e}"))?;

            if key_data.len() != KEY_LEN {
                key_data.zeroize();
                return Err("Invalid machine key file".to_string());
            }

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(0o600);
                std::fs::set_permissions(&key_file, perms)
                    .map_err(|e| format!("Failed to set key file permissions: {e}"))?;
            }

            let mut key = Zeroizing::new([0u8; KEY_LEN]);
            key.copy_from_slice(&key_data);
            key_data.zeroize();

            Ok(key)
        } else {
            let mut rng = rand::thread_rng();
            let key = Zeroizing::new(rng.gen::<[u8; KEY_LEN]>());

            std::fs::write(&key_file, *key)
                .map_err(|e| format!("Failed to save machine key: {e}"))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(0o600);
                std::fs::set_permissions(&key_file, perms)
                    .map_err(|e| format!("Failed to set key file permissions: {e}"))?;
            }

            Ok(key)
        }
    }

    /// Encrypt a secret for storage
    /// Returns the base64-encoded ciphertext with the `ENC::` prefix
    pub fn encrypt_secret(secret: &str, app_data_dir: &Path) -> Result<String, String> {
        // Don't encrypt empty or already encrypted values
        if secret.is_empty() || secret.starts_with(SECRET_PREFIX) {
            return Ok(secret.to_string());
        }

        let machine_key = Self::get_or_create_machine_key(app_data_dir)?;

        let mut rng = rand::thread_rng();
        let nonce_bytes: [u8; NONCE_LEN] = rng.gen();

        let cipher = Aes256Gcm::new_from_slice(&*machine_key)
            .map_err(|e| format!("Failed to create cipher: {e}"))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, secret.as_bytes())
            .map_err(|e| format!("Secret encryption failed: {e}"))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", SECRET_PREFIX, BASE64.encode(combined)))
    }

    /// Decrypt a stored secret. Values without the prefix pass through
    /// unchanged.
    pub fn decrypt_secret(encrypted: &str, app_data_dir: &Path) -> Result<String, String> {
        if !encrypted.starts_with(SECRET_PREFIX) {
            return Ok(encrypted.to_string());
        }

        let machine_key = Self::get_or_create_machine_key(app_data_dir)?;

        let encoded = &encrypted[SECRET_PREFIX.len()..];
        let mut combined = BASE64
            .decode(encoded)
            .map_err(|e| format!("Failed to decode encrypted secret: {e}"))?;

        if combined.len() < NONCE_LEN {
            combined.zeroize();
            return Err("Invalid encrypted secret".to_string());
        }

        let nonce_bytes = &combined[..NONCE_LEN];
        let ciphertext = &combined[NONCE_LEN..];

        let cipher = Aes256Gcm::new_from_slice(&*machine_key)
            .map_err(|e| format!("Failed to create cipher: {e}"))?;
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| format!("Secret decryption failed: {e}"))?;

        combined.zeroize();

        String::from_utf8(plaintext).map_err(|e| format!("Invalid UTF-8 in secret: {e}"))
    }

    /// Check if a value is an encrypted secret
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(SECRET_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_roundtrip() {
        let dir = tempdir().unwrap();
        let encrypted = Encryption::encrypt_secret("srt-passphrase", dir.path()).unwrap();
        assert!(Encryption::is_encrypted(&encrypted));
        assert_ne!(encrypted, "srt-passphrase");

        let decrypted = Encryption::decrypt_secret(&encrypted, dir.path()).unwrap();
        assert_eq!(decrypted, "srt-passphrase");
    }

    #[test]
    fn test_empty_value_passes_through() {
        let dir = tempdir().unwrap();
        assert_eq!(Encryption::encrypt_secret("", dir.path()).unwrap(), "");
    }

    #[test]
    fn test_double_encrypt_is_stable() {
        let dir = tempdir().unwrap();
        let once = Encryption::encrypt_secret("secret", dir.path()).unwrap();
        let twice = Encryption::encrypt_secret(&once, dir.path()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_plaintext_passes_through_decrypt() {
        let dir = tempdir().unwrap();
        assert_eq!(
            Encryption::decrypt_secret("not encrypted", dir.path()).unwrap(),
            "not encrypted"
        );
    }
}
