// SettingsManager Service
// Handles application settings persistence

use std::path::PathBuf;
use std::sync::RwLock;

use serde_json::Value;

use crate::models::Settings;
use crate::services::encryption::Encryption;

/// Fields in settings.json (camelCase) containing sensitive data,
/// encrypted before the file hits disk
const SENSITIVE_FIELDS: &[&str] = &["liveApiToken", "backendToken"];

/// Manages application settings storage and retrieval
pub struct SettingsManager {
    settings_path: PathBuf,
    app_data_dir: PathBuf,
    cache: RwLock<Option<Settings>>,
}

impl SettingsManager {
    /// Create a new SettingsManager with the given app data directory
    pub fn new(app_data_dir: PathBuf) -> Self {
        let settings_path = app_data_dir.join("settings.json");
        Self {
            settings_path,
            app_data_dir,
            cache: RwLock::new(None),
        }
    }

    /// Load settings from disk, or return defaults if not found.
    /// Missing fields are filled from defaults and written back.
    pub fn load(&self) -> Result<Settings, String> {
        if let Ok(cache) = self.cache.read() {
            if let Some(ref settings) = *cache {
                return Ok(settings.clone());
            }
        }

        let settings = if self.settings_path.exists() {
            let content = std::fs::read_to_string(&self.settings_path)
                .map_err(|e| format!("Failed to read settings: {e}"))?;

            let mut user_value: Value = serde_json::from_str(&content)
                .map_err(|e| format!("Failed to parse settings: {e}"))?;

            self.decrypt_sensitive_fields(&mut user_value);

            let defaults_value = serde_json::to_value(Settings::default())
                .map_err(|e| format!("Failed to build default settings: {e}"))?;
            let changed = merge_missing_settings(&mut user_value, &defaults_value);

            let settings: Settings = serde_json::from_value(user_value)
                .map_err(|e| format!("Failed to parse settings: {e}"))?;

            if changed {
                self.save_internal(&settings)?;
            }

            settings
        } else {
            let defaults = Settings::default();
            self.save_internal(&defaults)?;
            defaults
        };

        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(settings.clone());
        }

        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self, settings: &Settings) -> Result<(), String> {
        self.save_internal(settings)?;

        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(settings.clone());
        }

        Ok(())
    }

    fn save_internal(&self, settings: &Settings) -> Result<(), String> {
        if let Some(parent) = self.settings_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create settings directory: {e}"))?;
        }

        let mut value = serde_json::to_value(settings)
            .map_err(|e| format!("Failed to serialize settings: {e}"))?;

        self.encrypt_sensitive_fields(&mut value);

        let content = serde_json::to_string_pretty(&value)
            .map_err(|e| format!("Failed to serialize settings: {e}"))?;

        std::fs::write(&self.settings_path, content)
            .map_err(|e| format!("Failed to write settings: {e}"))
    }

    /// Decrypt sensitive fields after reading from disk so in-memory
    /// settings always hold plaintext
    fn decrypt_sensitive_fields(&self, value: &mut Value) {
        if let Value::Object(map) = value {
            for &field in SENSITIVE_FIELDS {
                if let Some(Value::String(val)) = map.get(field) {
                    if Encryption::is_encrypted(val) {
                        match Encryption::decrypt_secret(val, &self.app_data_dir) {
                            Ok(plaintext) => {
                                map.insert(field.to_string(), Value::String(plaintext));
                            }
                            Err(e) => {
                                log::warn!("Failed to decrypt settings field '{field}': {e}");
                            }
                        }
                    }
                }
            }
        }
    }

    /// Encrypt sensitive fields before writing to disk
    fn encrypt_sensitive_fields(&self, value: &mut Value) {
        if let Value::Object(map) = value {
            for &field in SENSITIVE_FIELDS {
                if let Some(Value::String(val)) = map.get(field) {
                    if !val.is_empty() && !Encryption::is_encrypted(val) {
                        match Encryption::encrypt_secret(val, &self.app_data_dir) {
                            Ok(encrypted) => {
                                map.insert(field.to_string(), Value::String(encrypted));
                            }
                            Err(e) => {
                                log::warn!("Failed to encrypt settings field '{field}': {e}");
                            }
                        }
                    }
                }
            }
        }
    }
}

fn merge_missing_settings(target: &mut Value, defaults: &Value) -> bool {
    match (target, defaults) {
        (Value::Object(target_map), Value::Object(defaults_map)) => {
            let mut changed = false;
            for (key, default_value) in defaults_map {
                match target_map.get_mut(key) {
                    Some(target_value) => {
                        if merge_missing_settings(target_value, default_value) {
                            changed = true;
                        }
                    }
                    None => {
                        target_map.insert(key.clone(), default_value.clone());
                        changed = true;
                    }
                }
            }
            changed
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_created_on_first_load() {
        let dir = tempdir().unwrap();
        let manager = SettingsManager::new(dir.path().to_path_buf());

        let settings = manager.load().unwrap();
        assert_eq!(settings.backend_port, 8008);
        assert!(dir.path().join("settings.json").exists());
    }

    #[test]
    fn test_missing_fields_merged_from_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{ "backendPort": 9000 }"#,
        )
        .unwrap();

        let manager = SettingsManager::new(dir.path().to_path_buf());
        let settings = manager.load().unwrap();
        assert_eq!(settings.backend_port, 9000);
        assert_eq!(settings.backend_host, "127.0.0.1");
        assert_eq!(settings.log_retention_days, 30);
    }

    #[test]
    fn test_live_token_encrypted_on_disk() {
        let dir = tempdir().unwrap();
        let manager = SettingsManager::new(dir.path().to_path_buf());

        let mut settings = Settings::default();
        settings.live_api_token = "super-secret".to_string();
        manager.save(&settings).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("settings.json")).unwrap();
        assert!(!raw.contains("super-secret"));

        // a fresh manager reads the plaintext back
        let manager = SettingsManager::new(dir.path().to_path_buf());
        assert_eq!(manager.load().unwrap().live_api_token, "super-secret");
    }
}
