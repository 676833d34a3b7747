//! Application settings stored in settings.toml

use crate::{GEMINI_API_KEY_ENV, PathManager, crypto};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Settings {
    /// Chat model name, e.g. "gemini-2.5-flash"
    pub default_model: Option<String>,
    /// Override for the Gemini API base URL (proxies, test servers)
    pub gemini_base_url: Option<String>,
    /// System instruction sent with every chat turn
    pub system_instruction: Option<String>,
    /// Encrypted Gemini API key
    pub api_key: Option<String>,
}

impl Settings {
    /// Load settings from the default location, or defaults if missing or unreadable
    pub fn load() -> Self {
        match PathManager::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        toml::from_str(&content).unwrap_or_default()
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = PathManager::settings_path().context("Could not determine settings path")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config dir {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        Ok(())
    }

    /// Decrypted API key from settings; None if unset or undecryptable.
    pub fn stored_api_key(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .and_then(|encrypted| crypto::decrypt_string(encrypted).ok())
    }

    pub fn set_api_key(&mut self, api_key: &str) -> anyhow::Result<()> {
        let encrypted = crypto::encrypt_string(api_key).map_err(anyhow::Error::msg)?;
        self.api_key = Some(encrypted);
        Ok(())
    }

    pub fn remove_api_key(&mut self) {
        self.api_key = None;
    }

    /// API key from the environment, falling back to the stored one.
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(GEMINI_API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.stored_api_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("nope.toml"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let mut settings = Settings {
            default_model: Some("gemini-2.5-flash".into()),
            system_instruction: Some("ตอบเป็นภาษาไทย".into()),
            ..Default::default()
        };
        settings.set_api_key("AIza-secret").unwrap();
        settings.save_to(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("AIza-secret"));

        let loaded = Settings::load_from(&path);
        assert_eq!(loaded, settings);
        assert_eq!(loaded.stored_api_key().as_deref(), Some("AIza-secret"));
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "default_model = [unterminated").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
    }

    #[test]
    fn test_remove_api_key() {
        let mut settings = Settings::default();
        settings.set_api_key("k").unwrap();
        settings.remove_api_key();
        assert!(settings.stored_api_key().is_none());
    }
}
