use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root for avatars, bundled assets and session state.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Defaults to `charcard.db` inside `data_dir`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,

    /// Scratch space for downloaded cards and duplicated avatars.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_chub_download_url")]
    pub chub_download_url: String,

    /// Base of the export endpoint; the character id and `/v2` are appended.
    #[serde(default = "default_pyg_export_url")]
    pub pyg_export_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("charcard")
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("charcard")
}

fn default_chub_download_url() -> String {
    "https://api.chub.ai/api/characters/download".to_string()
}

fn default_pyg_export_url() -> String {
    "https://server.pygmalion.chat/api/export/character".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            chub_download_url: default_chub_download_url(),
            pyg_export_url: default_pyg_export_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_path: None,
            cache_dir: default_cache_dir(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default location, honouring `CHARCARD_CONFIG`.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`, writing defaults there if the file does not exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("charcard")
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("CHARCARD_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("charcard.db"))
    }

    /// Directory holding one `<image_id>.png` per character.
    pub fn characters_dir(&self) -> PathBuf {
        self.data_dir.join("characters")
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.data_dir.join("appAssets")
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "/srv/cards"

            [remote]
            timeout_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/cards"));
        assert_eq!(config.characters_dir(), PathBuf::from("/srv/cards/characters"));
        assert_eq!(config.db_path(), PathBuf::from("/srv/cards/charcard.db"));
        assert_eq!(config.remote.timeout_secs, 5);
        assert_eq!(config.remote.chub_download_url, default_chub_download_url());
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.db_path(), config.db_path());
        assert_eq!(reloaded.remote.pyg_export_url, default_pyg_export_url());
    }

    #[test]
    fn test_explicit_db_path_wins() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "/srv/cards"
            db_path = "/var/lib/cards.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.db_path(), PathBuf::from("/var/lib/cards.db"));
        assert_eq!(config.assets_dir(), PathBuf::from("/srv/cards/appAssets"));
    }
}
