use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "library.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Directory under which archives without an explicit location are stored
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    /// How long `get_info` waits for metadata before answering empty
    #[serde(default = "default_info_timeout_ms")]
    pub info_timeout_ms: u64,
    /// Capacity of each event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./archives")
}

fn default_info_timeout_ms() -> u64 {
    500
}

fn default_event_capacity() -> usize {
    256
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            info_timeout_ms: default_info_timeout_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl LibraryConfig {
    pub fn with_storage_root(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            ..Self::default()
        }
    }

    pub fn info_timeout(&self) -> Duration {
        Duration::from_millis(self.info_timeout_ms)
    }

    pub fn from_toml_str(config_toml: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(config_toml)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load from a TOML file, or from `library.toml` inside a directory
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config_path = if path.is_dir() {
            path.join(CONFIG_FILE_NAME)
        } else {
            path.to_path_buf()
        };
        if !config_path.exists() {
            return Err(ConfigError::MissingFile(config_path));
        }
        let config_toml = fs::read_to_string(&config_path)?;
        Self::from_toml_str(&config_toml)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing config file: {0}")]
    MissingFile(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = LibraryConfig::from_toml_str("storage_root = \"/data/archives\"").unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/data/archives"));
        assert_eq!(config.info_timeout(), Duration::from_millis(500));
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = LibraryConfig {
            storage_root: dir.path().join("archives"),
            info_timeout_ms: 50,
            event_capacity: 8,
        };
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            config.to_toml_string().unwrap(),
        )
        .unwrap();

        assert_eq!(LibraryConfig::load(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = LibraryConfig::load(dir.path().join("nope.toml"));
        assert!(matches!(result, Err(ConfigError::MissingFile(_))));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let result = LibraryConfig::from_toml_str("info_timeout_ms = \"soon\"");
        assert!(matches!(result, Err(ConfigError::TomlDe(_))));
    }
}
