//! Configuration management for tablesync
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Source table to read from
    #[serde(default)]
    pub source: SourceConfig,

    /// Document store to write to
    #[serde(default)]
    pub target: TargetConfig,

    /// Reconciliation settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Secret lookup settings
    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Source table configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Airtable base id (`app...`)
    #[serde(default)]
    pub base_id: String,

    /// Table name within the base
    #[serde(default)]
    pub table_name: String,

    /// View to read through; the whole table when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_name: Option<String>,

    /// API root URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Name of the secret (or environment variable) holding the API key
    #[serde(default = "default_api_key_secret")]
    pub api_key_secret: String,

    /// Maximum requests per second sent to the API
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Target store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// SQLite database file; relative paths are resolved against the config directory
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Collection written by this pipeline
    #[serde(default)]
    pub collection: String,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Field identifying a logical entity across passes
    #[serde(default)]
    pub primary_key: String,

    /// Policy identifier (e.g. `upsert_checksum`)
    #[serde(default = "default_update_type")]
    pub update_type: String,

    /// Field holding the record creation time used to resolve duplicate keys;
    /// the source's own creation time when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_field: Option<String>,
}

/// Secret lookup configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Directory of managed secrets, one file per secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// Paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for tablesync data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_id: String::new(),
            table_name: String::new(),
            view_name: None,
            api_url: default_api_url(),
            api_key_secret: default_api_key_secret(),
            requests_per_second: default_requests_per_second(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            collection: String::new(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            primary_key: String::new(),
            update_type: default_update_type(),
            created_field: None,
        }
    }
}

impl Config {
    /// Get the default base directory for tablesync (~/.tablesync)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tablesync")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            base_dir: base,
        };
    }

    /// Load and validate configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::NotInitialized(config_path.to_path_buf()));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a base directory, falling back to defaults
    ///
    /// Unlike [`Config::load`] this does not validate.
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.paths.base_dir.join(path)
        }
    }

    /// Absolute path of the SQLite database
    pub fn database_path(&self) -> PathBuf {
        self.resolve(&self.target.database)
    }

    /// Absolute path of the managed secret directory, if configured
    pub fn secrets_dir(&self) -> Option<PathBuf> {
        self.secrets.dir.as_deref().map(|dir| self.resolve(dir))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("source.base_id", &self.source.base_id),
            ("source.table_name", &self.source.table_name),
            ("target.collection", &self.target.collection),
            ("pipeline.primary_key", &self.pipeline.primary_key),
            ("pipeline.update_type", &self.pipeline.update_type),
            ("source.api_key_secret", &self.source.api_key_secret),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{} must be set", name)));
            }
        }

        if self.source.requests_per_second == 0 {
            return Err(Error::Config(
                "source.requests_per_second must be positive".to_string(),
            ));
        }

        if self.source.timeout_secs == 0 {
            return Err(Error::Config(
                "source.timeout_secs must be positive".to_string(),
            ));
        }

        if let Some(view) = &self.source.view_name {
            if view.trim().is_empty() {
                return Err(Error::Config(
                    "source.view_name must not be empty; remove it to use the whole table"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn complete_config() -> Config {
        let mut config = Config::default();
        config.source.base_id = "appBase".to_string();
        config.source.table_name = "People".to_string();
        config.target.collection = "people".to_string();
        config.pipeline.primary_key = "Name".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.source.api_key_secret, "AIRTABLE_API_KEY");
        assert_eq!(config.source.requests_per_second, 5);
        assert_eq!(config.pipeline.update_type, "upsert_checksum");
        // Identity of the source and target has no sensible default
        assert!(config.validate().is_err());
        assert!(complete_config().validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = complete_config();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.source.view_name = Some("Grid".to_string());
        config.pipeline.update_type = "versioned_set".to_string();

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load(&config.paths.config_file).unwrap();
        assert_eq!(loaded.source.view_name.as_deref(), Some("Grid"));
        assert_eq!(loaded.pipeline.update_type, "versioned_set");
        assert_eq!(loaded.database_path(), tmp.path().join("tablesync.db"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            r#"
[source]
base_id = "appBase"
table_name = "People"

[target]
collection = "people"
database = "/var/lib/tablesync/data.db"

[pipeline]
primary_key = "Name"
created_field = "Created"

[secrets]
dir = "secrets"
"#,
        )
        .unwrap();

        let config = Config::load(&tmp.path().join("config.toml")).unwrap();
        assert_eq!(config.source.timeout_secs, 30);
        assert_eq!(config.pipeline.created_field.as_deref(), Some("Created"));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/tablesync/data.db")
        );
        assert_eq!(config.secrets_dir(), Some(tmp.path().join("secrets")));
    }

    #[test]
    fn test_config_validation() {
        let mut config = complete_config();

        config.source.requests_per_second = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        config.source.requests_per_second = 5;

        config.pipeline.primary_key = "  ".to_string();
        assert!(config.validate().is_err());
        config.pipeline.primary_key = "Name".to_string();

        config.source.view_name = Some(String::new());
        assert!(config.validate().is_err());
        config.source.view_name = None;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nope.toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(&err, Error::NotInitialized(p) if p == &path));
        assert!(err.to_string().contains("tablesync init"));
    }
}
