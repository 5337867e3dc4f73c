//! Configuration system for the chunkvault CLI.

use chunkvault_core::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// chunkvault configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Storage locations
    pub storage: StorageConfig,
    /// Pipeline tuning
    pub pipeline: PipelineConfig,
    /// Backup defaults
    pub backup: BackupConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding chunk blobs
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,
    /// Directory holding manifests
    #[serde(default = "default_manifest_dir")]
    pub manifest_dir: PathBuf,
}

/// Backup defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Owner recorded in new manifests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// MIME type used when none is given
    #[serde(default = "default_mime_type")]
    pub default_mime_type: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("chunkvault")
}

fn default_blob_dir() -> PathBuf {
    data_root().join("blobs")
}

fn default_manifest_dir() -> PathBuf {
    data_root().join("manifests")
}

fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_dir: default_blob_dir(),
            manifest_dir: default_manifest_dir(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            owner_id: None,
            default_mime_type: default_mime_type(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("chunkvault/config.toml")
    }

    /// Load config from `path`, or create a default one there if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.pipeline.validate()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.storage.blob_dir == self.storage.manifest_dir {
            anyhow::bail!(
                "Blob and manifest directories must differ: {}",
                self.storage.blob_dir.display()
            );
        }

        if self.backup.default_mime_type.trim().is_empty() {
            anyhow::bail!("Default MIME type must not be empty");
        }

        if self.backup.owner_id.as_deref().is_some_and(|o| o.trim().is_empty()) {
            anyhow::bail!("Owner id must not be blank");
        }

        Ok(())
    }
}
