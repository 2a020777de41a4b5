//! Configuration loading for knn-stream.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default file lives at `~/.config/knn-stream/config.toml`.
//! Environment variables use the `KNN_STREAM_` prefix and `__` between
//! nested keys, e.g. `KNN_STREAM_STREAM__COPY_CHUNK_SIZE=4096`.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::encoding::Metric;
use crate::error::ConfigError;

/// Default size of the transient managed buffer used per transfer.
pub const DEFAULT_COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Default number of transient references a local runtime frame may hold.
pub const DEFAULT_LOCAL_REF_CAPACITY: usize = 16;

/// Settings for the stream mediators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Bytes moved across the boundary per managed read/write call.
    #[serde(default = "default_copy_chunk_size")]
    pub copy_chunk_size: usize,
}

fn default_copy_chunk_size() -> usize {
    DEFAULT_COPY_CHUNK_SIZE
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            copy_chunk_size: default_copy_chunk_size(),
        }
    }
}

/// Settings for the in-process managed runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Maximum live transient references per attached call.
    #[serde(default = "default_local_ref_capacity")]
    pub local_ref_capacity: usize,
}

fn default_local_ref_capacity() -> usize {
    DEFAULT_LOCAL_REF_CAPACITY
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            local_ref_capacity: default_local_ref_capacity(),
        }
    }
}

/// Settings used when storing indexes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexSettings {
    /// Omit the vector payload and replay vectors from the managed side on load.
    #[serde(default)]
    pub external_vectors: bool,

    /// Metric used for newly built indexes.
    #[serde(default)]
    pub metric: Metric,
}

/// Main settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub stream: StreamSettings,

    #[serde(default)]
    pub runtime: RuntimeSettings,

    #[serde(default)]
    pub index: IndexSettings,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            stream: StreamSettings::default(),
            runtime: RuntimeSettings::default(),
            index: IndexSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/knn-stream/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (KNN_STREAM_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, ConfigError> {
        let config_dir = ProjectDirs::from("", "", "knn-stream")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())?
            .set_default("stream.copy_chunk_size", default_copy_chunk_size() as i64)?
            .set_default(
                "runtime.local_ref_capacity",
                default_local_ref_capacity() as i64,
            )?
            .set_default("index.external_vectors", false)?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("KNN_STREAM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.copy_chunk_size == 0 {
            return Err(ConfigError::Invalid {
                key: "stream.copy_chunk_size",
                reason: "must be > 0".to_string(),
            });
        }
        if self.stream.copy_chunk_size > i32::MAX as usize {
            return Err(ConfigError::Invalid {
                key: "stream.copy_chunk_size",
                reason: format!(
                    "must fit a managed array length, got {}",
                    self.stream.copy_chunk_size
                ),
            });
        }
        if self.runtime.local_ref_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "runtime.local_ref_capacity",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.stream.copy_chunk_size, 64 * 1024);
        assert_eq!(settings.runtime.local_ref_capacity, 16);
        assert!(!settings.index.external_vectors);
        assert_eq!(settings.index.metric, Metric::L2);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "log_level = \"debug\"\n[stream]\ncopy_chunk_size = 128\n\
             [index]\nexternal_vectors = true\nmetric = \"inner_product\""
        )
        .unwrap();

        let settings = Settings::load(file.path().to_str()).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.stream.copy_chunk_size, 128);
        assert!(settings.index.external_vectors);
        assert_eq!(settings.index.metric, Metric::InnerProduct);
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());

        settings.stream.copy_chunk_size = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { key: "stream.copy_chunk_size", .. })
        ));

        settings.stream.copy_chunk_size = 16;
        settings.runtime.local_ref_capacity = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_serialization() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let decoded: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.stream.copy_chunk_size, DEFAULT_COPY_CHUNK_SIZE);
    }
}
