//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::history::tree::TreeParams;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// History tree configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_block_size")]
    pub block_size: usize,

    #[serde(default = "default_max_children")]
    pub max_children: usize,

    #[serde(default = "default_provider_version")]
    pub provider_version: u32,

    #[serde(default = "default_read_cache_size")]
    pub read_cache_size: usize,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("tracehist").to_string_lossy().to_string())
        .unwrap_or_else(|| "./tracehist_data".to_string())
}

fn default_block_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_children() -> usize {
    50
}

fn default_provider_version() -> u32 {
    0
}

fn default_read_cache_size() -> usize {
    256
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            block_size: default_block_size(),
            max_children: default_max_children(),
            provider_version: default_provider_version(),
            read_cache_size: default_read_cache_size(),
        }
    }
}

impl HistoryConfig {
    /// Tree construction parameters for this configuration
    pub fn tree_params(&self) -> TreeParams {
        TreeParams {
            block_size: self.block_size,
            max_children: self.max_children,
            provider_version: self.provider_version,
            cache_slots: self.read_cache_size,
        }
    }
}

/// Checkpoint index configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_interval")]
    pub interval_events: u64,
}

fn default_checkpoint_interval() -> u64 {
    1000
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval_events: default_checkpoint_interval(),
        }
    }
}

/// Construction pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    10_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        // Try default config locations
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tracehist").join("config.toml")),
            Some(PathBuf::from("/etc/tracehist/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // History overrides
        if let Ok(data_dir) = std::env::var("TRACEHIST_DATA_DIR") {
            self.history.data_dir = data_dir;
        }
        if let Ok(block_size) = std::env::var("TRACEHIST_BLOCK_SIZE") {
            if let Ok(b) = block_size.parse() {
                self.history.block_size = b;
            }
        }
        if let Ok(max_children) = std::env::var("TRACEHIST_MAX_CHILDREN") {
            if let Ok(m) = max_children.parse() {
                self.history.max_children = m;
            }
        }

        // Checkpoint overrides
        if let Ok(interval) = std::env::var("TRACEHIST_CHECKPOINT_INTERVAL") {
            if let Ok(i) = interval.parse() {
                self.checkpoint.interval_events = i;
            }
        }

        // Pipeline overrides
        if let Ok(capacity) = std::env::var("TRACEHIST_QUEUE_CAPACITY") {
            if let Ok(c) = capacity.parse() {
                self.pipeline.queue_capacity = c;
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("TRACEHIST_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TRACEHIST_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            history: HistoryConfig::default(),
            checkpoint: CheckpointConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# tracehist Configuration
#
# Environment variables override these settings:
# - TRACEHIST_DATA_DIR
# - TRACEHIST_BLOCK_SIZE
# - TRACEHIST_MAX_CHILDREN
# - TRACEHIST_CHECKPOINT_INTERVAL
# - TRACEHIST_QUEUE_CAPACITY
# - TRACEHIST_LOG_LEVEL
# - TRACEHIST_LOG_FORMAT

[history]
# Directory for history tree files
data_dir = "~/.local/share/tracehist"

# Size of one tree node block (bytes)
block_size = 65536

# Maximum children per core node
max_children = 50

# Version of the event provider; a mismatch on open forces a rebuild
provider_version = 0

# Slots in the node read cache
read_cache_size = 256

[checkpoint]
# Drop a checkpoint every N events
interval_events = 1000

[pipeline]
# Bounded insert queue between producer and writer thread
queue_capacity = 10000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/tracehist/tracehist.log"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.history.block_size, 64 * 1024);
        assert_eq!(config.history.max_children, 50);
        assert_eq!(config.checkpoint.interval_events, 1000);
        assert_eq!(config.pipeline.queue_capacity, 10_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_generated_config_parses_to_defaults() {
        let parsed: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(parsed.history.block_size, Config::default().history.block_size);
        assert_eq!(parsed.checkpoint.interval_events, 1000);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            "[history]\nblock_size = 4096\n\n[logging]\nlevel = \"debug\"\n"
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.history.block_size, 4096);
        assert_eq!(config.logging.level, "debug");
        // Untouched sections keep their defaults
        assert_eq!(config.history.max_children, 50);
        assert_eq!(config.pipeline.queue_capacity, 10_000);
    }

    #[test]
    fn test_load_bad_toml_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not [valid toml").unwrap();
        assert!(matches!(
            Config::load(&path).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }

    #[test]
    fn test_tree_params_mapping() {
        let mut config = Config::default();
        config.history.block_size = 1234;
        config.history.provider_version = 7;
        let params = config.history.tree_params();
        assert_eq!(params.block_size, 1234);
        assert_eq!(params.provider_version, 7);
        assert_eq!(params.cache_slots, 256);
    }
}
