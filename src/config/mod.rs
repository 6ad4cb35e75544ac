use crate::error::{Result, RoteeError};
use crate::logs::ErrorPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One kilobyte in bytes
pub const KB: u64 = 1024;
/// One megabyte in bytes
pub const MB: u64 = KB * KB;
/// One gigabyte in bytes
pub const GB: u64 = MB * KB;

/// Default maximum log file size before rotation (50 MB)
pub const DEFAULT_MAX_SIZE: u64 = 50 * MB;
/// Default pending-buffer size before a flush is triggered (8 KB)
pub const DEFAULT_FLUSH_THRESHOLD: u64 = 8 * KB;
/// Base name of the log folder, appended when the user path omits it
pub const LOG_FOLDER_BASE_NAME: &str = "logs";
/// Timestamp format for rotated file names
pub const FILE_DATE_FORMAT: &str = "%Y_%m_%dT%Hh%Mm%Ss";

/// Environment variable that enables file logging ("1", "true", "yes")
pub const ENV_LOG_TO_FILE: &str = "LOG_TO_FILE";
/// Environment variable that selects the base log folder
pub const ENV_LOG_FOLDER_NAME: &str = "LOG_FOLDER_NAME";
/// Environment variable that overrides the maximum file size; small
/// values are megabyte counts, large values raw bytes
pub const ENV_LOG_MAX_SIZE: &str = "LOG_MAX_SIZE";

/// Logger configuration with all settings for mirroring streams to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Root folder for all log output; defaults to `logs/` under the
    /// current working directory when unset
    #[serde(default)]
    pub base_folder: Option<PathBuf>,

    /// Maximum file size in bytes before rotation
    #[serde(default = "default_max_size")]
    pub max_size_bytes: u64,

    /// Pending-buffer size in bytes that triggers a flush
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold_bytes: u64,

    /// Whether stdout and stderr share one writer and one file
    #[serde(default = "default_merge_streams")]
    pub merge_streams: bool,

    /// Whether anything is written to disk at all
    #[serde(default = "default_write_to_file")]
    pub write_to_file: bool,

    /// Start fresh log files instead of continuing the day's newest one
    #[serde(default)]
    pub override_existing: bool,

    /// Tag lines forwarded from stdout with `[STDOUT] ` in the log file
    #[serde(default = "default_prefix")]
    pub prefix_stdout: bool,

    /// Tag lines forwarded from stderr with `[STDERR] ` in the log file
    #[serde(default = "default_prefix")]
    pub prefix_stderr: bool,

    /// Behavior when the mirrored terminal stream hits a broken pipe
    #[serde(default)]
    pub error_policy: ErrorPolicy,
}

// Default value functions for serde
fn default_max_size() -> u64 {
    DEFAULT_MAX_SIZE
}

fn default_flush_threshold() -> u64 {
    DEFAULT_FLUSH_THRESHOLD
}

fn default_merge_streams() -> bool {
    true
}

fn default_write_to_file() -> bool {
    true
}

fn default_prefix() -> bool {
    true
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            base_folder: None,
            max_size_bytes: DEFAULT_MAX_SIZE,
            flush_threshold_bytes: DEFAULT_FLUSH_THRESHOLD,
            merge_streams: default_merge_streams(),
            write_to_file: default_write_to_file(),
            override_existing: false,
            prefix_stdout: default_prefix(),
            prefix_stderr: default_prefix(),
            error_policy: ErrorPolicy::default(),
        }
    }
}

impl LoggerConfig {
    /// Load a configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RoteeError::Config(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        if extension != "toml" {
            return Err(RoteeError::InvalidConfig(format!(
                "Unsupported file format: {}. Use .toml",
                extension
            )));
        }

        let config: LoggerConfig = toml::from_str(&contents)
            .map_err(|e| RoteeError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides on top of the current values
    pub fn apply_env(&mut self) {
        if let Ok(value) = std::env::var(ENV_LOG_TO_FILE) {
            self.write_to_file = matches!(value.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(value) = std::env::var(ENV_LOG_FOLDER_NAME) {
            if !value.is_empty() {
                self.base_folder = Some(PathBuf::from(value));
            }
        }
        if let Ok(value) = std::env::var(ENV_LOG_MAX_SIZE) {
            if let Ok(size) = value.parse::<u64>() {
                // Same coercion as the setter: small values are MB counts
                self.max_size_bytes = coerce_max_size(size);
            }
        }
    }

    /// Set the maximum file size from a megabyte count
    ///
    /// Values below one megabyte are treated as a count of megabytes,
    /// larger values as raw bytes. Zero falls back to the default.
    pub fn set_max_size_mb(&mut self, value: u64) {
        self.max_size_bytes = coerce_max_size(value);
    }

    /// Set the flush threshold from a kilobyte count
    ///
    /// Values below one kilobyte are treated as a count of kilobytes,
    /// larger values as raw bytes. Zero falls back to the default.
    pub fn set_flush_threshold_kb(&mut self, value: u64) {
        self.flush_threshold_bytes = coerce_flush_threshold(value);
    }

    /// The folder used when no base folder is configured
    pub fn default_folder() -> PathBuf {
        PathBuf::from(LOG_FOLDER_BASE_NAME)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_size_bytes == 0 {
            return Err(RoteeError::Config(
                "max_size_bytes must be greater than zero".to_string(),
            ));
        }

        if self.flush_threshold_bytes == 0 {
            return Err(RoteeError::Config(
                "flush_threshold_bytes must be greater than zero".to_string(),
            ));
        }

        if let Some(ref folder) = self.base_folder {
            if folder.as_os_str().len() > 255 {
                return Err(RoteeError::Config(format!(
                    "Base folder path too long: {}",
                    folder.display()
                )));
            }
        }

        Ok(())
    }
}

/// Coerce a user-provided max size: small values are megabyte counts
pub fn coerce_max_size(value: u64) -> u64 {
    if value == 0 {
        return DEFAULT_MAX_SIZE;
    }
    if value < MB {
        value * MB
    } else {
        value
    }
}

/// Coerce a user-provided flush threshold: small values are kilobyte counts
pub fn coerce_flush_threshold(value: u64) -> u64 {
    if value == 0 {
        return DEFAULT_FLUSH_THRESHOLD;
    }
    if value < KB {
        value * KB
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggerConfig::default();
        assert_eq!(config.max_size_bytes, DEFAULT_MAX_SIZE);
        assert_eq!(config.flush_threshold_bytes, DEFAULT_FLUSH_THRESHOLD);
        assert!(config.merge_streams);
        assert!(config.write_to_file);
        assert!(!config.override_existing);
        assert!(config.prefix_stdout);
        assert!(config.prefix_stderr);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_coerce_max_size_mb_count() {
        // Small values are megabyte counts
        assert_eq!(coerce_max_size(50), 50 * MB);
        // Values at or above one megabyte are raw bytes
        assert_eq!(coerce_max_size(2 * GB), 2 * GB);
        // Zero falls back to the default
        assert_eq!(coerce_max_size(0), DEFAULT_MAX_SIZE);
    }

    #[test]
    fn test_coerce_flush_threshold_kb_count() {
        assert_eq!(coerce_flush_threshold(8), 8 * KB);
        assert_eq!(coerce_flush_threshold(64 * KB), 64 * KB);
        assert_eq!(coerce_flush_threshold(0), DEFAULT_FLUSH_THRESHOLD);
    }

    #[test]
    fn test_validate_rejects_zero_thresholds() {
        let mut config = LoggerConfig::default();
        config.max_size_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = LoggerConfig::default();
        config.flush_threshold_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_env_overrides() {
        std::env::set_var(ENV_LOG_TO_FILE, "no");
        std::env::set_var(ENV_LOG_FOLDER_NAME, "/tmp/env_logs");
        std::env::set_var(ENV_LOG_MAX_SIZE, "50");

        let mut config = LoggerConfig::default();
        config.apply_env();

        std::env::remove_var(ENV_LOG_TO_FILE);
        std::env::remove_var(ENV_LOG_FOLDER_NAME);
        std::env::remove_var(ENV_LOG_MAX_SIZE);

        assert!(!config.write_to_file);
        assert_eq!(config.base_folder, Some(PathBuf::from("/tmp/env_logs")));
        // A small value is a megabyte count, not a 50-byte rotation limit
        assert_eq!(config.max_size_bytes, 50 * MB);
    }

    #[test]
    fn test_parse_toml_config() {
        let contents = r#"
            max_size_bytes = 1048576
            merge_streams = false
            override_existing = true
        "#;
        let config: LoggerConfig = toml::from_str(contents).unwrap();
        assert_eq!(config.max_size_bytes, MB);
        assert!(!config.merge_streams);
        assert!(config.override_existing);
        // Unspecified fields keep their defaults
        assert_eq!(config.flush_threshold_bytes, DEFAULT_FLUSH_THRESHOLD);
    }
}
