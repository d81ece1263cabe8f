use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::language::{CompileConfig, FileExtension, Language, RunConfig};
use crate::terminal::TerminalPolicy;
use crate::types::ResourceLimits;
use crate::workspace::UploadPolicy;

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../codecell.example.toml");

/// Default maximum source length accepted by the validator (bytes)
pub const DEFAULT_MAX_SOURCE_LEN: usize = 50_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid characters in file extension")]
    InvalidFileExtChars,

    #[error("failed to read config file at {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("language '{0}' not found in configuration")]
    LanguageNotFound(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for Codecell
///
/// Loaded once at startup and never mutated afterwards; many concurrent
/// executions reference the same config without locking.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the docker binary (uses PATH if not specified).
    #[serde(default)]
    pub docker_path: Option<PathBuf>,

    /// Default resource limits applied to all executions.
    /// Overridden by per-language limits and per-request limits.
    #[serde(default)]
    pub default_limits: ResourceLimits,

    /// Maximum source length accepted by the validator, in bytes
    #[serde(default = "default_max_source_len")]
    pub max_source_len: usize,

    /// Upload acceptance rules for files attached to execution requests
    #[serde(default)]
    pub upload: UploadPolicy,

    /// Terminal session policy (allowed commands, timeouts, output cap)
    #[serde(default)]
    pub terminal: TerminalPolicy,

    /// Interval between idle-session cleanup sweeps, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Language configurations keyed by language ID
    #[serde(default)]
    pub languages: HashMap<String, Language>,
}

impl Config {
    /// Create a new config with embedded default languages
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            docker_path: None,
            default_limits: ResourceLimits::default(),
            max_source_len: DEFAULT_MAX_SOURCE_LEN,
            upload: UploadPolicy::default(),
            terminal: TerminalPolicy::default(),
            sweep_interval_secs: default_sweep_interval_secs(),
            languages: HashMap::new(),
        }
    }

    /// Get a language by ID
    pub fn get_language(&self, id: &str) -> Result<&Language, ConfigError> {
        self.languages
            .get(id)
            .ok_or_else(|| ConfigError::LanguageNotFound(id.to_string()))
    }

    /// Get the path to the docker binary
    pub fn docker_binary(&self) -> PathBuf {
        self.docker_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("docker"))
    }

    /// Merge resource limits with defaults
    pub fn effective_limits(&self, overrides: Option<&ResourceLimits>) -> ResourceLimits {
        match overrides {
            Some(limits) => self.default_limits.with_overrides(limits),
            None => self.default_limits.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_max_source_len() -> usize {
    DEFAULT_MAX_SOURCE_LEN
}

fn default_sweep_interval_secs() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_language_found() {
        let config = Config::default();
        let result = config.get_language("python3");
        assert!(result.is_ok());
        assert_eq!(result.unwrap().name, "Python 3");
    }

    #[test]
    fn get_language_not_found() {
        let config = Config::default();
        let result = config.get_language("nonexistent");
        match result {
            Err(ConfigError::LanguageNotFound(name)) => assert_eq!(name, "nonexistent"),
            _ => panic!("expected LanguageNotFound error"),
        }
    }

    #[test]
    fn get_language_empty_config() {
        let config = Config::empty();
        assert!(config.get_language("python3").is_err());
    }

    #[test]
    fn docker_binary_default() {
        let config = Config::empty();
        assert_eq!(config.docker_binary(), PathBuf::from("docker"));
    }

    #[test]
    fn docker_binary_custom_path() {
        let config = Config {
            docker_path: Some(PathBuf::from("/usr/local/bin/docker")),
            ..Config::empty()
        };
        assert_eq!(
            config.docker_binary(),
            PathBuf::from("/usr/local/bin/docker")
        );
    }

    #[test]
    fn effective_limits_no_override() {
        let config = Config::default();
        let result = config.effective_limits(None);
        assert_eq!(result.wall_time_ms, config.default_limits.wall_time_ms);
        assert_eq!(result.memory_bytes, config.default_limits.memory_bytes);
    }

    #[test]
    fn effective_limits_with_override() {
        let config = Config::default();
        let overrides = ResourceLimits::none()
            .with_wall_time_ms(10_000)
            .with_memory_bytes(512 * ResourceLimits::MB);
        let result = config.effective_limits(Some(&overrides));
        assert_eq!(result.wall_time_ms, Some(10_000));
        assert_eq!(result.memory_bytes, Some(512 * ResourceLimits::MB));
    }

    #[test]
    fn effective_limits_partial_override() {
        let config = Config::default();
        let overrides = ResourceLimits::none().with_wall_time_ms(10_000);
        let result = config.effective_limits(Some(&overrides));
        assert_eq!(result.wall_time_ms, Some(10_000));
        // Memory should come from default
        assert_eq!(result.memory_bytes, config.default_limits.memory_bytes);
    }

    #[test]
    fn config_new_has_languages() {
        let config = Config::new();
        assert!(!config.languages.is_empty());
        assert!(config.languages.contains_key("python3"));
        assert!(config.languages.contains_key("cpp17"));
    }

    #[test]
    fn config_empty_has_no_languages() {
        let config = Config::empty();
        assert!(config.languages.is_empty());
    }

    #[test]
    fn config_default_source_len() {
        let config = Config::empty();
        assert_eq!(config.max_source_len, 50_000);
    }
}
