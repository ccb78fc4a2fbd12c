//! TOML Configuration File Support
//!
//! Configuration for the arena server, read from
//! `$XDG_CONFIG_HOME/model-arena/arena.toml` (typically
//! `~/.config/model-arena/arena.toml`).
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8001
//!
//! [backend]
//! host = "localhost"
//! port = 11434
//! connect_timeout_secs = 5
//!
//! [streaming]
//! poll_interval_ms = 100
//! channel_capacity = 256
//! idle_timeout_secs = 120
//! # Unset means no per-request limit
//! max_models = 16
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendConfig;
use crate::merge::MergeConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    Io {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// =============================================================================
// Configuration Structures
// =============================================================================

/// `[server]` section: where the HTTP surface listens
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Bind host
    pub host: String,
    /// Bind port; 0 picks an ephemeral port
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8001,
        }
    }
}

/// `[backend]` section: the Ollama server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    /// Ollama host
    pub host: String,
    /// Ollama port
    pub port: u16,
    /// TCP connect timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for BackendSection {
    fn default() -> Self {
        let defaults = BackendConfig::default();
        Self {
            host: defaults.host,
            port: defaults.port,
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
        }
    }
}

/// `[streaming]` section: fan-in tuning
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSection {
    /// Merge loop poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Shared event channel capacity
    pub channel_capacity: usize,
    /// Fail a branch after this many silent seconds (unset = never)
    pub idle_timeout_secs: Option<u64>,
    /// Maximum models per request (unset = no limit)
    pub max_models: Option<usize>,
}

impl Default for StreamingSection {
    fn default() -> Self {
        let defaults = MergeConfig::default();
        Self {
            poll_interval_ms: u64::try_from(defaults.poll_interval.as_millis()).unwrap_or(100),
            channel_capacity: defaults.channel_capacity,
            idle_timeout_secs: defaults.idle_timeout.map(|d| d.as_secs()),
            max_models: defaults.max_models,
        }
    }
}

/// Complete arena configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// HTTP surface
    pub server: ServerSection,
    /// Model backend
    pub backend: BackendSection,
    /// Fan-in tuning
    pub streaming: StreamingSection,
}

impl ArenaConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid("server.host must not be empty".into()));
        }
        if self.backend.host.trim().is_empty() {
            return Err(ConfigError::Invalid("backend.host must not be empty".into()));
        }
        if self.backend.port == 0 {
            return Err(ConfigError::Invalid("backend.port must not be 0".into()));
        }
        if self.streaming.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "streaming.poll_interval_ms must be at least 1".into(),
            ));
        }
        if self.streaming.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "streaming.channel_capacity must be at least 1".into(),
            ));
        }
        if self.streaming.max_models == Some(0) {
            return Err(ConfigError::Invalid(
                "streaming.max_models must be at least 1 when set".into(),
            ));
        }
        if self.streaming.idle_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "streaming.idle_timeout_secs must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }

    /// Apply environment variables from the process environment
    ///
    /// - `ARENA_HOST`: bind host
    /// - `ARENA_PORT`: bind port
    /// - `OLLAMA_HOST`: backend host, `host:port`, or URL
    /// - `OLLAMA_PORT`: backend port
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply environment-style overrides from an arbitrary lookup
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("ARENA_HOST").filter(|h| !h.trim().is_empty()) {
            self.server.host = host;
        }
        if let Some(port) = lookup("ARENA_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }

        let mut backend = self.backend_config();
        backend.apply_env_with(&lookup);
        self.backend.host = backend.host;
        self.backend.port = backend.port;
    }

    /// Backend connection settings
    #[must_use]
    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            host: self.backend.host.clone(),
            port: self.backend.port,
            connect_timeout: Duration::from_secs(self.backend.connect_timeout_secs),
        }
    }

    /// Fan-in settings
    #[must_use]
    pub fn merge_config(&self) -> MergeConfig {
        MergeConfig {
            poll_interval: Duration::from_millis(self.streaming.poll_interval_ms),
            channel_capacity: self.streaming.channel_capacity,
            idle_timeout: self.streaming.idle_timeout_secs.map(Duration::from_secs),
            max_models: self.streaming.max_models,
        }
    }

    /// `host:port` the server binds to
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("model-arena").join("arena.toml"))
}

/// Load configuration from the default path plus environment
///
/// A missing config file is not an error.
pub fn load_config() -> Result<ArenaConfig, ConfigError> {
    load_config_from_path(default_config_path().as_deref())
}

/// Load configuration from a specific file plus environment
///
/// With `None`, or a path that does not exist, only defaults and environment
/// variables are used.
pub fn load_config_from_path(path: Option<&Path>) -> Result<ArenaConfig, ConfigError> {
    let mut config = read_config_file(path)?;
    config.apply_env();
    config.validate()?;
    Ok(config)
}

/// Read a config file without consulting the environment
pub fn read_config_file(path: Option<&Path>) -> Result<ArenaConfig, ConfigError> {
    match path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let config = ArenaConfig::from_toml_str(&content)?;
            tracing::info!(path = %path.display(), "Loaded configuration from file");
            Ok(config)
        }
        Some(path) => {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            Ok(ArenaConfig::default())
        }
        None => Ok(ArenaConfig::default()),
    }
}

// =============================================================================
// CLI Overrides
// =============================================================================

/// Values supplied on the command line; applied after everything else
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Bind host
    pub host: Option<String>,
    /// Bind port
    pub port: Option<u16>,
    /// Backend `host`, `host:port`, or URL
    pub backend: Option<String>,
}

impl ConfigOverrides {
    /// Empty overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the bind host
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Override the bind port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Override the backend address
    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Apply to a loaded configuration
    pub fn apply(&self, config: &mut ArenaConfig) {
        if let Some(ref host) = self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ref backend) = self.backend {
            let (host, port) = crate::backend::split_host_port(backend);
            if !host.is_empty() {
                config.backend.host = host;
            }
            if let Some(port) = port {
                config.backend.port = port;
            }
        }
    }
}
