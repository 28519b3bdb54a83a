//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::api::ApiConfig;
use crate::client::ClientConfig;
use crate::ingest::IngestConfig;
use crate::websocket::HubConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP / WebSocket server
    #[serde(default)]
    pub server: ApiConfig,

    #[serde(default)]
    pub hub: HubConfig,

    /// Producer TCP listener
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Subscriber client (used by the CLI)
    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, for development
    #[default]
    Pretty,
    /// One JSON object per line, for production
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Invalid(format!("unknown log format: {other}"))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
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

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("msg-relay").join("config.toml")),
            Some(PathBuf::from("/etc/msg-relay/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply `RELAY_*` overrides read through `lookup`
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server overrides
        if let Some(host) = lookup("RELAY_HOST") {
            self.ingest.host = host.clone();
            self.server.host = host;
        }
        override_parsed(&lookup, "RELAY_HTTP_PORT", &mut self.server.http_port);
        if let Some(dir) = lookup("RELAY_AUDIO_DIR") {
            self.server.audio_dir = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }

        // Hub overrides
        override_parsed(&lookup, "RELAY_MAX_CONNECTIONS", &mut self.hub.max_connections);

        // Ingest overrides
        override_parsed(&lookup, "RELAY_TCP_PORT", &mut self.ingest.tcp_port);
        override_parsed(&lookup, "RELAY_MAX_FRAME_BYTES", &mut self.ingest.max_frame_bytes);

        // Client overrides
        if let Some(url) = lookup("RELAY_WS_URL") {
            self.client.url = url;
        }
        override_parsed(
            &lookup,
            "RELAY_RECONNECT_DELAY_MS",
            &mut self.client.reconnect_delay_ms,
        );
        override_parsed(
            &lookup,
            "RELAY_CONNECT_TIMEOUT_MS",
            &mut self.client.connect_timeout_ms,
        );

        // Logging overrides
        if let Some(level) = lookup("RELAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        override_parsed(&lookup, "RELAY_LOG_FORMAT", &mut self.logging.format);
    }

    /// Reject values the relay cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hub.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "hub.max_connections must be at least 1".to_string(),
            ));
        }
        if self.ingest.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid(
                "ingest.max_frame_bytes must be at least 1".to_string(),
            ));
        }
        if self.client.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "client.connect_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn override_parsed<T, F>(lookup: &F, key: &str, target: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(e) => tracing::warn!("Ignoring {}={:?}: {}", key, raw, e),
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

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# msg-relay Configuration
#
# Environment variables override these settings:
# - RELAY_HOST
# - RELAY_HTTP_PORT
# - RELAY_TCP_PORT
# - RELAY_AUDIO_DIR
# - RELAY_MAX_CONNECTIONS
# - RELAY_MAX_FRAME_BYTES
# - RELAY_WS_URL
# - RELAY_RECONNECT_DELAY_MS
# - RELAY_LOG_LEVEL
# - RELAY_LOG_FORMAT

[server]
# Host for the HTTP / WebSocket server
host = "0.0.0.0"

# Subscribers connect to ws://<host>:<http_port>/ws
http_port = 3000

# Directory served under /audio (disabled when unset)
# audio_dir = "/var/lib/msg-relay/audio"

[hub]
# Maximum concurrent subscribers
max_connections = 1000

[ingest]
# Host for the producer TCP listener
host = "0.0.0.0"

# Producers write raw JSON objects to this port
tcp_port = 8080

# Incomplete data buffered per producer before it is discarded (bytes)
max_frame_bytes = 1048576

# Socket read size (bytes)
read_buffer_size = 8192

[client]
# Relay endpoint used by `msg-relay-cli listen` and `reset`
url = "ws://127.0.0.1:3000/ws"

# Delay before reconnecting after the channel closes (ms)
reconnect_delay_ms = 3000

# Give up on a connect attempt that has not completed the handshake (ms)
connect_timeout_ms = 10000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.http_port, 3000);
        assert_eq!(config.ingest.tcp_port, 8080);
        assert_eq!(config.hub.max_connections, 1000);
        assert_eq!(config.client.reconnect_delay_ms, 3000);
        assert!(config.server.audio_dir.is_none());
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_generated_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.server.http_port, 3000);
        assert_eq!(config.ingest.tcp_port, 8080);
        assert_eq!(config.ingest.max_frame_bytes, 1024 * 1024);
        assert_eq!(config.client.url, "ws://127.0.0.1:3000/ws");
        config.validate().unwrap();
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[server]
http_port = 4000
audio_dir = "/srv/audio"

[logging]
format = "json"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.http_port, 4000);
        assert_eq!(config.server.audio_dir, Some(PathBuf::from("/srv/audio")));
        assert_eq!(config.logging.format, LogFormat::Json);
        // Untouched sections keep their defaults
        assert_eq!(config.ingest.tcp_port, 8080);
        assert_eq!(config.hub.max_connections, 1000);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            Config::load(&missing),
            Err(ConfigError::Io { .. })
        ));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[server\nhttp_port = ").unwrap();
        assert!(matches!(
            Config::load(&broken),
            Err(ConfigError::Parse { .. })
        ));

        let invalid = dir.path().join("invalid.toml");
        std::fs::write(&invalid, "[hub]\nmax_connections = 0\n").unwrap();
        assert!(matches!(
            Config::load(&invalid),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("RELAY_HOST", "127.0.0.1"),
            ("RELAY_HTTP_PORT", "3100"),
            ("RELAY_TCP_PORT", "9100"),
            ("RELAY_AUDIO_DIR", "/tmp/audio"),
            ("RELAY_MAX_CONNECTIONS", "5"),
            ("RELAY_MAX_FRAME_BYTES", "4096"),
            ("RELAY_WS_URL", "ws://relay:3100/ws"),
            ("RELAY_RECONNECT_DELAY_MS", "250"),
            ("RELAY_CONNECT_TIMEOUT_MS", "1500"),
            ("RELAY_LOG_LEVEL", "debug"),
            ("RELAY_LOG_FORMAT", "JSON"),
        ]));

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.ingest.host, "127.0.0.1");
        assert_eq!(config.server.http_port, 3100);
        assert_eq!(config.ingest.tcp_port, 9100);
        assert_eq!(config.server.audio_dir, Some(PathBuf::from("/tmp/audio")));
        assert_eq!(config.hub.max_connections, 5);
        assert_eq!(config.ingest.max_frame_bytes, 4096);
        assert_eq!(config.client.url, "ws://relay:3100/ws");
        assert_eq!(config.client.reconnect_delay_ms, 250);
        assert_eq!(config.client.connect_timeout_ms, 1500);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_unparseable_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("RELAY_HTTP_PORT", "not-a-port"),
            ("RELAY_LOG_FORMAT", "xml"),
        ]));

        assert_eq!(config.server.http_port, 3000);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_empty_audio_dir_disables_static_files() {
        let mut config = Config::default();
        config.server.audio_dir = Some(PathBuf::from("/srv/audio"));
        config.apply_overrides(lookup_from(&[("RELAY_AUDIO_DIR", "")]));
        assert!(config.server.audio_dir.is_none());
    }
}
