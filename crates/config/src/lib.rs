//! NetSession Configuration Management
//!
//! Loads session options from a plain `key = value` text file.
//!
//! ```text
//! # config/netsession.txt
//! name = Lobby
//! address = 127.0.0.1
//! port = 5456
//! pollinterval = 10
//! maxclients = 0
//! outputlog = 64
//! ```
//!
//! Lines starting with `#` are comments. Unknown keys and malformed values are
//! reported with a warning and leave the default in place, so a partially
//! broken file still yields a usable configuration.

use netsession_core::{DEFAULT_PORT, LOOPBACK_ADDRESS};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the options file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/netsession.txt";

/// Errors raised while loading configuration
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Session options from netsession.txt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetConfig {
    /// Display name of this endpoint (from "name" option)
    pub name: String,
    /// Server address a client connects to (from "address" option)
    pub address: String,
    /// Listen/connect port (from "port" option, default: 5456)
    pub port: u16,
    /// Poll loop sleep in milliseconds (from "pollinterval" option, default: 10)
    pub poll_interval_ms: u64,
    /// Maximum simultaneous clients, 0 = unlimited (from "maxclients" option)
    pub max_clients: usize,
    /// Output lines kept in history (from "outputlog" option, default: 64)
    pub output_log_capacity: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            name: "NetSession".to_string(),
            address: LOOPBACK_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            poll_interval_ms: 10,
            max_clients: 0,
            output_log_capacity: 64,
        }
    }
}

impl NetConfig {
    /// Load configuration from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load configuration from [`DEFAULT_CONFIG_PATH`]
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load_from_file(DEFAULT_CONFIG_PATH)
    }

    /// Parse options file content
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for (number, line) in content.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match line.split_once('=') {
                Some((key, value)) => config.parse_option(key.trim(), value.trim()),
                None => tracing::warn!("Ignoring line {} without '=': {}", number + 1, line),
            }
        }

        config.check()?;
        Ok(config)
    }

    fn parse_option(&mut self, key: &str, value: &str) {
        match key.to_ascii_lowercase().as_str() {
            "name" => self.name = value.into(),
            "address" => {
                self.address = match value {
                    "" | "default" => LOOPBACK_ADDRESS.to_string(),
                    other => other.to_string(),
                };
            }
            "port" => match value.parse::<u16>() {
                Ok(port) if port > 0 => self.port = port,
                _ => tracing::warn!("Invalid port '{}', using {}", value, self.port),
            },
            "pollinterval" => match value.parse::<u64>() {
                Ok(ms) => self.poll_interval_ms = ms,
                Err(_) => tracing::warn!("Invalid pollinterval '{}', using {}", value, self.poll_interval_ms),
            },
            "maxclients" => match value.parse::<usize>() {
                Ok(max) => self.max_clients = max,
                Err(_) => tracing::warn!("Invalid maxclients '{}', using {}", value, self.max_clients),
            },
            "outputlog" => match value.parse::<usize>() {
                Ok(lines) => self.output_log_capacity = lines,
                Err(_) => tracing::warn!("Invalid outputlog '{}', using {}", value, self.output_log_capacity),
            },
            _ => tracing::warn!("Unknown configuration option: {}", key),
        }
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.output_log_capacity == 0 {
            return Err(ConfigError::Invalid("outputlog must keep at least one line".into()));
        }
        Ok(())
    }

    /// Poll loop sleep as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Display configuration summary
    pub fn display(&self) {
        tracing::info!("Session configuration:");
        tracing::info!("  Name: {}", self.name);
        tracing::info!("  Address: {}:{}", self.address, self.port);
        tracing::info!("  Poll interval: {} ms", self.poll_interval_ms);
        if self.max_clients == 0 {
            tracing::info!("  Max clients: unlimited");
        } else {
            tracing::info!("  Max clients: {}", self.max_clients);
        }
        tracing::info!("  Output log: {} lines", self.output_log_capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = NetConfig::default();
        assert_eq!(config.port, 5456);
        assert_eq!(config.address, "127.0.0.1");
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.max_clients, 0);
    }

    #[test]
    fn test_parse_simple_config() {
        let config_text = r#"
# comment
name = Test Server
port = 9999
MaxClients = 50
pollinterval = 5
"#;
        let config = NetConfig::parse(config_text).unwrap();
        assert_eq!(config.name, "Test Server");
        assert_eq!(config.port, 9999);
        assert_eq!(config.max_clients, 50);
        assert_eq!(config.poll_interval_ms, 5);
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let config = NetConfig::parse("port = http\nport = 0\nmaxclients = -3\nbogus = 1\nnoequals").unwrap();
        assert_eq!(config, NetConfig::default());
    }

    #[test]
    fn test_default_address_keyword() {
        let config = NetConfig::parse("address = default").unwrap();
        assert_eq!(config.address, LOOPBACK_ADDRESS);
        let config = NetConfig::parse("address = 10.1.2.3").unwrap();
        assert_eq!(config.address, "10.1.2.3");
    }

    #[test]
    fn test_zero_output_log_rejected() {
        assert!(matches!(
            NetConfig::parse("outputlog = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = Lobby").unwrap();
        writeln!(file, "port = 6000").unwrap();
        file.flush().unwrap();

        let config = NetConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.name, "Lobby");
        assert_eq!(config.port, 6000);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = NetConfig::load_from_file(dir.path().join("absent.txt")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
