//! Configuration types for Stepwise.
//!
//! `StepwiseConfig` represents the `config.toml` that points the engine at
//! its definitions, its database, and the HTTP endpoints of remote task
//! units.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.stepwise/config.toml` unless another path is given. All
/// fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepwiseConfig {
    /// Directory scanned for `*.json` workflow definitions.
    #[serde(default = "default_definitions_dir")]
    pub definitions_dir: PathBuf,

    /// SQLite URL for execution history. Absent means history is kept in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// Capacity of the execution event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default)]
    pub server: ServerConfig,

    /// Remote task units reachable over HTTP.
    #[serde(default)]
    pub units: Vec<UnitEndpoint>,
}

fn default_definitions_dir() -> PathBuf {
    PathBuf::from("definitions")
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for StepwiseConfig {
    fn default() -> Self {
        Self {
            definitions_dir: default_definitions_dir(),
            database_url: None,
            event_capacity: default_event_capacity(),
            server: ServerConfig::default(),
            units: Vec::new(),
        }
    }
}

/// REST API bind address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// A task unit invoked by POSTing its input document to `url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitEndpoint {
    /// Unit name as referenced by `Resource` in definitions.
    pub name: String,
    pub url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_unit_timeout")]
    pub timeout_secs: u64,
}

fn default_unit_timeout() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = StepwiseConfig::default();
        assert_eq!(config.definitions_dir, PathBuf::from("definitions"));
        assert!(config.database_url.is_none());
        assert_eq!(config.event_capacity, 1024);
        assert_eq!(config.server.port, 3000);
        assert!(config.units.is_empty());
    }

    #[test]
    fn test_config_deserialize_with_defaults() {
        let config: StepwiseConfig = toml::from_str("").unwrap();
        assert_eq!(config.event_capacity, 1024);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_config_deserialize_with_values() {
        let toml_str = r#"
definitions_dir = "/srv/workflows"
database_url = "sqlite:///tmp/stepwise.db?mode=rwc"

[server]
port = 8080

[[units]]
name = "check-file-status"
url = "http://localhost:9000/check"

[[units]]
name = "send-report"
url = "http://localhost:9000/report"
timeout_secs = 30
"#;
        let config: StepwiseConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.definitions_dir, PathBuf::from("/srv/workflows"));
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.units.len(), 2);
        assert_eq!(config.units[0].timeout_secs, 300);
        assert_eq!(config.units[1].timeout_secs, 30);
    }
}
