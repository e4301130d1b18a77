//! Client configuration.
//!
//! Supports configuration from:
//! - code, through the builder methods on [`ClientConfig`]
//! - a TOML file, with `${VAR}` or `${VAR:-default}` substitution
//! - environment variables with the `MQWIRE__` prefix, e.g.
//!   `MQWIRE__ADDRESS=broker:1883` or `MQWIRE__ACK_TIMEOUT_MS=0`
//!
//! ```toml
//! address = "${MQTT_HOST:-localhost}:1883"
//! client_id = "sensor-1"
//! keep_alive = 30
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use mqwire_core::ProtocolVersion;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_ADDRESS: &str = "localhost:1883";
pub const DEFAULT_KEEP_ALIVE: u16 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Validation(format!("substitution pattern: {}", e)))?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(&caps[1]).unwrap_or_else(|_| default.to_string())
        })
        .into_owned())
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Broker address (host:port), used by the TCP transport.
    pub address: String,
    /// Client identifier.
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep-alive interval in seconds (0 = disabled).
    pub keep_alive: u16,
    pub clean_session: bool,
    /// Protocol level: 3 for MQTT 3.1, 4 for MQTT 3.1.1.
    pub protocol_version: u8,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// How long to wait for an acknowledgment, in milliseconds (0 = forever).
    pub ack_timeout_ms: u64,
    /// Capacity of the handle to event loop command channel.
    pub channel_capacity: usize,
    /// Log level: error, warn, info, debug, trace.
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            client_id: String::new(),
            username: None,
            password: None,
            keep_alive: DEFAULT_KEEP_ALIVE,
            clean_session: true,
            protocol_version: 4,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            log_level: "info".to_string(),
        }
    }
}

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Invalid configuration value.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl ClientConfig {
    /// Create a new config with the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error; defaults and `MQWIRE__*` variables
    /// still apply.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let defaults = ClientConfig::default();
        let mut builder = config::Config::builder()
            .set_default("address", defaults.address)?
            .set_default("client_id", defaults.client_id)?
            .set_default("keep_alive", defaults.keep_alive as i64)?
            .set_default("clean_session", defaults.clean_session)?
            .set_default("protocol_version", defaults.protocol_version as i64)?
            .set_default("connect_timeout_secs", defaults.connect_timeout_secs as i64)?
            .set_default("ack_timeout_ms", defaults.ack_timeout_ms as i64)?
            .set_default("channel_capacity", defaults.channel_capacity as i64)?
            .set_default("log_level", defaults.log_level)?;

        let path = path.as_ref();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let substituted = substitute_env_vars(&content)?;
            builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("MQWIRE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: ClientConfig = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let substituted = substitute_env_vars(content)?;
        let config: ClientConfig = toml::from_str(&substituted)
            .map_err(|e| ConfigError::Validation(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ProtocolVersion::from_level(self.protocol_version)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        if self.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "channel_capacity must be at least 1".into(),
            ));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(ConfigError::Validation(
                "password requires a username".into(),
            ));
        }
        Ok(())
    }

    /// Protocol revision to announce in CONNECT.
    pub fn protocol(&self) -> ProtocolVersion {
        match self.protocol_version {
            3 => ProtocolVersion::V31,
            _ => ProtocolVersion::V311,
        }
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Acknowledgment timeout, `None` when disabled.
    pub fn ack_timeout_duration(&self) -> Option<Duration> {
        (self.ack_timeout_ms > 0).then(|| Duration::from_millis(self.ack_timeout_ms))
    }

    /// Set the client ID.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    /// Set username and password.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set keep-alive interval in seconds.
    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    /// Set clean session flag.
    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Use MQTT 3.1 ("MQIsdp") instead of 3.1.1.
    pub fn mqtt31(mut self) -> Self {
        self.protocol_version = 3;
        self
    }

    /// Set connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs();
        self
    }

    /// Set acknowledgment timeout. `Duration::ZERO` waits forever.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.protocol(), ProtocolVersion::V311);
        assert_eq!(config.ack_timeout_duration(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            address = "broker.local:1884"
            client_id = "sensor-1"
            username = "alice"
            password = "secret"
            keep_alive = 15
            clean_session = false
            protocol_version = 3
            ack_timeout_ms = 0
        "#;
        let config = ClientConfig::parse(toml).unwrap();
        assert_eq!(config.address, "broker.local:1884");
        assert_eq!(config.client_id, "sensor-1");
        assert_eq!(config.username.as_deref(), Some("alice"));
        assert_eq!(config.keep_alive, 15);
        assert!(!config.clean_session);
        assert_eq!(config.protocol(), ProtocolVersion::V31);
        assert_eq!(config.ack_timeout_duration(), None);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_parse_rejects_bad_version() {
        let result = ClientConfig::parse("protocol_version = 5");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_parse_rejects_password_without_username() {
        let result = ClientConfig::parse(r#"password = "secret""#);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::from(std::io::Error::other("disk gone"));
        assert!(matches!(err, ConfigError::Io(_)));
        assert_eq!(err.to_string(), "IO error: disk gone");
        assert_eq!(
            ConfigError::Validation("bad".into()).to_string(),
            "Validation error: bad"
        );
    }

    #[test]
    fn test_env_var_substitution_with_default() {
        let content = r#"address = "${MQWIRE_TEST_UNSET_HOST:-127.0.0.1}:1883""#;
        let substituted = substitute_env_vars(content).unwrap();
        assert_eq!(substituted, r#"address = "127.0.0.1:1883""#);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = ClientConfig::load("/nonexistent/mqwire.toml").unwrap();
        assert_eq!(config.keep_alive, DEFAULT_KEEP_ALIVE);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_load_file() {
        let path = std::env::temp_dir().join(format!("mqwire-test-{}.toml", std::process::id()));
        std::fs::write(&path, "client_id = \"from-file\"\nkeep_alive = 5\n").unwrap();
        let config = ClientConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.client_id, "from-file");
        assert_eq!(config.keep_alive, 5);
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::new("10.0.0.1:1883")
            .client_id("c")
            .credentials("u", "p")
            .mqtt31()
            .ack_timeout(Duration::ZERO);
        assert_eq!(config.address, "10.0.0.1:1883");
        assert_eq!(config.protocol_version, 3);
        assert_eq!(config.ack_timeout_duration(), None);
        assert!(config.validate().is_ok());
    }
}
