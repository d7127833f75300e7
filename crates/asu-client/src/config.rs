//! Client configuration with YAML support

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::poll::PollPolicy;

/// Public OpenWrt sysupgrade server
pub const DEFAULT_BASE_URL: &str = "https://sysupgrade.openwrt.org/";

/// Delay between build status requests unless configured otherwise
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// ASU client configuration
///
/// Can be loaded from YAML or JSON, or constructed programmatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Connection settings
    pub connection: ConnectionConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Build status polling
    #[serde(default)]
    pub polling: PollingConfig,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Base URL of the build service
    pub base_url: String,

    /// User-Agent header (default: asu-client/<version>)
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_user_agent() -> String {
    concat!("asu-client/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// General request timeout in milliseconds (default: 5 minutes)
    ///
    /// Applies to downloads as a whole, so large images may need more.
    #[serde(default = "default_request_timeout")]
    pub request_ms: u64,

    /// Connect timeout in milliseconds (default: 10s)
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request_ms: default_request_timeout(),
            connect_ms: default_connect_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    300_000 // 5 minutes
}

fn default_connect_timeout() -> u64 {
    10_000 // 10 seconds
}

/// Build status polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Interval between status requests in milliseconds (default: 5s)
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,

    /// Give up after this many status requests
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Give up after this many milliseconds
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            max_attempts: None,
            deadline_ms: None,
        }
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl ClientConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Serialize configuration to YAML
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Create a new builder
    pub fn builder(base_url: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(base_url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.request_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.connect_ms)
    }

    /// Poll policy described by the `polling` section
    pub fn poll_policy(&self) -> PollPolicy {
        let mut policy = PollPolicy::unbounded(Duration::from_millis(self.polling.interval_ms));
        if let Some(attempts) = self.polling.max_attempts {
            policy = policy.with_max_attempts(attempts);
        }
        if let Some(ms) = self.polling.deadline_ms {
            policy = policy.with_deadline(Duration::from_millis(ms));
        }
        policy
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfigBuilder::new(DEFAULT_BASE_URL).build()
    }
}

/// Builder for ClientConfig
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder with the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            config: ClientConfig {
                connection: ConnectionConfig {
                    base_url: base_url.into(),
                    user_agent: default_user_agent(),
                },
                timeouts: TimeoutsConfig::default(),
                polling: PollingConfig::default(),
            },
        }
    }

    /// Set the User-Agent header
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.connection.user_agent = agent.into();
        self
    }

    /// Set request timeout in milliseconds
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeouts.request_ms = ms;
        self
    }

    /// Set connect timeout in milliseconds
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeouts.connect_ms = ms;
        self
    }

    /// Set build status poll interval in milliseconds
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.polling.interval_ms = ms;
        self
    }

    /// Bound the number of status requests
    pub fn max_poll_attempts(mut self, attempts: u32) -> Self {
        self.config.polling.max_attempts = Some(attempts);
        self
    }

    /// Bound the total time spent polling
    pub fn poll_deadline_ms(mut self, ms: u64) -> Self {
        self.config.polling.deadline_ms = Some(ms);
        self
    }

    /// Build the configuration
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
connection:
  base_url: "http://localhost:8000/"

timeouts:
  request_ms: 60000

polling:
  interval_ms: 250
  max_attempts: 40
"#;

        let config = ClientConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.connection.base_url, "http://localhost:8000/");
        assert!(config.connection.user_agent.starts_with("asu-client/"));
        assert_eq!(config.timeouts.request_ms, 60000);
        assert_eq!(config.timeouts.connect_ms, 10_000);
        assert_eq!(config.polling.interval_ms, 250);
        assert_eq!(config.polling.max_attempts, Some(40));
        assert_eq!(config.polling.deadline_ms, None);
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connection.base_url, DEFAULT_BASE_URL);
        let policy = config.poll_policy();
        assert_eq!(policy.interval, Duration::from_secs(5));
        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.deadline, None);
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::builder("http://localhost:8000/")
            .user_agent("test-agent/1.0")
            .request_timeout_ms(1_000)
            .poll_interval_ms(10)
            .max_poll_attempts(3)
            .poll_deadline_ms(2_000)
            .build();

        assert_eq!(config.connection.user_agent, "test-agent/1.0");
        assert_eq!(config.request_timeout(), Duration::from_secs(1));
        let policy = config.poll_policy();
        assert_eq!(policy.interval, Duration::from_millis(10));
        assert_eq!(policy.max_attempts, Some(3));
        assert_eq!(policy.deadline, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_to_yaml() {
        let config = ClientConfig::builder("http://localhost:8000/").build();

        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("base_url"));
        assert!(yaml.contains("http://localhost:8000/"));

        let back = ClientConfig::from_yaml(&yaml).unwrap();
        assert_eq!(back.polling.interval_ms, 5_000);
    }

    #[test]
    fn test_missing_base_url() {
        tokio_test::assert_err!(ClientConfig::from_yaml("timeouts:\n  request_ms: 1\n"));
        tokio_test::assert_ok!(ClientConfig::from_json(
            r#"{"connection": {"base_url": "http://localhost:8000/"}}"#
        ));
    }
}
