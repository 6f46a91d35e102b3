//! Client configuration.
//!
//! [`ClientConfig`] controls reconnection, heartbeat and timeout behaviour of
//! the real-time client. It can be built in code with the `with_*` setters or
//! loaded from a TOML file:
//!
//! ```toml
//! auto_reconnect = true
//! max_reconnect_attempts = 10
//! reconnect_delay_ms = 500        # base of the exponential backoff
//! max_reconnect_delay_ms = 30000
//! reconnect_jitter_ms = 1000
//! heartbeat_interval_ms = 30000   # 0 disables heartbeats
//! heartbeat_timeout_ms = 10000
//! connect_timeout_ms = 10000      # 0 waits indefinitely
//! request_timeout_ms = 30000
//! debug = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{FundLinkError, Result};

/// Connection-level options for the real-time client.
///
/// # Example
///
/// ```rust
/// use fund_link::ClientConfig;
///
/// let config = ClientConfig::default()
///     .with_max_reconnect_attempts(10)
///     .with_reconnect_delay_ms(500)
///     .with_heartbeat_interval_ms(15_000);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Reconnect automatically after an unplanned close.
    /// Default: true
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Retries allowed after an unplanned close before the client gives up
    /// and enters the `error` state.
    /// Default: 5
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Base delay of the exponential backoff.
    /// Default: 1000ms
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Upper bound of the backoff before jitter.
    /// Default: 30000ms
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Uniform random jitter in `[0, reconnect_jitter_ms]` added to every
    /// backoff delay. Default: 1000ms
    #[serde(default = "default_reconnect_jitter_ms")]
    pub reconnect_jitter_ms: u64,

    /// Interval between heartbeat pings while connected.
    /// Set to `0` to disable. Default: 30000ms
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Time allowed for the `pong` answering a heartbeat `ping`.
    /// Set to `0` to send pings without checking for answers. Default: 10000ms
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// Handshake timeout. Set to `0` to wait indefinitely. Default: 10000ms
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Default timeout for `send_with_response`. Default: 30000ms
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Log every raw frame sent and received.
    #[serde(default)]
    pub debug: bool,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30000
}

fn default_reconnect_jitter_ms() -> u64 {
    1000
}

fn default_heartbeat_interval_ms() -> u64 {
    30000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10000
}

fn default_connect_timeout_ms() -> u64 {
    10000
}

fn default_request_timeout_ms() -> u64 {
    30000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: default_auto_reconnect(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            reconnect_jitter_ms: default_reconnect_jitter_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            debug: false,
        }
    }
}

impl ClientConfig {
    /// Parse a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// Returns the default configuration if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            FundLinkError::ConfigurationError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_toml_str(&contents)
    }

    /// Reject combinations the connection task cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_delay_ms == 0 {
            return Err(FundLinkError::ConfigurationError(
                "reconnect_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_reconnect_delay_ms < self.reconnect_delay_ms {
            return Err(FundLinkError::ConfigurationError(format!(
                "max_reconnect_delay_ms ({}) must be >= reconnect_delay_ms ({})",
                self.max_reconnect_delay_ms, self.reconnect_delay_ms
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(FundLinkError::ConfigurationError(
                "request_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    pub fn with_max_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.max_reconnect_delay_ms = delay_ms;
        self
    }

    pub fn with_reconnect_jitter_ms(mut self, jitter_ms: u64) -> Self {
        self.reconnect_jitter_ms = jitter_ms;
        self
    }

    pub fn with_heartbeat_interval_ms(mut self, interval_ms: u64) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self
    }

    pub fn with_heartbeat_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.heartbeat_timeout_ms = timeout_ms;
        self
    }

    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// `None` when the handshake may take as long as it needs.
    pub fn connect_timeout(&self) -> Option<Duration> {
        match self.connect_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.auto_reconnect);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay_ms, 1000);
        assert_eq!(config.max_reconnect_delay_ms, 30000);
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(10)));
        assert!(!config.debug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ClientConfig::from_toml_str(
            r#"
            max_reconnect_attempts = 3
            heartbeat_interval_ms = 0
            debug = true
            "#,
        )
        .unwrap();
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.heartbeat_interval_ms, 0);
        assert!(config.debug);
        assert_eq!(config.request_timeout_ms, 30000);
    }

    #[test]
    fn test_zero_connect_timeout_means_none() {
        let config = ClientConfig::default().with_connect_timeout_ms(0);
        assert_eq!(config.connect_timeout(), None);
    }

    #[test]
    fn test_validate_rejects_inverted_backoff_bounds() {
        let config = ClientConfig::default()
            .with_reconnect_delay_ms(5000)
            .with_max_reconnect_delay_ms(1000);
        assert!(matches!(
            config.validate(),
            Err(FundLinkError::ConfigurationError(_))
        ));
        assert!(ClientConfig::default()
            .with_reconnect_delay_ms(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_invalid_toml_is_a_configuration_error() {
        let err = ClientConfig::from_toml_str("max_reconnect_attempts = \"many\"").unwrap_err();
        assert!(matches!(err, FundLinkError::ConfigurationError(_)));
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "reconnect_delay_ms = 250").unwrap();
        writeln!(file, "max_reconnect_delay_ms = 4000").unwrap();
        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.reconnect_delay_ms, 250);
        assert_eq!(config.max_reconnect_delay_ms, 4000);
    }
}
