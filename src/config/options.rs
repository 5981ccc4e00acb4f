//! Bridge options.
//!
//! Every key has a default, so an empty TOML document is a valid
//! configuration.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

use super::builder::BridgeConfigBuilder;
use super::control::ControlConfig;

// ============================================================================
// Defaults
// ============================================================================

/// First port tried by auto-discovery.
pub const DEFAULT_PORT_RANGE_START: u16 = 8851;

/// Last port tried by auto-discovery.
pub const DEFAULT_PORT_RANGE_END: u16 = 8895;

/// Sequenced events kept for replay.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1000;

/// Most events returned in one `connection_ack`.
pub const DEFAULT_REPLAY_LIMIT: usize = 100;

/// Console entries buffered per connection.
pub const DEFAULT_LOG_BUFFER_CAPACITY: usize = 1000;

const DEFAULT_FLUSH_INTERVAL_MS: u64 = 2500;
const DEFAULT_REQUEST_SWEEP_INTERVAL_MS: u64 = 1000;

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port_range_start() -> u16 {
    DEFAULT_PORT_RANGE_START
}

fn default_port_range_end() -> u16 {
    DEFAULT_PORT_RANGE_END
}

fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_project_path() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_replay_capacity() -> usize {
    DEFAULT_REPLAY_CAPACITY
}

fn default_replay_limit() -> usize {
    DEFAULT_REPLAY_LIMIT
}

fn default_log_buffer_capacity() -> usize {
    DEFAULT_LOG_BUFFER_CAPACITY
}

fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}

fn default_request_sweep_interval_ms() -> u64 {
    DEFAULT_REQUEST_SWEEP_INTERVAL_MS
}

// ============================================================================
// BridgeConfig
// ============================================================================

/// Complete bridge configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Address the WebSocket server binds to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// First port of the discovery range (inclusive).
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,

    /// Last port of the discovery range (inclusive).
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,

    /// Version reported in `connection_ack` and `server_info_response`.
    #[serde(default = "default_server_version")]
    pub server_version: String,

    /// Project directory reported in `server_info_response`.
    #[serde(default = "default_project_path")]
    pub project_path: PathBuf,

    /// Sequenced events kept for replay.
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,

    /// Most events returned in one `connection_ack`.
    #[serde(default = "default_replay_limit")]
    pub replay_limit: usize,

    /// Console entries buffered per connection.
    #[serde(default = "default_log_buffer_capacity")]
    pub log_buffer_capacity: usize,

    /// Interval between buffer flushes.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Interval between sweeps of expired pending requests.
    #[serde(default = "default_request_sweep_interval_ms")]
    pub request_sweep_interval_ms: u64,

    /// Browser controller settings.
    #[serde(default)]
    pub control: ControlConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port_range_start: DEFAULT_PORT_RANGE_START,
            port_range_end: DEFAULT_PORT_RANGE_END,
            server_version: default_server_version(),
            project_path: default_project_path(),
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
            replay_limit: DEFAULT_REPLAY_LIMIT,
            log_buffer_capacity: DEFAULT_LOG_BUFFER_CAPACITY,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            request_sweep_interval_ms: DEFAULT_REQUEST_SWEEP_INTERVAL_MS,
            control: ControlConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Creates a builder starting from the defaults.
    #[inline]
    #[must_use]
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::new()
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// - [`Error::Toml`] if the document does not parse
    /// - [`Error::Config`] if a value fails validation
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the file cannot be read
    /// - see [`BridgeConfig::from_toml_str`]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.port_range_start == 0 || self.port_range_start > self.port_range_end {
            return Err(Error::config(format!(
                "invalid port range {}-{}",
                self.port_range_start, self.port_range_end
            )));
        }
        if self.replay_capacity == 0 || self.log_buffer_capacity == 0 {
            return Err(Error::config("buffer capacities must be non-zero"));
        }
        if self.replay_limit == 0 || self.replay_limit > self.replay_capacity {
            return Err(Error::config(format!(
                "replay_limit must be in 1..={}",
                self.replay_capacity
            )));
        }
        if self.flush_interval_ms == 0 || self.request_sweep_interval_ms == 0 {
            return Err(Error::config("intervals must be non-zero"));
        }
        self.control.validate()
    }

    /// Inclusive discovery range.
    #[inline]
    #[must_use]
    pub fn port_range(&self) -> RangeInclusive<u16> {
        self.port_range_start..=self.port_range_end
    }

    /// Flush interval as a [`Duration`].
    #[inline]
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Sweep interval as a [`Duration`].
    #[inline]
    #[must_use]
    pub fn request_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.request_sweep_interval_ms)
    }

    /// Last component of the project path.
    #[must_use]
    pub fn project_name(&self) -> String {
        self.project_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::ControlMode;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.port_range(), 8851..=8895);
        assert_eq!(config.flush_interval(), Duration::from_millis(2500));
        assert_eq!(config.control.mode, ControlMode::Auto);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = BridgeConfig::from_toml_str("").expect("parse");
        assert_eq!(config.port_range_start, DEFAULT_PORT_RANGE_START);
        assert_eq!(config.replay_limit, DEFAULT_REPLAY_LIMIT);
    }

    #[test]
    fn test_toml_overrides() {
        let config = BridgeConfig::from_toml_str(
            r#"
            host = "0.0.0.0"
            port_range_start = 9000
            port_range_end = 9001
            project_path = "/srv/app"

            [control]
            mode = "cdp"
            extension_timeout_ms = 250
            "#,
        )
        .expect("parse");

        assert_eq!(config.host.to_string(), "0.0.0.0");
        assert_eq!(config.port_range(), 9000..=9001);
        assert_eq!(config.project_name(), "app");
        assert_eq!(config.control.mode, ControlMode::RemoteDebugging);
        assert_eq!(config.control.extension_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_toml_rejects_bad_range() {
        let err = BridgeConfig::from_toml_str("port_range_start = 10\nport_range_end = 5")
            .expect_err("range must be rejected");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_toml_rejects_unknown_key() {
        let err = BridgeConfig::from_toml_str("colour = \"blue\"").expect_err("unknown key");
        assert!(matches!(err, Error::Toml(_)));
    }

    #[test]
    fn test_replay_limit_bounded_by_capacity() {
        let config = BridgeConfig {
            replay_capacity: 10,
            replay_limit: 11,
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
