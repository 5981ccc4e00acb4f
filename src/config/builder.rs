//! Builder pattern for bridge configuration.
//!
//! # Example
//!
//! ```no_run
//! use browser_bridge::{BridgeConfig, ControlMode};
//!
//! # fn example() -> browser_bridge::Result<()> {
//! let config = BridgeConfig::builder()
//!     .port_range(8851, 8860)
//!     .mode(ControlMode::Auto)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

use super::control::ControlMode;
use super::options::BridgeConfig;

// ============================================================================
// BridgeConfigBuilder
// ============================================================================

/// Builder for a validated [`BridgeConfig`].
///
/// Use [`BridgeConfig::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Creates a builder holding the default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bind address.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: IpAddr) -> Self {
        self.config.host = host;
        self
    }

    /// Sets the inclusive port discovery range.
    #[inline]
    #[must_use]
    pub fn port_range(mut self, start: u16, end: u16) -> Self {
        self.config.port_range_start = start;
        self.config.port_range_end = end;
        self
    }

    /// Sets the version reported to the extension.
    #[inline]
    #[must_use]
    pub fn server_version(mut self, version: impl Into<String>) -> Self {
        self.config.server_version = version.into();
        self
    }

    /// Sets the project directory reported in `server_info_response`.
    #[inline]
    #[must_use]
    pub fn project_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.project_path = path.into();
        self
    }

    /// Sets replay ring capacity and the per-handshake replay limit.
    #[inline]
    #[must_use]
    pub fn replay(mut self, capacity: usize, limit: usize) -> Self {
        self.config.replay_capacity = capacity;
        self.config.replay_limit = limit;
        self
    }

    /// Sets the per-connection console buffer capacity.
    #[inline]
    #[must_use]
    pub fn log_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.log_buffer_capacity = capacity;
        self
    }

    /// Sets the buffer flush interval.
    #[inline]
    #[must_use]
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval_ms = duration_ms(interval);
        self
    }

    /// Sets the pending-request sweep interval.
    #[inline]
    #[must_use]
    pub fn request_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.request_sweep_interval_ms = duration_ms(interval);
        self
    }

    /// Sets the controller mode.
    #[inline]
    #[must_use]
    pub fn mode(mut self, mode: ControlMode) -> Self {
        self.config.control.mode = mode;
        self
    }

    /// Enables or disables the OS-scripting fallback.
    #[inline]
    #[must_use]
    pub fn fallback_enabled(mut self, enabled: bool) -> Self {
        self.config.control.fallback_enabled = enabled;
        self
    }

    /// Enables or disables the remote-debugging backend.
    #[inline]
    #[must_use]
    pub fn cdp_enabled(mut self, enabled: bool) -> Self {
        self.config.control.cdp_enabled = enabled;
        self
    }

    /// Sets the browser remote-debugging port.
    #[inline]
    #[must_use]
    pub fn cdp_port(mut self, port: u16) -> Self {
        self.config.control.cdp_port = port;
        self
    }

    /// Sets the application driven by OS scripting.
    #[inline]
    #[must_use]
    pub fn os_script_browser(mut self, browser: impl Into<String>) -> Self {
        self.config.control.os_script_browser = browser.into();
        self
    }

    /// Sets the three backend deadlines.
    #[inline]
    #[must_use]
    pub fn backend_timeouts(
        mut self,
        extension: Duration,
        remote_debugging: Duration,
        os_scripting: Duration,
    ) -> Self {
        self.config.control.extension_timeout_ms = duration_ms(extension);
        self.config.control.remote_debugging_timeout_ms = duration_ms(remote_debugging);
        self.config.control.os_scripting_timeout_ms = duration_ms(os_scripting);
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if validation fails.
    pub fn build(self) -> Result<BridgeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::Error;

    #[test]
    fn test_builder_defaults() {
        let config = BridgeConfigBuilder::new().build().expect("defaults");
        assert_eq!(config.port_range(), 8851..=8895);
    }

    #[test]
    fn test_builder_overrides() {
        let config = BridgeConfig::builder()
            .port_range(9100, 9105)
            .flush_interval(Duration::from_millis(50))
            .mode(ControlMode::Extension)
            .backend_timeouts(
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(30),
            )
            .build()
            .expect("valid");

        assert_eq!(config.port_range(), 9100..=9105);
        assert_eq!(config.flush_interval_ms, 50);
        assert_eq!(config.control.mode, ControlMode::Extension);
        assert_eq!(config.control.os_scripting_timeout_ms, 30);
    }

    #[test]
    fn test_builder_rejects_invalid() {
        let err = BridgeConfig::builder()
            .log_buffer_capacity(0)
            .build()
            .expect_err("zero capacity");
        assert!(matches!(err, Error::Config { .. }));
    }
}
