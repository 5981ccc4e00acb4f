//! Browser controller settings.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::control::{ControlMethod, OsBrowser};
use crate::error::{Error, Result};

// ============================================================================
// ControlMode
// ============================================================================

/// How the controller picks a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlMode {
    /// Extension, then remote-debugging, then OS scripting.
    #[default]
    Auto,
    /// Extension only.
    Extension,
    /// Remote-debugging only.
    #[serde(alias = "cdp")]
    RemoteDebugging,
    /// OS scripting only.
    #[serde(alias = "applescript")]
    OsScripting,
}

impl ControlMode {
    /// Returns the backend a pinned mode is restricted to.
    #[inline]
    #[must_use]
    pub const fn pinned_method(&self) -> Option<ControlMethod> {
        match self {
            Self::Auto => None,
            Self::Extension => Some(ControlMethod::Extension),
            Self::RemoteDebugging => Some(ControlMethod::RemoteDebugging),
            Self::OsScripting => Some(ControlMethod::OsScripting),
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Extension => f.write_str("extension"),
            Self::RemoteDebugging => f.write_str("remote-debugging"),
            Self::OsScripting => f.write_str("os-scripting"),
        }
    }
}

impl FromStr for ControlMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(Self::Auto),
            "extension" => Ok(Self::Extension),
            "remote-debugging" | "cdp" => Ok(Self::RemoteDebugging),
            "os-scripting" | "applescript" => Ok(Self::OsScripting),
            other => Err(Error::config(format!("invalid control mode '{other}'"))),
        }
    }
}

// ============================================================================
// ControlConfig
// ============================================================================

const DEFAULT_CDP_PORT: u16 = 9222;
const DEFAULT_EXTENSION_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_REMOTE_DEBUGGING_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_OS_SCRIPTING_TIMEOUT_MS: u64 = 15_000;

/// Controller mode, backend switches and per-backend timeouts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlConfig {
    /// Backend selection mode.
    pub mode: ControlMode,
    /// Whether auto mode may fall through to OS scripting.
    pub fallback_enabled: bool,
    /// Whether the remote-debugging backend is used at all.
    pub cdp_enabled: bool,
    /// Remote-debugging port of the browser.
    pub cdp_port: u16,
    /// Application targeted by OS scripting (`Safari` or `Google Chrome`).
    pub os_script_browser: String,
    /// Deadline for one extension attempt.
    pub extension_timeout_ms: u64,
    /// Deadline for one remote-debugging attempt.
    pub remote_debugging_timeout_ms: u64,
    /// Deadline for one OS-scripting attempt.
    pub os_scripting_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            mode: ControlMode::Auto,
            fallback_enabled: true,
            cdp_enabled: true,
            cdp_port: DEFAULT_CDP_PORT,
            os_script_browser: "Safari".to_string(),
            extension_timeout_ms: DEFAULT_EXTENSION_TIMEOUT_MS,
            remote_debugging_timeout_ms: DEFAULT_REMOTE_DEBUGGING_TIMEOUT_MS,
            os_scripting_timeout_ms: DEFAULT_OS_SCRIPTING_TIMEOUT_MS,
        }
    }
}

impl ControlConfig {
    /// Checks that every timeout is non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on the first zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.extension_timeout_ms == 0
            || self.remote_debugging_timeout_ms == 0
            || self.os_scripting_timeout_ms == 0
        {
            return Err(Error::config("backend timeouts must be non-zero"));
        }
        if self.cdp_port == 0 {
            return Err(Error::config("cdp_port must be non-zero"));
        }
        self.os_browser()?;
        Ok(())
    }

    /// Parsed OS-scripting target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for anything but Safari or Google Chrome.
    #[inline]
    pub fn os_browser(&self) -> Result<OsBrowser> {
        self.os_script_browser.parse()
    }

    /// Remote-debugging HTTP endpoint.
    #[inline]
    #[must_use]
    pub fn cdp_endpoint(&self) -> String {
        format!("http://localhost:{}", self.cdp_port)
    }

    /// Extension deadline.
    #[inline]
    #[must_use]
    pub fn extension_timeout(&self) -> Duration {
        Duration::from_millis(self.extension_timeout_ms)
    }

    /// Remote-debugging deadline.
    #[inline]
    #[must_use]
    pub fn remote_debugging_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_debugging_timeout_ms)
    }

    /// OS-scripting deadline.
    #[inline]
    #[must_use]
    pub fn os_scripting_timeout(&self) -> Duration {
        Duration::from_millis(self.os_scripting_timeout_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_mode_from_str_aliases() {
        assert_eq!("cdp".parse::<ControlMode>().expect("mode"), ControlMode::RemoteDebugging);
        assert_eq!(
            "applescript".parse::<ControlMode>().expect("mode"),
            ControlMode::OsScripting
        );
        assert_err!("telepathy".parse::<ControlMode>());
    }

    #[test]
    fn test_mode_display_round_trips() {
        for mode in [
            ControlMode::Auto,
            ControlMode::Extension,
            ControlMode::RemoteDebugging,
            ControlMode::OsScripting,
        ] {
            assert_eq!(mode.to_string().parse::<ControlMode>().expect("mode"), mode);
        }
    }

    #[test]
    fn test_pinned_method() {
        assert_eq!(ControlMode::Auto.pinned_method(), None);
        assert_eq!(
            ControlMode::RemoteDebugging.pinned_method(),
            Some(ControlMethod::RemoteDebugging)
        );
    }

    #[test]
    fn test_defaults() {
        let config = ControlConfig::default();
        assert_eq!(config.extension_timeout(), Duration::from_secs(5));
        assert_eq!(config.remote_debugging_timeout(), Duration::from_secs(10));
        assert_eq!(config.cdp_endpoint(), "http://localhost:9222");
        assert_ok!(config.validate());
    }

    #[test]
    fn test_unknown_os_browser_rejected() {
        let config = ControlConfig {
            os_script_browser: "Netscape".to_string(),
            ..ControlConfig::default()
        };
        assert_err!(config.validate());
        assert_eq!(ControlConfig::default().os_browser().expect("browser"), OsBrowser::Safari);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = ControlConfig {
            remote_debugging_timeout_ms: 0,
            ..ControlConfig::default()
        };
        assert_err!(config.validate());
    }
}
