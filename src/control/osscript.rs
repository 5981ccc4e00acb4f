//! OS-scripting backend.
//!
//! Runs AppleScript through `osascript` against Safari or Google Chrome.
//! Only available on macOS; element actions need a CSS selector.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::{Error, Result};

use super::action::{Action, ElementTarget};
use super::backend::ControlBackend;
use super::result::ControlMethod;

// ============================================================================
// OsBrowser
// ============================================================================

/// Application the scripts are addressed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OsBrowser {
    /// Safari.
    #[default]
    Safari,
    /// Google Chrome.
    Chrome,
}

impl OsBrowser {
    /// AppleScript application name.
    #[inline]
    #[must_use]
    pub const fn application(&self) -> &'static str {
        match self {
            Self::Safari => "Safari",
            Self::Chrome => "Google Chrome",
        }
    }

    fn navigate_script(&self, url: &str) -> String {
        let url = applescript_string(url);
        match self {
            Self::Safari => {
                format!(r#"tell application "Safari" to set URL of front document to {url}"#)
            }
            Self::Chrome => format!(
                r#"tell application "Google Chrome" to set URL of active tab of front window to {url}"#
            ),
        }
    }

    fn javascript_script(&self, javascript: &str) -> String {
        let javascript = applescript_string(javascript);
        match self {
            Self::Safari => format!(
                r#"tell application "Safari" to do JavaScript {javascript} in front document"#
            ),
            Self::Chrome => format!(
                r#"tell application "Google Chrome" to execute active tab of front window javascript {javascript}"#
            ),
        }
    }
}

impl fmt::Display for OsBrowser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.application())
    }
}

impl FromStr for OsBrowser {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "safari" => Ok(Self::Safari),
            "google chrome" | "chrome" => Ok(Self::Chrome),
            _ => Err(Error::config(format!("unsupported scripting browser '{s}'"))),
        }
    }
}

// ============================================================================
// Script Helpers
// ============================================================================

/// Quoted AppleScript string literal.
fn applescript_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// JavaScript string literal.
fn js_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

fn css_selector<'a>(target: &'a ElementTarget, action: &Action) -> Result<&'a str> {
    target.as_css().ok_or_else(|| {
        let message = if matches!(action, Action::Click { .. }) {
            "CSS selector required for AppleScript mode (xpath/text not supported)"
        } else {
            "CSS selector required for AppleScript mode"
        };
        Error::backend_failed(ControlMethod::OsScripting, message)
    })
}

/// Page script that reports its result as a JSON string.
fn element_script(selector: &str, body: &str) -> String {
    format!(
        "(function() {{ var el = document.querySelector({}); \
         if (!el) return JSON.stringify({{ found: false }}); {body} }})()",
        js_string(selector)
    )
}

fn parse_output(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

fn require_found(value: Value) -> Result<Value> {
    if value.get("found").and_then(Value::as_bool) == Some(false) {
        return Err(Error::backend_failed(
            ControlMethod::OsScripting,
            "Element not found",
        ));
    }
    Ok(value)
}

// ============================================================================
// OsScriptingBackend
// ============================================================================

/// Backend running AppleScript on macOS.
#[derive(Debug, Clone)]
pub struct OsScriptingBackend {
    browser: OsBrowser,
    enabled: bool,
}

impl OsScriptingBackend {
    /// Creates a backend for `browser`; `enabled` mirrors `fallback_enabled`.
    #[must_use]
    pub fn new(browser: OsBrowser, enabled: bool) -> Self {
        Self { browser, enabled }
    }

    /// Targeted application.
    #[inline]
    #[must_use]
    pub fn browser(&self) -> OsBrowser {
        self.browser
    }

    async fn osascript(&self, script: &str) -> Result<String> {
        trace!(browser = %self.browser, "osascript");

        let output = Command::new("osascript")
            .args(["-e", script])
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::backend_failed(
                ControlMethod::OsScripting,
                stderr.trim().to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run_javascript(&self, javascript: &str) -> Result<Value> {
        let stdout = self
            .osascript(&self.browser.javascript_script(javascript))
            .await?;
        Ok(parse_output(&stdout))
    }
}

#[async_trait]
impl ControlBackend for OsScriptingBackend {
    fn method(&self) -> ControlMethod {
        ControlMethod::OsScripting
    }

    async fn is_available(&self, _port: Option<u16>) -> bool {
        self.enabled && cfg!(target_os = "macos")
    }

    async fn execute(&self, action: &Action, _port: Option<u16>) -> Result<Value> {
        if !self.is_available(None).await {
            return Err(Error::backend_unavailable(
                ControlMethod::OsScripting,
                "AppleScript requires macOS",
            ));
        }
        debug!(action = action.name(), browser = %self.browser, "OS-scripting action");

        match action {
            Action::Navigate { url } => {
                self.osascript(&self.browser.navigate_script(url)).await?;
                Ok(json!({ "url": url, "browser": self.browser.application() }))
            }
            Action::Click { target, .. } => {
                let selector = css_selector(target, action)?;
                let script = element_script(
                    selector,
                    "el.click(); return JSON.stringify({ found: true });",
                );
                require_found(self.run_javascript(&script).await?)?;
                Ok(json!({ "clicked": true }))
            }
            Action::Fill { target, value, .. } => {
                let selector = css_selector(target, action)?;
                let body = format!(
                    "el.value = {}; \
                     el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                     el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
                     return JSON.stringify({{ found: true }});",
                    js_string(value)
                );
                require_found(self.run_javascript(&element_script(selector, &body)).await?)?;
                Ok(json!({ "filled": true, "value": value }))
            }
            Action::GetElement { target, .. } => {
                let selector = css_selector(target, action)?;
                let script = element_script(
                    selector,
                    "return JSON.stringify({ found: true, text: (el.innerText || el.textContent || '').trim() });",
                );
                let element = require_found(self.run_javascript(&script).await?)?;
                Ok(json!({ "text": element.get("text").cloned().unwrap_or(Value::Null) }))
            }
            Action::ExecuteScript { script } => {
                let value = self.run_javascript(script).await?;
                Ok(json!({ "result": value }))
            }
            Action::ExtractContent { .. } => {
                self.run_javascript(
                    "JSON.stringify({ title: document.title, url: location.href, \
                     text: document.body ? document.body.innerText : '' })",
                )
                .await
            }
            _ => Err(Error::unsupported(ControlMethod::OsScripting, action.name())),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applescript_string_escapes() {
        assert_eq!(applescript_string(r#"say "hi" \ bye"#), r#""say \"hi\" \\ bye""#);
    }

    #[test]
    fn test_navigate_scripts() {
        assert_eq!(
            OsBrowser::Safari.navigate_script("https://a.test"),
            r#"tell application "Safari" to set URL of front document to "https://a.test""#
        );
        assert!(
            OsBrowser::Chrome
                .navigate_script("https://a.test")
                .contains("active tab of front window")
        );
    }

    #[test]
    fn test_browser_from_str() {
        assert_eq!("Google Chrome".parse::<OsBrowser>().expect("browser"), OsBrowser::Chrome);
        assert_eq!("safari".parse::<OsBrowser>().expect("browser"), OsBrowser::Safari);
        assert!("lynx".parse::<OsBrowser>().is_err());
    }

    #[test]
    fn test_css_selector_required() {
        let click = Action::Click {
            target: ElementTarget::xpath("//a"),
            tab_id: None,
        };
        let err = css_selector(&ElementTarget::xpath("//a"), &click).unwrap_err();
        assert_eq!(
            err.to_string(),
            "os-scripting failed: CSS selector required for AppleScript mode (xpath/text not supported)"
        );

        let get = Action::GetElement {
            target: ElementTarget::text("x"),
            tab_id: None,
        };
        let err = css_selector(&ElementTarget::text("x"), &get).unwrap_err();
        assert!(err.to_string().ends_with("CSS selector required for AppleScript mode"));
    }

    #[test]
    fn test_parse_output() {
        assert_eq!(parse_output("{\"found\":true}\n"), json!({"found": true}));
        assert_eq!(parse_output("plain\n"), json!("plain"));
    }

    #[tokio::test]
    async fn test_disabled_backend_unavailable() {
        let backend = OsScriptingBackend::new(OsBrowser::Safari, false);
        assert!(!backend.is_available(None).await);

        let err = backend
            .execute(&Action::Navigate { url: "https://a.test".into() }, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable { .. }));
    }
}
