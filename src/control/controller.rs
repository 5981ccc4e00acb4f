//! Backend selection and fallback.
//!
//! The chain is data: an ordered list of [`BackendSlot`]s, each pairing a
//! backend with its own deadline. In auto mode every slot is tried in order
//! until one succeeds; a pinned mode runs exactly one slot.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::{ControlConfig, ControlMode};
use crate::error::{Error, Result};
use crate::identifiers::TabId;
use crate::protocol::LogLevel;
use crate::service::BrowserService;

use super::action::{Action, ElementTarget};
use super::backend::ControlBackend;
use super::capability::{Capabilities, CapabilityDetector, CapabilityReport};
use super::cdp::RemoteDebuggingBackend;
use super::extension::ExtensionBackend;
use super::osscript::OsScriptingBackend;
use super::result::{Attempt, ControlMethod, ControlResult};

// ============================================================================
// BackendSlot
// ============================================================================

/// A backend and the deadline for one attempt on it.
#[derive(Clone)]
pub struct BackendSlot {
    backend: Arc<dyn ControlBackend>,
    timeout: Duration,
}

impl BackendSlot {
    /// Creates a slot.
    #[must_use]
    pub fn new(backend: Arc<dyn ControlBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Backend method.
    #[inline]
    #[must_use]
    pub fn method(&self) -> ControlMethod {
        self.backend.method()
    }

    /// Attempt deadline.
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One attempt: availability check, then execution, both inside the
    /// slot deadline.
    async fn attempt(&self, action: &Action, port: Option<u16>) -> Result<Value> {
        let method = self.method();

        let run = async {
            if !self.backend.is_available(port).await {
                return Err(Error::backend_unavailable(method, "not available"));
            }
            self.backend.execute(action, port).await
        };

        match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(
                format!("{method} {}", action.name()),
                self.timeout.as_millis() as u64,
            )),
        }
    }

    /// Availability within the slot deadline.
    async fn is_available(&self, port: Option<u16>) -> bool {
        tokio::time::timeout(self.timeout, self.backend.is_available(port))
            .await
            .unwrap_or(false)
    }
}

// ============================================================================
// BrowserController
// ============================================================================

/// Runs actions on the best available backend.
pub struct BrowserController {
    mode: ControlMode,
    slots: Vec<BackendSlot>,
    detector: CapabilityDetector,
}

impl BrowserController {
    /// Creates a controller over `slots`, in fallback order.
    #[must_use]
    pub fn new(mode: ControlMode, slots: Vec<BackendSlot>) -> Self {
        let detector = CapabilityDetector::with_timeouts(
            slots
                .iter()
                .map(|slot| (Arc::clone(&slot.backend), slot.timeout))
                .collect(),
        );
        Self {
            mode,
            slots,
            detector,
        }
    }

    /// Builds the standard chain: extension, remote-debugging, OS scripting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the scripting browser is unsupported.
    pub fn from_config(service: Arc<BrowserService>, config: &ControlConfig) -> Result<Self> {
        let extension_timeout = config.extension_timeout();

        let slots = vec![
            BackendSlot::new(
                Arc::new(ExtensionBackend::new(service, extension_timeout)),
                extension_timeout,
            ),
            BackendSlot::new(
                Arc::new(RemoteDebuggingBackend::new(config.cdp_port, config.cdp_enabled)),
                config.remote_debugging_timeout(),
            ),
            BackendSlot::new(
                Arc::new(OsScriptingBackend::new(
                    config.os_browser()?,
                    config.fallback_enabled,
                )),
                config.os_scripting_timeout(),
            ),
        ];

        Ok(Self::new(config.mode, slots))
    }

    /// Selection mode.
    #[inline]
    #[must_use]
    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    /// Methods in fallback order.
    #[must_use]
    pub fn methods(&self) -> Vec<ControlMethod> {
        self.slots.iter().map(BackendSlot::method).collect()
    }

    fn slot(&self, method: ControlMethod) -> Option<&BackendSlot> {
        self.slots.iter().find(|slot| slot.method() == method)
    }

    /// Runs `action`, honoring the mode and the fallback chain.
    pub async fn execute(&self, action: Action, port: Option<u16>) -> ControlResult {
        let name = action.name();

        if let Err(e) = action.validate() {
            let method = self.mode.pinned_method().unwrap_or(ControlMethod::None);
            return ControlResult::failure(method, message_of(&e));
        }

        if action.is_extension_only() {
            return self.execute_extension_only(&action, port).await;
        }

        if let Some(method) = self.mode.pinned_method() {
            return self.execute_pinned(method, &action, port).await;
        }

        let mut attempts = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let method = slot.method();
            match slot.attempt(&action, port).await {
                Ok(data) => {
                    info!(action = name, %method, "Action succeeded");
                    return ControlResult::success(method, data);
                }
                Err(e) if !e.is_fallthrough() => {
                    warn!(action = name, %method, error = %e, "Attempt failed, stopping chain");
                    return ControlResult::failure(method, message_of(&e));
                }
                Err(e) => {
                    warn!(action = name, %method, error = %e, "Attempt failed, falling through");
                    attempts.push(Attempt {
                        method,
                        error: message_of(&e),
                    });
                }
            }
        }

        let tried: Vec<&str> = attempts.iter().map(|a| a.method.as_str()).collect();
        ControlResult::failure(
            ControlMethod::None,
            format!(
                "All methods failed for action '{name}' (tried: {})",
                tried.join(", ")
            ),
        )
        .with_data(json!({ "attempts": attempts }))
    }

    async fn execute_pinned(
        &self,
        method: ControlMethod,
        action: &Action,
        port: Option<u16>,
    ) -> ControlResult {
        let Some(slot) = self.slot(method) else {
            return ControlResult::failure(method, format!("{method} backend not configured"));
        };

        match slot.attempt(action, port).await {
            Ok(data) => {
                debug!(action = action.name(), %method, "Pinned action succeeded");
                ControlResult::success(method, data)
            }
            Err(e) => {
                warn!(action = action.name(), %method, error = %e, "Pinned action failed");
                ControlResult::failure(method, message_of(&e))
            }
        }
    }

    async fn execute_extension_only(&self, action: &Action, port: Option<u16>) -> ControlResult {
        let method = ControlMethod::Extension;
        let name = action.name();

        let available = match self.slot(method) {
            Some(slot) => slot.is_available(port).await,
            None => false,
        };
        if !available {
            let port = port.map_or_else(|| "any".to_string(), |p| p.to_string());
            return ControlResult::failure(
                method,
                format!("Action '{name}' requires extension but no connection found on port {port}"),
            );
        }

        self.execute_pinned(method, action, port).await
    }

    // ========================================================================
    // Capabilities
    // ========================================================================

    /// Capabilities of the backends available now.
    pub async fn capabilities(&self) -> Capabilities {
        self.detector.detect().await
    }

    /// Per-backend availability report.
    pub async fn capability_report(&self) -> CapabilityReport {
        self.detector.report().await
    }

    // ========================================================================
    // Convenience
    // ========================================================================

    /// Navigates the current tab.
    pub async fn navigate(&self, url: impl Into<String>, port: Option<u16>) -> ControlResult {
        self.execute(Action::Navigate { url: url.into() }, port).await
    }

    /// Clicks an element.
    pub async fn click(&self, target: ElementTarget, port: Option<u16>) -> ControlResult {
        self.execute(Action::Click { target, tab_id: None }, port)
            .await
    }

    /// Fills an input.
    pub async fn fill(
        &self,
        target: ElementTarget,
        value: impl Into<String>,
        port: Option<u16>,
    ) -> ControlResult {
        let action = Action::Fill {
            target,
            value: value.into(),
            tab_id: None,
        };
        self.execute(action, port).await
    }

    /// Reads an element.
    pub async fn get_element(&self, target: ElementTarget, port: Option<u16>) -> ControlResult {
        self.execute(Action::GetElement { target, tab_id: None }, port)
            .await
    }

    /// Evaluates JavaScript in the page.
    pub async fn execute_script(
        &self,
        script: impl Into<String>,
        port: Option<u16>,
    ) -> ControlResult {
        self.execute(
            Action::ExecuteScript {
                script: script.into(),
            },
            port,
        )
        .await
    }

    /// Extracts readable page content.
    pub async fn extract_content(&self, tab_id: Option<TabId>, port: Option<u16>) -> ControlResult {
        self.execute(Action::ExtractContent { tab_id }, port).await
    }

    /// Extracts the semantic outline of the page.
    pub async fn extract_semantic_dom(
        &self,
        tab_id: Option<TabId>,
        options: Option<Value>,
        port: Option<u16>,
    ) -> ControlResult {
        self.execute(Action::ExtractSemanticDom { tab_id, options }, port)
            .await
    }

    /// Picks an option in a `<select>`.
    pub async fn select_option(
        &self,
        target: ElementTarget,
        value: impl Into<String>,
        port: Option<u16>,
    ) -> ControlResult {
        let action = Action::SelectOption {
            target,
            value: value.into(),
            tab_id: None,
        };
        self.execute(action, port).await
    }

    /// Waits for an element to appear.
    pub async fn wait_for_element(
        &self,
        target: ElementTarget,
        timeout: Duration,
        port: Option<u16>,
    ) -> ControlResult {
        let action = Action::WaitForElement {
            target,
            timeout_ms: timeout.as_millis() as u64,
            tab_id: None,
        };
        self.execute(action, port).await
    }

    /// Submits a form.
    pub async fn submit_form(&self, target: ElementTarget, port: Option<u16>) -> ControlResult {
        self.execute(Action::SubmitForm { target, tab_id: None }, port)
            .await
    }

    /// Fills several inputs by CSS selector.
    pub async fn fill_form(
        &self,
        fields: BTreeMap<String, String>,
        submit: bool,
        port: Option<u16>,
    ) -> ControlResult {
        let action = Action::FillForm {
            fields,
            submit,
            tab_id: None,
        };
        self.execute(action, port).await
    }

    /// Reads captured console messages.
    pub async fn query_logs(
        &self,
        last_n: usize,
        levels: Option<Vec<LogLevel>>,
        port: Option<u16>,
    ) -> ControlResult {
        self.execute(Action::QueryLogs { last_n, levels }, port)
            .await
    }

    /// Lists the browser's tabs.
    pub async fn list_tabs(&self, port: Option<u16>) -> ControlResult {
        self.execute(Action::ListTabs, port).await
    }
}

/// Error text without the variant prefix where one would be redundant.
fn message_of(error: &Error) -> String {
    match error {
        Error::InvalidArgument { message } | Error::BackendFailed { message, .. } => {
            message.clone()
        }
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    enum Behavior {
        Succeed(Value),
        Fail(&'static str),
        Hang,
        Unavailable,
        StallCheck,
        Reject(&'static str),
    }

    struct Stub {
        method: ControlMethod,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl Stub {
        fn new(method: ControlMethod, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                method,
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ControlBackend for Stub {
        fn method(&self) -> ControlMethod {
            self.method
        }

        async fn is_available(&self, _port: Option<u16>) -> bool {
            match self.behavior {
                Behavior::Unavailable => false,
                Behavior::StallCheck => std::future::pending().await,
                _ => true,
            }
        }

        async fn execute(&self, _action: &Action, _port: Option<u16>) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Succeed(data) => Ok(data.clone()),
                Behavior::Fail(message) => Err(Error::backend_failed(self.method, *message)),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Value::Null)
                }
                Behavior::Unavailable | Behavior::StallCheck => {
                    Err(Error::backend_unavailable(self.method, "down"))
                }
                Behavior::Reject(message) => Err(Error::invalid_argument(*message)),
            }
        }
    }

    fn slot(stub: &Arc<Stub>, timeout_ms: u64) -> BackendSlot {
        BackendSlot::new(stub.clone(), Duration::from_millis(timeout_ms))
    }

    fn navigate() -> Action {
        Action::Navigate {
            url: "https://a.test".into(),
        }
    }

    #[tokio::test]
    async fn test_extension_timeout_falls_through_to_remote_debugging() {
        let extension = Stub::new(ControlMethod::Extension, Behavior::Hang);
        let cdp = Stub::new(
            ControlMethod::RemoteDebugging,
            Behavior::Succeed(json!({"url": "https://a.test", "cdp_port": 9222})),
        );
        let script = Stub::new(ControlMethod::OsScripting, Behavior::Fail("unused"));

        let controller = BrowserController::new(
            ControlMode::Auto,
            vec![slot(&extension, 50), slot(&cdp, 500), slot(&script, 500)],
        );

        let result = controller.execute(navigate(), Some(8851)).await;
        assert!(result.success);
        assert_eq!(result.method, ControlMethod::RemoteDebugging);
        assert_eq!(
            serde_json::to_value(&result).expect("json")["method"],
            json!("remote-debugging")
        );
        assert_eq!(script.calls(), 0);
    }

    #[tokio::test]
    async fn test_stalled_availability_check_bounded_by_slot_timeout() {
        let extension = Stub::new(ControlMethod::Extension, Behavior::StallCheck);
        let cdp = Stub::new(ControlMethod::RemoteDebugging, Behavior::Succeed(json!({})));

        let controller = BrowserController::new(
            ControlMode::Auto,
            vec![slot(&extension, 50), slot(&cdp, 500)],
        );

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            controller.execute(navigate(), None),
        )
        .await
        .expect("chain finishes within deadline");
        assert!(result.success);
        assert_eq!(result.method, ControlMethod::RemoteDebugging);
        assert_eq!(extension.calls(), 0);

        let pinned = BrowserController::new(ControlMode::Extension, vec![slot(&extension, 50)]);
        let result = tokio::time::timeout(Duration::from_secs(2), pinned.execute(navigate(), None))
            .await
            .expect("pinned finishes within deadline");
        assert!(!result.success);
        assert_eq!(result.method, ControlMethod::Extension);
        assert!(result.error.expect("error").starts_with("Timeout after 50ms"));

        let caps = tokio::time::timeout(Duration::from_secs(2), controller.capabilities())
            .await
            .expect("detection within deadline");
        assert_eq!(caps, Capabilities::of(ControlMethod::RemoteDebugging));
    }

    #[tokio::test]
    async fn test_argument_rejection_stops_chain() {
        let extension = Stub::new(ControlMethod::Extension, Behavior::Reject("Bad selector"));
        let cdp = Stub::new(ControlMethod::RemoteDebugging, Behavior::Succeed(json!({})));

        let controller = BrowserController::new(
            ControlMode::Auto,
            vec![slot(&extension, 50), slot(&cdp, 50)],
        );

        let result = controller.execute(navigate(), None).await;
        assert!(!result.success);
        assert_eq!(result.method, ControlMethod::Extension);
        assert_eq!(result.error.as_deref(), Some("Bad selector"));
        assert_eq!(cdp.calls(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_chain_reports_attempts() {
        let extension = Stub::new(ControlMethod::Extension, Behavior::Unavailable);
        let cdp = Stub::new(ControlMethod::RemoteDebugging, Behavior::Fail("No page target"));
        let script = Stub::new(ControlMethod::OsScripting, Behavior::Hang);

        let controller = BrowserController::new(
            ControlMode::Auto,
            vec![slot(&extension, 50), slot(&cdp, 50), slot(&script, 50)],
        );

        let result = controller.execute(navigate(), None).await;
        assert!(!result.success);
        assert_eq!(result.method, ControlMethod::None);

        let error = result.error.expect("error");
        assert!(error.starts_with("All methods failed for action 'navigate'"));
        assert!(error.contains("extension, remote-debugging, os-scripting"));

        let attempts = &result.data.expect("data")["attempts"];
        assert_eq!(attempts.as_array().expect("array").len(), 3);
        assert_eq!(attempts[1]["method"], "remote-debugging");
        assert_eq!(attempts[1]["error"], "No page target");
        assert_eq!(extension.calls(), 0);
    }

    #[tokio::test]
    async fn test_pinned_mode_never_falls_through() {
        let extension = Stub::new(ControlMethod::Extension, Behavior::Succeed(json!({})));
        let cdp = Stub::new(ControlMethod::RemoteDebugging, Behavior::Fail("boom"));

        let controller = BrowserController::new(
            ControlMode::RemoteDebugging,
            vec![slot(&extension, 50), slot(&cdp, 50)],
        );

        let result = controller.navigate("https://a.test", None).await;
        assert!(!result.success);
        assert_eq!(result.method, ControlMethod::RemoteDebugging);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(extension.calls(), 0);
    }

    #[tokio::test]
    async fn test_pinned_unavailable_is_direct_failure() {
        let script = Stub::new(ControlMethod::OsScripting, Behavior::Unavailable);
        let controller = BrowserController::new(ControlMode::OsScripting, vec![slot(&script, 50)]);

        let result = controller.navigate("https://a.test", None).await;
        assert_eq!(result.method, ControlMethod::OsScripting);
        assert!(!result.success);
        assert_eq!(script.calls(), 0);
    }

    #[tokio::test]
    async fn test_extension_only_fails_fast() {
        let extension = Stub::new(ControlMethod::Extension, Behavior::Unavailable);
        let cdp = Stub::new(ControlMethod::RemoteDebugging, Behavior::Succeed(json!({})));

        let controller =
            BrowserController::new(ControlMode::Auto, vec![slot(&extension, 50), slot(&cdp, 50)]);

        let result = controller.list_tabs(Some(8851)).await;
        assert!(!result.success);
        assert_eq!(result.method, ControlMethod::Extension);
        assert_eq!(
            result.error.as_deref(),
            Some("Action 'list_tabs' requires extension but no connection found on port 8851")
        );
        assert_eq!(cdp.calls(), 0);
    }

    #[tokio::test]
    async fn test_extension_only_runs_on_extension() {
        let extension = Stub::new(ControlMethod::Extension, Behavior::Succeed(json!({"tabs": []})));
        let controller = BrowserController::new(ControlMode::Auto, vec![slot(&extension, 50)]);

        let result = controller.query_logs(10, None, None).await;
        assert!(result.success);
        assert_eq!(result.method, ControlMethod::Extension);
    }

    #[tokio::test]
    async fn test_invalid_action_rejected_before_backends() {
        let extension = Stub::new(ControlMethod::Extension, Behavior::Succeed(json!({})));
        let controller = BrowserController::new(ControlMode::Auto, vec![slot(&extension, 50)]);

        let result = controller.execute_script("  ", None).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Missing 'script' argument"));
        assert_eq!(extension.calls(), 0);
    }

    #[tokio::test]
    async fn test_capabilities_follow_availability() {
        let extension = Stub::new(ControlMethod::Extension, Behavior::Unavailable);
        let script = Stub::new(ControlMethod::OsScripting, Behavior::Succeed(json!({})));

        let controller =
            BrowserController::new(ControlMode::Auto, vec![slot(&extension, 50), slot(&script, 50)]);

        assert_eq!(controller.capabilities().await, Capabilities::DOM_INTERACTION);
        assert_eq!(
            controller.methods(),
            vec![ControlMethod::Extension, ControlMethod::OsScripting]
        );
        let report = controller.capability_report().await;
        assert_eq!(report.active_methods, vec![ControlMethod::OsScripting]);
    }
}
