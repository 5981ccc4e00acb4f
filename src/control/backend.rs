//! Control backend seam.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

use super::action::Action;
use super::result::ControlMethod;

// ============================================================================
// ControlBackend
// ============================================================================

/// One way of driving the browser.
///
/// Backends return raw payloads; the controller wraps them in
/// [`super::ControlResult`] and enforces the per-backend deadline.
#[async_trait]
pub trait ControlBackend: Send + Sync {
    /// Which method this backend implements.
    fn method(&self) -> ControlMethod;

    /// Returns `true` if the backend can take an action right now.
    ///
    /// Checked at call time, never cached by the controller.
    async fn is_available(&self, port: Option<u16>) -> bool;

    /// Runs `action` and returns the backend's payload.
    ///
    /// # Errors
    ///
    /// Any error makes the controller move on to the next backend.
    async fn execute(&self, action: &Action, port: Option<u16>) -> Result<Value>;
}
