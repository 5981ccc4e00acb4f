//! Browser control with backend fallback.
//!
//! [`BrowserController`] runs an [`Action`] on the extension, the
//! remote-debugging protocol or OS scripting, and always answers with a
//! [`ControlResult`] naming the backend that produced it.
//!
//! # Fallback Chain
//!
//! | Order | Method | Default deadline |
//! |-------|--------|------------------|
//! | 1 | `extension` | 5s |
//! | 2 | `remote-debugging` | 10s |
//! | 3 | `os-scripting` | 15s |
//!
//! Unavailable, failed and timed-out attempts all fall through to the next
//! slot. Pinned modes run one slot only.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `action` | [`Action`] and [`ElementTarget`] |
//! | `backend` | [`ControlBackend`] trait |
//! | `capability` | [`Capabilities`] and [`CapabilityDetector`] |
//! | `cdp` | Remote-debugging backend |
//! | `controller` | [`BrowserController`] |
//! | `extension` | Extension backend |
//! | `osscript` | AppleScript backend |
//! | `result` | [`ControlResult`] and [`ControlMethod`] |

// ============================================================================
// Submodules
// ============================================================================

/// Actions and element targets.
pub mod action;

/// Backend trait.
pub mod backend;

/// Capability flags and detection.
pub mod capability;

/// Chrome DevTools Protocol backend.
pub mod cdp;

/// Backend chain.
pub mod controller;

/// Browser extension backend.
pub mod extension;

/// AppleScript backend.
pub mod osscript;

/// Uniform result type.
pub mod result;

// ============================================================================
// Re-exports
// ============================================================================

pub use action::{Action, ElementTarget};
pub use backend::ControlBackend;
pub use capability::{Capabilities, CapabilityDetector, CapabilityReport, MethodReport};
pub use cdp::{CdpSession, RemoteDebuggingBackend};
pub use controller::{BackendSlot, BrowserController};
pub use extension::ExtensionBackend;
pub use osscript::{OsBrowser, OsScriptingBackend};
pub use result::{Attempt, ControlMethod, ControlResult};
