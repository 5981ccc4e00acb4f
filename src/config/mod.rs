//! Bridge configuration.
//!
//! [`BridgeConfig`] can be built in code through [`BridgeConfig::builder()`]
//! or loaded from TOML.
//!
//! # Example
//!
//! ```toml
//! port_range_start = 8851
//! port_range_end = 8860
//! flush_interval_ms = 1000
//!
//! [control]
//! mode = "auto"
//! cdp_port = 9222
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Fluent builder with validation |
//! | `control` | Controller mode and backend timeouts |
//! | `options` | [`BridgeConfig`] and defaults |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder with validation.
pub mod builder;

/// Controller mode and backend timeouts.
pub mod control;

/// Bridge options and defaults.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::BridgeConfigBuilder;
pub use control::{ControlConfig, ControlMode};
pub use options::BridgeConfig;
