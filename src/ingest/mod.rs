//! Console message ingestion.
//!
//! Inbound `console` and `batch` entries land in a bounded buffer per
//! connection and are flushed to [`crate::storage::Storage`] on an interval
//! and on disconnect.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `buffer` | Drop-oldest ring with swap and restore |
//! | `flush` | Per-connection flush tasks |

// ============================================================================
// Submodules
// ============================================================================

/// Drop-oldest console ring.
pub mod buffer;

/// Per-connection flush tasks.
pub mod flush;

// ============================================================================
// Re-exports
// ============================================================================

pub use buffer::LogBuffer;
pub use flush::MessageBuffers;
