//! Capability detection.
//!
//! Each backend contributes a fixed capability set when it is available.
//!
//! | Method | Capabilities |
//! |--------|--------------|
//! | extension | `CONSOLE_CAPTURE`, `MULTI_TAB`, `DOM_INTERACTION` |
//! | remote-debugging | `DOM_INTERACTION`, `SCREENSHOTS`, `CRASH_RECOVERY`, `CROSS_BROWSER` |
//! | os-scripting | `DOM_INTERACTION` |

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use tracing::debug;

use super::backend::ControlBackend;
use super::result::ControlMethod;

// ============================================================================
// Capabilities
// ============================================================================

/// Set of browser-control capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    /// Empty set.
    pub const NONE: Self = Self(0);
    /// Console messages are captured.
    pub const CONSOLE_CAPTURE: Self = Self(1);
    /// Several tabs can be addressed.
    pub const MULTI_TAB: Self = Self(1 << 1);
    /// Elements can be clicked, filled and read.
    pub const DOM_INTERACTION: Self = Self(1 << 2);
    /// Screenshots can be taken.
    pub const SCREENSHOTS: Self = Self(1 << 3);
    /// The session survives a page crash.
    pub const CRASH_RECOVERY: Self = Self(1 << 4);
    /// Works with more than one browser family.
    pub const CROSS_BROWSER: Self = Self(1 << 5);

    const NAMED: [(Self, &'static str); 6] = [
        (Self::CONSOLE_CAPTURE, "CONSOLE_CAPTURE"),
        (Self::MULTI_TAB, "MULTI_TAB"),
        (Self::DOM_INTERACTION, "DOM_INTERACTION"),
        (Self::SCREENSHOTS, "SCREENSHOTS"),
        (Self::CRASH_RECOVERY, "CRASH_RECOVERY"),
        (Self::CROSS_BROWSER, "CROSS_BROWSER"),
    ];

    /// Capabilities a backend provides when available.
    #[must_use]
    pub const fn of(method: ControlMethod) -> Self {
        match method {
            ControlMethod::Extension => Self(
                Self::CONSOLE_CAPTURE.0 | Self::MULTI_TAB.0 | Self::DOM_INTERACTION.0,
            ),
            ControlMethod::RemoteDebugging => Self(
                Self::DOM_INTERACTION.0
                    | Self::SCREENSHOTS.0
                    | Self::CRASH_RECOVERY.0
                    | Self::CROSS_BROWSER.0,
            ),
            ControlMethod::OsScripting => Self::DOM_INTERACTION,
            ControlMethod::None => Self::NONE,
        }
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Returns `true` if every capability in `other` is present.
    #[inline]
    #[must_use]
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if the set is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Capability names, in declaration order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Serialize for Capabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.names().serialize(serializer)
    }
}

// ============================================================================
// CapabilityReport
// ============================================================================

/// Availability of one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodReport {
    /// Whether the backend is usable now.
    pub available: bool,
    /// What it would provide.
    pub capabilities: Capabilities,
    /// Human-readable description.
    pub description: &'static str,
}

/// Snapshot of what the bridge can do right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityReport {
    /// Union of the available backends' capabilities.
    pub capabilities: Capabilities,
    /// Per-backend availability.
    pub methods: BTreeMap<ControlMethod, MethodReport>,
    /// One-line summary.
    pub summary: String,
    /// Available backends, in fallback order.
    pub active_methods: Vec<ControlMethod>,
}

// ============================================================================
// CapabilityDetector
// ============================================================================

/// Probes each backend and reports the combined capability set.
#[derive(Clone)]
pub struct CapabilityDetector {
    backends: Vec<(Arc<dyn ControlBackend>, Duration)>,
}

/// Deadline for one availability check when none is given.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

impl CapabilityDetector {
    /// Creates a detector over `backends`, in fallback order, each checked
    /// within [`DEFAULT_CHECK_TIMEOUT`].
    #[must_use]
    pub fn new(backends: Vec<Arc<dyn ControlBackend>>) -> Self {
        Self::with_timeouts(
            backends
                .into_iter()
                .map(|backend| (backend, DEFAULT_CHECK_TIMEOUT))
                .collect(),
        )
    }

    /// Creates a detector with a deadline per backend.
    ///
    /// A backend whose check outlives its deadline is reported unavailable.
    #[must_use]
    pub fn with_timeouts(backends: Vec<(Arc<dyn ControlBackend>, Duration)>) -> Self {
        Self { backends }
    }

    async fn available_methods(&self) -> Vec<(ControlMethod, bool)> {
        let mut methods = Vec::with_capacity(self.backends.len());
        for (backend, deadline) in &self.backends {
            let method = backend.method();
            let available = match tokio::time::timeout(*deadline, backend.is_available(None)).await
            {
                Ok(available) => available,
                Err(_) => {
                    debug!(%method, ?deadline, "Availability check timed out");
                    false
                }
            };
            methods.push((method, available));
        }
        methods
    }

    /// Union of the capabilities of every available backend.
    pub async fn detect(&self) -> Capabilities {
        self.available_methods()
            .await
            .into_iter()
            .filter(|(_, available)| *available)
            .fold(Capabilities::NONE, |caps, (method, _)| caps | Capabilities::of(method))
    }

    /// Full availability report.
    pub async fn report(&self) -> CapabilityReport {
        let probed = self.available_methods().await;

        let mut capabilities = Capabilities::NONE;
        let mut methods = BTreeMap::new();
        let mut active_methods = Vec::new();

        for (method, available) in probed {
            if available {
                capabilities |= Capabilities::of(method);
                active_methods.push(method);
            }
            methods.insert(
                method,
                MethodReport {
                    available,
                    capabilities: Capabilities::of(method),
                    description: method.description(),
                },
            );
        }

        CapabilityReport {
            capabilities,
            methods,
            summary: summarize(&active_methods),
            active_methods,
        }
    }
}

fn summarize(active: &[ControlMethod]) -> String {
    match active {
        [] => "No browser control methods available. \
               Install extension or start browser with remote debugging."
            .to_string(),
        [method] => format!("Using {method} for browser control."),
        methods => {
            let names: Vec<&str> = methods.iter().map(ControlMethod::as_str).collect();
            format!(
                "Multiple methods available: {}. Using automatic fallback.",
                names.join(", ")
            )
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use crate::control::Action;
    use crate::error::{Error, Result};

    struct Probe {
        method: ControlMethod,
        available: bool,
        stall: bool,
    }

    #[async_trait]
    impl ControlBackend for Probe {
        fn method(&self) -> ControlMethod {
            self.method
        }

        async fn is_available(&self, _port: Option<u16>) -> bool {
            if self.stall {
                std::future::pending::<()>().await;
            }
            self.available
        }

        async fn execute(&self, _action: &Action, _port: Option<u16>) -> Result<Value> {
            Err(Error::unsupported(self.method, "probe"))
        }
    }

    fn detector(available: [bool; 3]) -> CapabilityDetector {
        let methods = [
            ControlMethod::Extension,
            ControlMethod::RemoteDebugging,
            ControlMethod::OsScripting,
        ];
        CapabilityDetector::new(
            methods
                .into_iter()
                .zip(available)
                .map(|(method, available)| {
                    Arc::new(Probe {
                        method,
                        available,
                        stall: false,
                    }) as Arc<dyn ControlBackend>
                })
                .collect(),
        )
    }

    #[test]
    fn test_capability_sets() {
        let extension = Capabilities::of(ControlMethod::Extension);
        assert!(extension.contains(Capabilities::CONSOLE_CAPTURE | Capabilities::MULTI_TAB));
        assert!(!extension.contains(Capabilities::SCREENSHOTS));
        assert_eq!(Capabilities::of(ControlMethod::OsScripting), Capabilities::DOM_INTERACTION);
        assert!(Capabilities::of(ControlMethod::None).is_empty());
    }

    #[tokio::test]
    async fn test_detect_unions_available() {
        let caps = detector([true, false, true]).detect().await;
        assert_eq!(
            caps.names(),
            vec!["CONSOLE_CAPTURE", "MULTI_TAB", "DOM_INTERACTION"]
        );

        assert!(detector([false, false, false]).detect().await.is_empty());
    }

    #[tokio::test]
    async fn test_stalled_check_reported_unavailable() {
        let stalled: Arc<dyn ControlBackend> = Arc::new(Probe {
            method: ControlMethod::RemoteDebugging,
            available: true,
            stall: true,
        });
        let ready: Arc<dyn ControlBackend> = Arc::new(Probe {
            method: ControlMethod::Extension,
            available: true,
            stall: false,
        });
        let detector = CapabilityDetector::with_timeouts(vec![
            (ready, Duration::from_millis(50)),
            (stalled, Duration::from_millis(50)),
        ]);

        let report = tokio::time::timeout(Duration::from_secs(2), detector.report())
            .await
            .expect("report within deadline");
        assert_eq!(report.active_methods, vec![ControlMethod::Extension]);
        assert!(!report.methods[&ControlMethod::RemoteDebugging].available);
    }

    #[tokio::test]
    async fn test_report_summaries() {
        let none = detector([false, false, false]).report().await;
        assert!(none.summary.starts_with("No browser control methods available"));
        assert!(none.active_methods.is_empty());

        let one = detector([false, true, false]).report().await;
        assert_eq!(one.summary, "Using remote-debugging for browser control.");

        let many = detector([true, true, false]).report().await;
        assert_eq!(
            many.summary,
            "Multiple methods available: extension, remote-debugging. Using automatic fallback."
        );
        assert_eq!(
            many.active_methods,
            vec![ControlMethod::Extension, ControlMethod::RemoteDebugging]
        );
    }

    #[tokio::test]
    async fn test_report_serializes_methods_by_name() {
        let report = detector([true, false, false]).report().await;
        let value = serde_json::to_value(&report).expect("json");

        assert_eq!(value["methods"]["extension"]["available"], json!(true));
        assert_eq!(value["methods"]["os-scripting"]["available"], json!(false));
        assert_eq!(
            value["methods"]["os-scripting"]["capabilities"],
            json!(["DOM_INTERACTION"])
        );
        assert_eq!(value["active_methods"], json!(["extension"]));
    }
}
