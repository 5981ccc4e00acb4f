//! Controller actions and element targets.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::TabId;
use crate::protocol::LogLevel;

// ============================================================================
// ElementTarget
// ============================================================================

/// How an action locates its element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementTarget {
    /// CSS selector.
    Selector(String),
    /// XPath expression.
    XPath(String),
    /// Visible text, picking the `index`-th match.
    Text {
        /// Text to match.
        text: String,
        /// Zero-based match index.
        index: usize,
    },
}

impl ElementTarget {
    /// CSS selector target.
    #[inline]
    #[must_use]
    pub fn selector(selector: impl Into<String>) -> Self {
        Self::Selector(selector.into())
    }

    /// XPath target.
    #[inline]
    #[must_use]
    pub fn xpath(xpath: impl Into<String>) -> Self {
        Self::XPath(xpath.into())
    }

    /// Text target, first match.
    #[inline]
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            index: 0,
        }
    }

    /// Returns the CSS selector, if this is one.
    #[inline]
    #[must_use]
    pub fn as_css(&self) -> Option<&str> {
        match self {
            Self::Selector(selector) => Some(selector),
            _ => None,
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Self::Selector(value) | Self::XPath(value) => value.trim().is_empty(),
            Self::Text { text, .. } => text.is_empty(),
        }
    }

    /// Locator fields as they appear in a `dom_command`.
    #[must_use]
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        match self {
            Self::Selector(selector) => {
                fields.insert("selector".to_string(), json!(selector));
            }
            Self::XPath(xpath) => {
                fields.insert("xpath".to_string(), json!(xpath));
            }
            Self::Text { text, index } => {
                fields.insert("text".to_string(), json!(text));
                fields.insert("index".to_string(), json!(index));
            }
        }
        fields
    }
}

// ============================================================================
// Action
// ============================================================================

/// An operation the controller can run on some backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Load a URL in the current tab.
    Navigate {
        /// Target URL.
        url: String,
    },
    /// Click an element.
    Click {
        /// Element to click.
        target: ElementTarget,
        /// Tab to act in.
        tab_id: Option<TabId>,
    },
    /// Type into an input.
    Fill {
        /// Input element.
        target: ElementTarget,
        /// Value to set.
        value: String,
        /// Tab to act in.
        tab_id: Option<TabId>,
    },
    /// Read an element's text.
    GetElement {
        /// Element to read.
        target: ElementTarget,
        /// Tab to act in.
        tab_id: Option<TabId>,
    },
    /// Evaluate JavaScript in the page.
    ExecuteScript {
        /// Script source.
        script: String,
    },
    /// Extract readable page content.
    ExtractContent {
        /// Tab to read.
        tab_id: Option<TabId>,
    },
    /// Extract the semantic outline of the page.
    ExtractSemanticDom {
        /// Tab to read.
        tab_id: Option<TabId>,
        /// Extraction options passed through to the extension.
        options: Option<Value>,
    },
    /// Pick an `<option>` in a `<select>`.
    SelectOption {
        /// Select element.
        target: ElementTarget,
        /// Option value.
        value: String,
        /// Tab to act in.
        tab_id: Option<TabId>,
    },
    /// Wait until an element appears.
    WaitForElement {
        /// Element to wait for.
        target: ElementTarget,
        /// In-page wait budget.
        timeout_ms: u64,
        /// Tab to act in.
        tab_id: Option<TabId>,
    },
    /// Submit a form.
    SubmitForm {
        /// Form or element inside it.
        target: ElementTarget,
        /// Tab to act in.
        tab_id: Option<TabId>,
    },
    /// Fill several inputs, optionally submitting.
    FillForm {
        /// CSS selector to value.
        fields: BTreeMap<String, String>,
        /// Submit the enclosing form afterwards.
        submit: bool,
        /// Tab to act in.
        tab_id: Option<TabId>,
    },
    /// Read captured console messages.
    QueryLogs {
        /// Newest entries to return.
        last_n: usize,
        /// Levels to keep; `None` keeps all.
        levels: Option<Vec<LogLevel>>,
    },
    /// List the browser's tabs.
    ListTabs,
}

impl Action {
    /// Action name used in logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::Click { .. } => "click",
            Self::Fill { .. } => "fill",
            Self::GetElement { .. } => "get_element",
            Self::ExecuteScript { .. } => "execute_javascript",
            Self::ExtractContent { .. } => "extract_content",
            Self::ExtractSemanticDom { .. } => "extract_semantic_dom",
            Self::SelectOption { .. } => "select_option",
            Self::WaitForElement { .. } => "wait_for_element",
            Self::SubmitForm { .. } => "submit_form",
            Self::FillForm { .. } => "fill_form",
            Self::QueryLogs { .. } => "query_logs",
            Self::ListTabs => "list_tabs",
        }
    }

    /// Returns `true` if only the extension can run this action.
    #[inline]
    #[must_use]
    pub const fn is_extension_only(&self) -> bool {
        matches!(self, Self::QueryLogs { .. } | Self::ListTabs)
    }

    /// Element target, for actions that have one.
    #[must_use]
    pub fn target(&self) -> Option<&ElementTarget> {
        match self {
            Self::Click { target, .. }
            | Self::Fill { target, .. }
            | Self::GetElement { target, .. }
            | Self::SelectOption { target, .. }
            | Self::WaitForElement { target, .. }
            | Self::SubmitForm { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Rejects arguments no backend could act on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a missing or unparseable URL,
    /// or an empty script, locator or field set.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Navigate { url } if url.trim().is_empty() => {
                Err(Error::invalid_argument("Missing 'url' argument"))
            }
            Self::Navigate { url } => Url::parse(url)
                .map(|_| ())
                .map_err(|e| Error::invalid_argument(format!("Invalid URL '{url}': {e}"))),
            Self::ExecuteScript { script } if script.trim().is_empty() => {
                Err(Error::invalid_argument("Missing 'script' argument"))
            }
            Self::FillForm { fields, .. } if fields.is_empty() => {
                Err(Error::invalid_argument("Missing 'fields' argument"))
            }
            _ => match self.target() {
                Some(target) if target.is_blank() => Err(Error::invalid_argument(
                    "Must provide selector, xpath, or text",
                )),
                _ => Ok(()),
            },
        }
    }

    /// Tab the action is addressed to.
    #[must_use]
    pub fn tab_id(&self) -> Option<TabId> {
        match self {
            Self::Click { tab_id, .. }
            | Self::Fill { tab_id, .. }
            | Self::GetElement { tab_id, .. }
            | Self::ExtractContent { tab_id }
            | Self::ExtractSemanticDom { tab_id, .. }
            | Self::SelectOption { tab_id, .. }
            | Self::WaitForElement { tab_id, .. }
            | Self::SubmitForm { tab_id, .. }
            | Self::FillForm { tab_id, .. } => *tab_id,
            _ => None,
        }
    }

    /// Extension `dom_command` body for element actions.
    ///
    /// Returns `None` for actions that are not DOM commands.
    #[must_use]
    pub fn dom_command(&self) -> Option<Value> {
        let (command_type, target) = match self {
            Self::Click { target, .. } => ("click", Some(target)),
            Self::Fill { target, .. } => ("fill", Some(target)),
            Self::GetElement { target, .. } => ("getElement", Some(target)),
            Self::SelectOption { target, .. } => ("selectOption", Some(target)),
            Self::WaitForElement { target, .. } => ("waitForElement", Some(target)),
            Self::SubmitForm { target, .. } => ("submitForm", Some(target)),
            Self::FillForm { .. } => ("fillForm", None),
            _ => return None,
        };

        let mut command = target.map(ElementTarget::to_fields).unwrap_or_default();
        command.insert("type".to_string(), json!(command_type));

        match self {
            Self::Fill { value, .. } | Self::SelectOption { value, .. } => {
                command.insert("value".to_string(), json!(value));
            }
            Self::WaitForElement { timeout_ms, .. } => {
                command.insert("timeout".to_string(), json!(timeout_ms));
            }
            Self::FillForm { fields, submit, .. } => {
                command.insert("fields".to_string(), json!(fields));
                command.insert("submit".to_string(), json!(submit));
            }
            _ => {}
        }

        Some(Value::Object(command))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_only() {
        assert!(Action::ListTabs.is_extension_only());
        assert!(
            Action::QueryLogs {
                last_n: 10,
                levels: None
            }
            .is_extension_only()
        );
        assert!(!Action::Navigate { url: "https://a".into() }.is_extension_only());
    }

    #[test]
    fn test_validate_rejects_empty_arguments() {
        let err = Action::Navigate { url: " ".into() }.validate().unwrap_err();
        assert_eq!(err.to_string(), "Invalid argument: Missing 'url' argument");

        let click = Action::Click {
            target: ElementTarget::selector(""),
            tab_id: None,
        };
        assert!(click.validate().is_err());

        let err = Action::Navigate { url: "not a url".into() }.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid URL 'not a url'"));

        let script = Action::ExecuteScript { script: "1 + 1".into() };
        script.validate().expect("valid");
    }

    #[test]
    fn test_dom_command_shape() {
        let fill = Action::Fill {
            target: ElementTarget::selector("#q"),
            value: "rust".into(),
            tab_id: Some(TabId::new(3)),
        };
        assert_eq!(
            fill.dom_command(),
            Some(json!({"type": "fill", "selector": "#q", "value": "rust"}))
        );
        assert_eq!(fill.tab_id(), Some(TabId::new(3)));

        let click = Action::Click {
            target: ElementTarget::text("Sign in"),
            tab_id: None,
        };
        assert_eq!(
            click.dom_command(),
            Some(json!({"type": "click", "text": "Sign in", "index": 0}))
        );

        assert_eq!(Action::ListTabs.dom_command(), None);
    }

    #[test]
    fn test_fill_form_command() {
        let mut fields = BTreeMap::new();
        fields.insert("#user".to_string(), "ada".to_string());

        let action = Action::FillForm {
            fields,
            submit: true,
            tab_id: None,
        };
        assert_eq!(
            action.dom_command(),
            Some(json!({"type": "fillForm", "fields": {"#user": "ada"}, "submit": true}))
        );
    }
}
