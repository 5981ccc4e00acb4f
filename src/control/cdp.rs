//! Remote-debugging backend.
//!
//! Attaches to the first `page` target listed by the browser's debugging
//! endpoint and drives it with `Page.navigate` and `Runtime.evaluate`.
//!
//! # Session Lifecycle
//!
//! | Step | Call |
//! |------|------|
//! | Discover | `GET {endpoint}/json/list` |
//! | Attach | WebSocket to the target's `webSocketDebuggerUrl` |
//! | Call | `{id, method, params}` correlated by integer `id` |
//! | Drop | reader ends; the next availability check reconnects |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};

use super::action::{Action, ElementTarget};
use super::backend::ControlBackend;
use super::result::ControlMethod;

// ============================================================================
// Constants
// ============================================================================

/// Deadline for target discovery.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Deadline for the WebSocket upgrade to the page target.
const ATTACH_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on one CDP call.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;
type PendingCalls = Arc<Mutex<FxHashMap<u64, oneshot::Sender<Result<Value>>>>>;

// ============================================================================
// Discovery
// ============================================================================

/// Entry of `/json/list`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
    #[serde(rename = "type")]
    target_type: String,
    #[serde(default)]
    url: String,
    web_socket_debugger_url: Option<String>,
}

/// Incoming CDP frame; events carry `method` and no `id`.
#[derive(Debug, Deserialize)]
struct CdpReply {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<CdpReplyError>,
    method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CdpReplyError {
    code: i64,
    message: String,
}

// ============================================================================
// CdpSession
// ============================================================================

/// WebSocket session with one page target.
pub struct CdpSession {
    ws_url: String,
    ws_tx: tokio::sync::Mutex<WsSink>,
    next_id: AtomicU64,
    pending: PendingCalls,
    closed: CancellationToken,
    reader: JoinHandle<()>,
}

impl CdpSession {
    /// Discovers the first page target at `endpoint` and attaches to it.
    ///
    /// # Errors
    ///
    /// - [`Error::Http`] if the endpoint cannot be queried
    /// - [`Error::BackendUnavailable`] if no page target is listed
    /// - [`Error::Connection`] if the upgrade does not finish within
    ///   [`ATTACH_TIMEOUT`]
    /// - [`Error::WebSocket`] if the attach fails
    pub async fn connect_over_cdp(client: &reqwest::Client, endpoint: &str) -> Result<Self> {
        let list_url = format!("{}/json/list", endpoint.trim_end_matches('/'));
        debug!(url = %list_url, "Discovering debugging targets");

        let targets: Vec<TargetInfo> = client
            .get(&list_url)
            .timeout(DISCOVERY_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let (page_url, ws_url) = targets
            .into_iter()
            .filter(|target| target.target_type == "page")
            .find_map(|target| target.web_socket_debugger_url.map(|ws| (target.url, ws)))
            .ok_or_else(|| {
                Error::backend_unavailable(ControlMethod::RemoteDebugging, "No page target found")
            })?;

        let (stream, _) =
            tokio::time::timeout(ATTACH_TIMEOUT, tokio_tungstenite::connect_async(ws_url.as_str()))
                .await
                .map_err(|_| Error::connection(format!("WebSocket upgrade to {ws_url} timed out")))??;
        let (ws_tx, ws_rx) = stream.split();

        let pending: PendingCalls = Arc::new(Mutex::new(FxHashMap::default()));
        let closed = CancellationToken::new();
        let reader = tokio::spawn(read_loop(ws_rx, Arc::clone(&pending), closed.clone()));

        info!(page = %page_url, ws = %ws_url, "Remote-debugging session attached");

        Ok(Self {
            ws_url,
            ws_tx: tokio::sync::Mutex::new(ws_tx),
            next_id: AtomicU64::new(1),
            pending,
            closed,
            reader,
        })
    }

    /// Debugger URL of the attached target.
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Returns `true` while the reader is running.
    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Calls awaiting a reply.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Sends a CDP command and waits for its result.
    ///
    /// The pending entry is released however the call ends, including when
    /// the caller drops the future.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the session dropped
    /// - [`Error::BackendFailed`] if the browser returned a protocol error
    /// - [`Error::Timeout`] after [`CALL_TIMEOUT`]
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        if !self.is_alive() {
            return Err(Error::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({ "id": id, "method": method, "params": params }).to_string();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _pending = PendingGuard {
            pending: &self.pending,
            id,
        };

        trace!(id, method, "CDP send");
        self.ws_tx
            .lock()
            .await
            .send(Message::Text(request.into()))
            .await?;

        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => Err(Error::timeout(method, CALL_TIMEOUT.as_millis() as u64)),
        }
    }

    /// Evaluates `expression` in the page and returns its value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendFailed`] if the script threw.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let message = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("Script threw");
            return Err(Error::backend_failed(ControlMethod::RemoteDebugging, message));
        }

        Ok(result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }
}

/// Removes one call's pending entry on drop.
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

impl Drop for CdpSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(mut ws_rx: WsSource, pending: PendingCalls, closed: CancellationToken) {
    while let Some(message) = ws_rx.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "Remote-debugging socket error");
                break;
            }
        };

        let reply: CdpReply = match serde_json::from_str(&text) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Unparseable CDP frame");
                continue;
            }
        };

        let Some(id) = reply.id else {
            if let Some(method) = reply.method {
                trace!(method, "CDP event ignored");
            }
            continue;
        };

        let Some(tx) = pending.lock().remove(&id) else {
            continue;
        };

        let result = match reply.error {
            Some(err) => Err(Error::backend_failed(
                ControlMethod::RemoteDebugging,
                format!("{} ({})", err.message, err.code),
            )),
            None => Ok(reply.result.unwrap_or(Value::Null)),
        };
        let _ = tx.send(result);
    }

    closed.cancel();
    pending.lock().clear();
    debug!("Remote-debugging session closed");
}

// ============================================================================
// Page Scripts
// ============================================================================

/// JavaScript string literal for `value`.
fn js_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

/// Expression evaluating to the target element or `null`.
fn locate(target: &ElementTarget) -> String {
    match target {
        ElementTarget::Selector(selector) => {
            format!("document.querySelector({})", js_string(selector))
        }
        ElementTarget::XPath(xpath) => format!(
            "document.evaluate({}, document, null, \
             XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
            js_string(xpath)
        ),
        ElementTarget::Text { text, index } => format!(
            "(Array.from(document.querySelectorAll('a,button,input,label,option,span,div,li,td,p,h1,h2,h3,h4,h5,h6'))\
             .filter(e => e.children.length === 0 || e.tagName === 'BUTTON' || e.tagName === 'A')\
             .filter(e => (e.innerText || e.value || '').trim().includes({}))[{index}] || null)",
            js_string(text)
        ),
    }
}

/// Wraps `body` so it runs with `el` bound, or reports `{found: false}`.
fn with_element(target: &ElementTarget, body: &str) -> String {
    format!(
        "(() => {{ const el = {}; if (!el) return {{ found: false }}; {body} }})()",
        locate(target)
    )
}

fn set_value_body(value: &str) -> String {
    format!(
        "el.focus(); el.value = {}; \
         el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
         el.dispatchEvent(new Event('change', {{ bubbles: true }}));",
        js_string(value)
    )
}

const SUBMIT_BODY: &str = "const form = el.tagName === 'FORM' ? el : el.closest('form'); \
    if (!form) return { found: false }; \
    form.requestSubmit ? form.requestSubmit() : form.submit(); \
    return { found: true };";

const EXTRACT_CONTENT_SCRIPT: &str = "({ \
    title: document.title, \
    url: location.href, \
    text: document.body ? document.body.innerText : '' \
})";

const SEMANTIC_DOM_SCRIPT: &str = "({ \
    title: document.title, \
    url: location.href, \
    headings: Array.from(document.querySelectorAll('h1,h2,h3,h4,h5,h6')) \
        .map(h => ({ level: Number(h.tagName[1]), text: h.innerText.trim() })), \
    landmarks: Array.from(document.querySelectorAll('header,nav,main,aside,footer,[role]')) \
        .map(l => ({ tag: l.tagName.toLowerCase(), role: l.getAttribute('role') })), \
    links: Array.from(document.links).slice(0, 200) \
        .map(a => ({ text: a.innerText.trim(), href: a.href })), \
    forms: Array.from(document.forms).map(f => ({ \
        id: f.id || null, \
        action: f.action, \
        fields: Array.from(f.elements).map(e => ({ name: e.name || null, type: e.type })) \
    })) \
})";

/// Fails with "Element not found" if the page script reported a miss.
fn require_found(value: Value) -> Result<Value> {
    if value.get("found").and_then(Value::as_bool) == Some(false) {
        return Err(Error::backend_failed(
            ControlMethod::RemoteDebugging,
            "Element not found",
        ));
    }
    Ok(value)
}

/// HTTP client for the loopback debugging endpoint; proxies never apply.
fn local_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .unwrap_or_default()
}

// ============================================================================
// RemoteDebuggingBackend
// ============================================================================

/// Backend driving the browser over the Chrome DevTools Protocol.
pub struct RemoteDebuggingBackend {
    endpoint: String,
    port: u16,
    enabled: bool,
    client: reqwest::Client,
    session: tokio::sync::Mutex<Option<Arc<CdpSession>>>,
}

impl RemoteDebuggingBackend {
    /// Creates a backend for the debugging endpoint on `127.0.0.1:port`.
    #[must_use]
    pub fn new(port: u16, enabled: bool) -> Self {
        Self {
            endpoint: format!("http://127.0.0.1:{port}"),
            port,
            enabled,
            client: local_client(),
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Debugging HTTP endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the live session, attaching if there is none.
    async fn attach(&self) -> Result<Arc<CdpSession>> {
        if !self.enabled {
            return Err(Error::backend_unavailable(
                ControlMethod::RemoteDebugging,
                "Remote debugging disabled",
            ));
        }

        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref()
            && session.is_alive()
        {
            return Ok(Arc::clone(session));
        }

        let session = Arc::new(CdpSession::connect_over_cdp(&self.client, &self.endpoint).await?);
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    async fn run(&self, session: &CdpSession, action: &Action) -> Result<Value> {
        match action {
            Action::Navigate { url } => {
                let result = session.call("Page.navigate", json!({ "url": url })).await?;
                if let Some(error) = result.get("errorText").and_then(Value::as_str) {
                    return Err(Error::backend_failed(ControlMethod::RemoteDebugging, error));
                }
                Ok(json!({ "url": url, "cdp_port": self.port }))
            }
            Action::Click { target, .. } => {
                let script = with_element(
                    target,
                    "el.scrollIntoView({ block: 'center' }); el.click(); return { found: true };",
                );
                require_found(session.evaluate(&script).await?)?;
                Ok(json!({ "clicked": true }))
            }
            Action::Fill { target, value, .. } => {
                let body = format!("{} return {{ found: true }};", set_value_body(value));
                require_found(session.evaluate(&with_element(target, &body)).await?)?;
                Ok(json!({ "filled": true, "value": value }))
            }
            Action::GetElement { target, .. } => {
                let script = with_element(
                    target,
                    "return { found: true, text: (el.innerText ?? el.textContent ?? '').trim(), \
                     tag: el.tagName.toLowerCase(), value: el.value ?? null };",
                );
                let element = require_found(session.evaluate(&script).await?)?;
                Ok(json!({
                    "text": element.get("text").cloned().unwrap_or(Value::Null),
                    "tag": element.get("tag").cloned().unwrap_or(Value::Null),
                    "value": element.get("value").cloned().unwrap_or(Value::Null),
                }))
            }
            Action::SelectOption { target, value, .. } => {
                let body = format!("{} return {{ found: true }};", set_value_body(value));
                require_found(session.evaluate(&with_element(target, &body)).await?)?;
                Ok(json!({ "selected": true, "value": value }))
            }
            Action::SubmitForm { target, .. } => {
                require_found(session.evaluate(&with_element(target, SUBMIT_BODY)).await?)?;
                Ok(json!({ "submitted": true }))
            }
            Action::WaitForElement {
                target, timeout_ms, ..
            } => {
                let script = format!(
                    "new Promise(resolve => {{ \
                       const deadline = Date.now() + {timeout_ms}; \
                       const poll = () => {{ \
                         if ({}) return resolve({{ found: true }}); \
                         if (Date.now() > deadline) return resolve({{ found: false }}); \
                         setTimeout(poll, 100); \
                       }}; \
                       poll(); \
                     }})",
                    locate(target)
                );
                require_found(session.evaluate(&script).await?)?;
                Ok(json!({ "found": true }))
            }
            Action::FillForm { fields, submit, .. } => {
                let mut filled = Vec::with_capacity(fields.len());
                let mut last = None;
                for (selector, value) in fields {
                    let target = ElementTarget::selector(selector.as_str());
                    let body = format!("{} return {{ found: true }};", set_value_body(value));
                    require_found(session.evaluate(&with_element(&target, &body)).await?)?;
                    filled.push(selector.clone());
                    last = Some(target);
                }
                if *submit && let Some(target) = last {
                    require_found(session.evaluate(&with_element(&target, SUBMIT_BODY)).await?)?;
                }
                Ok(json!({ "filled": filled, "submitted": submit }))
            }
            Action::ExecuteScript { script } => {
                let value = session.evaluate(script).await?;
                Ok(json!({ "result": value }))
            }
            Action::ExtractContent { .. } => session.evaluate(EXTRACT_CONTENT_SCRIPT).await,
            Action::ExtractSemanticDom { .. } => session.evaluate(SEMANTIC_DOM_SCRIPT).await,
            Action::QueryLogs { .. } | Action::ListTabs => Err(Error::unsupported(
                ControlMethod::RemoteDebugging,
                action.name(),
            )),
        }
    }
}

#[async_trait]
impl ControlBackend for RemoteDebuggingBackend {
    fn method(&self) -> ControlMethod {
        ControlMethod::RemoteDebugging
    }

    async fn is_available(&self, _port: Option<u16>) -> bool {
        match self.attach().await {
            Ok(_) => true,
            Err(e) => {
                debug!(endpoint = %self.endpoint, error = %e, "Remote debugging unavailable");
                false
            }
        }
    }

    async fn execute(&self, action: &Action, _port: Option<u16>) -> Result<Value> {
        let session = self.attach().await?;
        let result = self.run(&session, action).await;

        if let Err(e) = &result
            && e.is_connection_error()
        {
            self.session.lock().await.take();
        }
        result
    }
}

// ============================================================================
// Tests
// ============================================================================
