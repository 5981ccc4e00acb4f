//! Extension backend.
//!
//! Drives the connected browser tab through [`BrowserService`]: navigation
//! is fire-and-forget, everything else is a correlated request.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{Error, Result};
use crate::service::BrowserService;

use super::action::Action;
use super::backend::ControlBackend;
use super::result::ControlMethod;

// ============================================================================
// ExtensionBackend
// ============================================================================

/// Backend that talks to the browser extension.
pub struct ExtensionBackend {
    service: Arc<BrowserService>,
    request_timeout: Duration,
}

impl ExtensionBackend {
    /// Creates a backend whose correlated requests wait `request_timeout`.
    #[must_use]
    pub fn new(service: Arc<BrowserService>, request_timeout: Duration) -> Self {
        Self {
            service,
            request_timeout,
        }
    }

    /// Server port of the connection `port` resolves to.
    fn log_port(&self, port: Option<u16>) -> Result<u16> {
        self.service
            .registry()
            .get_active_connection(port)
            .map(|connection| connection.server_port)
            .or(port)
            .ok_or_else(|| Error::no_active_connection(port))
    }
}

/// Turns an extension-reported `{success: false, error}` into an error.
fn check_reported(response: Value) -> Result<Value> {
    if response.get("success").and_then(Value::as_bool) == Some(false) {
        let message = response
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("Extension reported failure");
        return Err(Error::backend_failed(ControlMethod::Extension, message));
    }
    Ok(response)
}

#[async_trait]
impl ControlBackend for ExtensionBackend {
    fn method(&self) -> ControlMethod {
        ControlMethod::Extension
    }

    async fn is_available(&self, port: Option<u16>) -> bool {
        self.service.registry().get_active_connection(port).is_some()
    }

    async fn execute(&self, action: &Action, port: Option<u16>) -> Result<Value> {
        let timeout = self.request_timeout;
        debug!(action = action.name(), ?port, "Extension action");

        match action {
            Action::Navigate { url } => {
                if self.service.navigate_browser(port, url) {
                    Ok(json!({ "url": url, "port": port }))
                } else {
                    Err(Error::backend_failed(
                        ControlMethod::Extension,
                        "Navigation command not delivered",
                    ))
                }
            }
            Action::ExecuteScript { .. } => Err(Error::unsupported(
                ControlMethod::Extension,
                action.name(),
            )),
            Action::ExtractContent { tab_id } => {
                let response = self.service.extract_content(port, *tab_id, timeout).await?;
                check_reported(response)
            }
            Action::ExtractSemanticDom { tab_id, options } => {
                let response = self
                    .service
                    .extract_semantic_dom(port, *tab_id, options.clone(), timeout)
                    .await?;
                check_reported(response)
            }
            Action::QueryLogs { last_n, levels } => {
                let server_port = self.log_port(port)?;
                let messages = self
                    .service
                    .query_logs(server_port, *last_n, levels.as_deref())
                    .await?;
                Ok(json!({
                    "port": server_port,
                    "count": messages.len(),
                    "messages": messages,
                }))
            }
            Action::ListTabs => {
                let response = self.service.list_tabs(port, timeout).await?;
                check_reported(response)
            }
            _ => {
                let command = action
                    .dom_command()
                    .ok_or_else(|| Error::unsupported(ControlMethod::Extension, action.name()))?;
                let response = self
                    .service
                    .dom_request(port, command, action.tab_id(), timeout)
                    .await?;
                check_reported(response)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use tokio::sync::mpsc;

    use crate::config::BridgeConfig;
    use crate::control::ElementTarget;
    use crate::protocol::InboundFrame;
    use crate::registry::ConnectionRegistry;
    use crate::storage::{MemoryStorage, Storage};
    use crate::transport::socket::SocketCommand;
    use crate::transport::{ConnectionInfo, SocketHandle};

    const SERVER_PORT: u16 = 8851;
    const CLIENT_PORT: u16 = 50100;

    fn service() -> Arc<BrowserService> {
        let config = BridgeConfig::default();
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let registry = Arc::new(ConnectionRegistry::new(config.port_range()));
        Arc::new(BrowserService::new(registry, storage, &config))
    }

    async fn connect(service: &BrowserService) -> mpsc::UnboundedReceiver<SocketCommand> {
        let remote_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), CLIENT_PORT);
        let (socket, rx) = SocketHandle::new(remote_addr, SERVER_PORT);
        service
            .handle_connect(ConnectionInfo {
                socket,
                remote_addr,
                server_port: SERVER_PORT,
                user_agent: None,
            })
            .await
            .expect("connect");
        rx
    }

    async fn next_frame(rx: &mut mpsc::UnboundedReceiver<SocketCommand>) -> Value {
        match rx.recv().await.expect("command") {
            SocketCommand::Send(text) => serde_json::from_str(&text).expect("json"),
            SocketCommand::Close => panic!("unexpected close"),
        }
    }

    #[tokio::test]
    async fn test_unavailable_without_connection() {
        let backend = ExtensionBackend::new(service(), Duration::from_millis(50));
        assert!(!backend.is_available(None).await);

        let err = backend
            .execute(&Action::Navigate { url: "https://a.test".into() }, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendFailed { .. }));
    }

    #[tokio::test]
    async fn test_navigate_sends_frame() {
        let service = service();
        let mut rx = connect(&service).await;
        let backend = ExtensionBackend::new(service, Duration::from_millis(50));

        assert!(backend.is_available(Some(SERVER_PORT)).await);
        let data = backend
            .execute(
                &Action::Navigate { url: "https://a.test".into() },
                Some(SERVER_PORT),
            )
            .await
            .expect("navigate");

        assert_eq!(data, json!({"url": "https://a.test", "port": SERVER_PORT}));
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["type"], "navigate");
        assert_eq!(frame["url"], "https://a.test");
    }

    #[tokio::test]
    async fn test_click_round_trip_and_reported_failure() {
        let service = service();
        let mut rx = connect(&service).await;
        let backend = Arc::new(ExtensionBackend::new(service.clone(), Duration::from_secs(2)));

        let click = Action::Click {
            target: ElementTarget::selector("#go"),
            tab_id: None,
        };
        let task = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.execute(&click, None).await })
        };

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["type"], "dom_command");
        assert_eq!(frame["command"]["type"], "click");

        let reply = json!({
            "type": "dom_command_response",
            "requestId": frame["requestId"],
            "response": {"success": false, "error": "Element not found"},
        });
        service
            .handle_response(&InboundFrame::parse(&reply.to_string()).expect("frame"))
            .expect("handled");

        let err = task.await.expect("join").unwrap_err();
        assert_eq!(err.to_string(), "extension failed: Element not found");
    }

    #[tokio::test]
    async fn test_execute_script_unsupported() {
        let service = service();
        let _rx = connect(&service).await;
        let backend = ExtensionBackend::new(service, Duration::from_millis(50));

        let err = backend
            .execute(&Action::ExecuteScript { script: "1".into() }, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_query_logs_empty() {
        let service = service();
        let _rx = connect(&service).await;
        let backend = ExtensionBackend::new(service, Duration::from_millis(50));

        let data = backend
            .execute(&Action::QueryLogs { last_n: 5, levels: None }, None)
            .await
            .expect("logs");
        assert_eq!(data["port"], SERVER_PORT);
        assert_eq!(data["count"], 0);
    }
}
