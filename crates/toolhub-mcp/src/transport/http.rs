//! Streamable HTTP transport.
//!
//! Every client message is a POST to the server URL. The server answers
//! with a JSON body, an SSE body carrying one or more messages, or `202
//! Accepted` with nothing. Replies are queued for [`Transport::receive`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::sse::{byte_stream, EventReader};
use super::{bounded, header_map, Connector, Transport};
use crate::config::TransportKind;
use crate::error::{McpError, TransportError};

/// Header carrying the server-assigned session id.
pub const MCP_SESSION_ID: &str = "mcp-session-id";

/// Configured streamable HTTP server.
pub struct StreamableHttpConnector {
    client: reqwest::Client,
    url: Url,
    session_id: Option<String>,
    timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    terminate_on_close: bool,
}

impl StreamableHttpConnector {
    pub fn new(
        url: Url,
        headers: &HashMap<String, String>,
        session_id: Option<String>,
        timeout: Option<Duration>,
        read_timeout: Option<Duration>,
        terminate_on_close: bool,
    ) -> Result<Self, McpError> {
        let client = reqwest::Client::builder()
            .default_headers(header_map(headers)?)
            .build()
            .map_err(|e| McpError::configuration(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            session_id,
            timeout,
            read_timeout,
            terminate_on_close,
        })
    }
}

#[async_trait]
impl Connector for StreamableHttpConnector {
    async fn open(self: Box<Self>) -> Result<Arc<dyn Transport>, TransportError> {
        // Nothing to dial: the first POST establishes the session.
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Ok(Arc::new(StreamableHttpTransport {
            client: self.client,
            url: self.url,
            session_id: SyncMutex::new(self.session_id),
            timeout: self.timeout,
            read_timeout: self.read_timeout,
            terminate_on_close: self.terminate_on_close,
            inbox_tx,
            inbox_rx: Mutex::new(inbox_rx),
            closed: CancellationToken::new(),
            connected: AtomicBool::new(true),
        }))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }
}

/// Open streamable HTTP session.
pub struct StreamableHttpTransport {
    client: reqwest::Client,
    url: Url,
    session_id: SyncMutex<Option<String>>,
    timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    terminate_on_close: bool,
    inbox_tx: mpsc::UnboundedSender<String>,
    inbox_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    closed: CancellationToken,
    connected: AtomicBool,
}

impl StreamableHttpTransport {
    /// Session id currently in use, if the server assigned one.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    fn deliver(&self, payload: &str) -> Result<(), TransportError> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Ok(());
        }

        // Batches are split so each queued item is one message.
        if payload.starts_with('[') {
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(payload) {
                for item in items {
                    self.push(item.to_string())?;
                }
                return Ok(());
            }
        }
        self.push(payload.to_string())
    }

    fn push(&self, message: String) -> Result<(), TransportError> {
        self.inbox_tx
            .send(message)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn read_body(&self, response: reqwest::Response) -> Result<(), TransportError> {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("text/event-stream") {
            let mut events = EventReader::new(byte_stream(response), self.read_timeout);
            while let Some(event) = events.next_event().await? {
                if event.is_message() {
                    self.deliver(&event.data)?;
                }
            }
            Ok(())
        } else {
            let body = bounded(self.read_timeout, response.text()).await??;
            self.deliver(&body)
        }
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut request = self
            .client
            .post(self.url.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .body(message.to_string());
        if let Some(id) = self.session_id() {
            request = request.header(MCP_SESSION_ID, id);
        }

        let response = bounded(self.timeout, request.send()).await??;
        let status = response.status();

        if let Some(id) = response
            .headers()
            .get(MCP_SESSION_ID)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.lock();
            if current.as_deref() != Some(id) {
                debug!(session_id = id, "Server assigned session");
                *current = Some(id.to_string());
            }
        }

        if status == StatusCode::ACCEPTED {
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status, body));
        }

        self.read_body(response).await
    }

    async fn receive(&self) -> Result<String, TransportError> {
        let mut inbox = self.inbox_rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::ConnectionClosed),
            message = inbox.recv() => message.ok_or(TransportError::ConnectionClosed),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.closed.cancel();

        if !self.terminate_on_close {
            return Ok(());
        }
        let Some(id) = self.session_id() else {
            return Ok(());
        };

        debug!(url = %self.url, session_id = %id, "Terminating HTTP session");
        let response = bounded(
            self.timeout,
            self.client
                .delete(self.url.clone())
                .header(MCP_SESSION_ID, id)
                .send(),
        )
        .await??;

        // 405 means the server does not support explicit termination.
        let status = response.status();
        if !status.is_success() && status != StatusCode::METHOD_NOT_ALLOWED {
            warn!(status = %status, "Session termination rejected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(url: &str) -> Arc<dyn Transport> {
        let connector = StreamableHttpConnector::new(
            Url::parse(url).unwrap(),
            &HashMap::new(),
            Some("given".to_string()),
            Some(Duration::from_secs(1)),
            None,
            false,
        )
        .unwrap();
        Box::new(connector).open().await.unwrap()
    }

    #[tokio::test]
    async fn test_batch_payload_is_split() {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let transport = StreamableHttpTransport {
            client: reqwest::Client::new(),
            url: Url::parse("http://127.0.0.1:1/mcp").unwrap(),
            session_id: SyncMutex::new(None),
            timeout: None,
            read_timeout: None,
            terminate_on_close: false,
            inbox_tx,
            inbox_rx: Mutex::new(inbox_rx),
            closed: CancellationToken::new(),
            connected: AtomicBool::new(true),
        };

        transport
            .deliver(r#"[{"jsonrpc":"2.0","id":1,"result":{}},{"jsonrpc":"2.0","id":2,"result":{}}]"#)
            .unwrap();
        transport.deliver("   ").unwrap();

        assert!(transport.receive().await.unwrap().contains("\"id\":1"));
        assert!(transport.receive().await.unwrap().contains("\"id\":2"));
    }

    #[tokio::test]
    async fn test_receive_after_close_fails() {
        let transport = open("http://127.0.0.1:1/mcp").await;
        transport.close().await.unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(transport.receive().await, Err(TransportError::ConnectionClosed)));
        assert!(matches!(transport.send("{}").await, Err(TransportError::NotConnected)));
    }
}
