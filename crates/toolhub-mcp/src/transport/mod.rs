//! MCP transport implementations.
//!
//! A transport carries one JSON-RPC message per item in each direction.
//! Construction and opening are separate steps: [`TransportFactory::build`]
//! validates configuration without touching the network or spawning
//! anything, and [`Connector::open`] performs the I/O.

mod http;
mod sse;
mod stdio;
mod websocket;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{ServerConfig, TransportConfig, TransportKind};
use crate::error::{McpError, TransportError};

pub use http::{StreamableHttpConnector, StreamableHttpTransport, MCP_SESSION_ID};
pub use sse::{SseConnector, SseEvent, SseParser, SseTransport};
pub use stdio::{default_environment, StdioConnector, StdioTransport};
pub use websocket::{WebSocketConnector, WebSocketTransport};

/// An open, bidirectional message stream to one server.
///
/// Sending and receiving may happen concurrently from different tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to the server.
    async fn send(&self, message: &str) -> Result<(), TransportError>;

    /// Receive the next message from the server.
    async fn receive(&self) -> Result<String, TransportError>;

    /// Release the underlying resource. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// A transport that has been configured but not opened yet.
#[async_trait]
pub trait Connector: Send {
    /// Perform the I/O needed to start talking to the server.
    async fn open(self: Box<Self>) -> Result<Arc<dyn Transport>, TransportError>;

    fn kind(&self) -> TransportKind;
}

/// Overall HTTP request timeout when the server entry sets none.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle timeout between streamed events when the server entry sets none.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Builds the right connector for a server's configuration.
pub struct TransportFactory;

impl TransportFactory {
    pub fn build(config: &ServerConfig) -> Result<Box<dyn Connector>, McpError> {
        debug!(server = %config.name, kind = %config.transport.kind(), "Building transport");

        let connector: Box<dyn Connector> = match &config.transport {
            TransportConfig::Stdio { command, args, env } => {
                Box::new(StdioConnector::new(command.clone(), args.clone(), env))
            }
            TransportConfig::StreamableHttp {
                url,
                headers,
                session_id,
                timeout,
                read_timeout,
                terminate_on_close,
            } => Box::new(StreamableHttpConnector::new(
                url.clone(),
                headers,
                session_id.clone(),
                Some(timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT)),
                Some(read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT)),
                *terminate_on_close,
            )?),
            TransportConfig::Sse {
                url,
                headers,
                timeout,
                read_timeout,
            } => Box::new(SseConnector::new(
                url.clone(),
                headers,
                Some(timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT)),
                Some(read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT)),
            )?),
            TransportConfig::WebSocket { url, headers } => {
                Box::new(WebSocketConnector::new(url.clone(), headers)?)
            }
        };

        Ok(connector)
    }
}

/// Build a reqwest header map from configured headers.
pub(crate) fn header_map(
    headers: &std::collections::HashMap<String, String>,
) -> Result<reqwest::header::HeaderMap, McpError> {
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| McpError::configuration(format!("invalid header name {}: {}", key, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| McpError::configuration(format!("invalid value for header {}: {}", key, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Await `future`, bounded by `limit` when one is configured.
pub(crate) async fn bounded<F, T>(
    limit: Option<Duration>,
    future: F,
) -> Result<T, TransportError>
where
    F: std::future::Future<Output = T>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| TransportError::TimedOut(limit)),
        None => Ok(future.await),
    }
}
