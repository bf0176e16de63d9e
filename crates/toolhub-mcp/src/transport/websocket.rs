//! WebSocket transport: one text frame per message, `mcp` subprotocol.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use super::{Connector, Transport};
use crate::config::TransportKind;
use crate::error::{McpError, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SUBPROTOCOL: &str = "mcp";

/// Configured WebSocket server.
pub struct WebSocketConnector {
    url: Url,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl WebSocketConnector {
    pub fn new(url: Url, headers: &HashMap<String, String>) -> Result<Self, McpError> {
        let headers = headers
            .iter()
            .map(|(key, value)| {
                let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                    McpError::configuration(format!("invalid header name {}: {}", key, e))
                })?;
                let value = HeaderValue::from_str(value).map_err(|e| {
                    McpError::configuration(format!("invalid value for header {}: {}", key, e))
                })?;
                Ok((name, value))
            })
            .collect::<Result<Vec<_>, McpError>>()?;

        Ok(Self { url, headers })
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(self: Box<Self>) -> Result<Arc<dyn Transport>, TransportError> {
        debug!(url = %self.url, "Connecting WebSocket");

        let mut request = self.url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));
        for (name, value) in self.headers {
            request.headers_mut().insert(name, value);
        }

        let (stream, _response) = connect_async(request).await?;
        let (sink, stream) = stream.split();

        Ok(Arc::new(WebSocketTransport {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            connected: AtomicBool::new(true),
        }))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }
}

/// Open WebSocket session.
pub struct WebSocketTransport {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    connected: AtomicBool,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.sink
            .lock()
            .await
            .send(Message::Text(message.to_string().into()))
            .await?;
        Ok(())
    }

    async fn receive(&self) -> Result<String, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data.to_vec()).map_err(|e| {
                        TransportError::ReadError(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
                    });
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ConnectionClosed);
                }
                // Pings are answered by tungstenite on the next write or flush.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(e.into());
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!(error = %e, "WebSocket close frame not delivered");
        }
        let _ = sink.close().await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
