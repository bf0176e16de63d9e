//! Server-Sent Events transport and parser.
//!
//! The legacy SSE transport keeps one GET stream open for server messages.
//! Its first `endpoint` event names the URL that client messages are
//! POSTed to.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::{bounded, header_map, Connector, Transport};
use crate::config::TransportKind;
use crate::error::{McpError, TransportError};

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// The event type (from "event:" line)
    pub event: Option<String>,
    /// The event data (from "data:" lines)
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// Events without a type default to "message".
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

/// SSE parser that handles line buffering across TCP packets.
#[derive(Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    current_event: Option<String>,
    current_data: Vec<String>,
    current_id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the parser and return any complete events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        self.parse_buffer()
    }

    fn parse_buffer(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();

        // Only complete lines are decoded, so a character split across
        // chunks stays intact.
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches('\n').trim_end_matches('\r');

            if line.is_empty() {
                if let Some(event) = self.finalize_event() {
                    events.push(event);
                }
                continue;
            }

            if let Some((field, value)) = Self::parse_field(line) {
                match field {
                    "event" => self.current_event = Some(value.to_string()),
                    "data" => self.current_data.push(value.to_string()),
                    "id" => self.current_id = Some(value.to_string()),
                    _ => {}
                }
            }
        }

        events
    }

    fn parse_field(line: &str) -> Option<(&str, &str)> {
        // comment
        if line.starts_with(':') {
            return None;
        }

        match line.split_once(':') {
            Some((field, value)) => Some((field, value.strip_prefix(' ').unwrap_or(value))),
            None => Some((line, "")),
        }
    }

    fn finalize_event(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() {
            self.current_event = None;
            self.current_id = None;
            return None;
        }

        let event = SseEvent {
            event: self.current_event.take(),
            data: self.current_data.join("\n"),
            id: self.current_id.take(),
        };
        self.current_data.clear();
        Some(event)
    }
}

impl fmt::Debug for SseParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseParser")
            .field("buffer_len", &self.buffer.len())
            .field("current_data_lines", &self.current_data.len())
            .finish()
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

/// Convert a reqwest body into a boxed stream of owned chunks.
pub(crate) fn byte_stream(response: reqwest::Response) -> ByteStream {
    Box::pin(response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())))
}

/// Reads whole events from an SSE body.
pub(crate) struct EventReader {
    stream: ByteStream,
    parser: SseParser,
    ready: VecDeque<SseEvent>,
    read_timeout: Option<Duration>,
}

impl EventReader {
    pub(crate) fn new(stream: ByteStream, read_timeout: Option<Duration>) -> Self {
        Self {
            stream,
            parser: SseParser::new(),
            ready: VecDeque::new(),
            read_timeout,
        }
    }

    /// Next complete event, or `None` when the body ends.
    pub(crate) async fn next_event(&mut self) -> Result<Option<SseEvent>, TransportError> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Ok(Some(event));
            }

            match bounded(self.read_timeout, self.stream.next()).await? {
                Some(chunk) => {
                    let chunk = chunk?;
                    self.ready.extend(self.parser.feed(&chunk));
                }
                None => return Ok(None),
            }
        }
    }
}

/// Configured legacy SSE server.
pub struct SseConnector {
    client: reqwest::Client,
    url: Url,
    timeout: Option<Duration>,
    read_timeout: Option<Duration>,
}

impl SseConnector {
    pub fn new(
        url: Url,
        headers: &HashMap<String, String>,
        timeout: Option<Duration>,
        read_timeout: Option<Duration>,
    ) -> Result<Self, McpError> {
        let client = reqwest::Client::builder()
            .default_headers(header_map(headers)?)
            .build()
            .map_err(|e| McpError::configuration(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            timeout,
            read_timeout,
        })
    }
}

#[async_trait]
impl Connector for SseConnector {
    async fn open(self: Box<Self>) -> Result<Arc<dyn Transport>, TransportError> {
        debug!(url = %self.url, "Opening SSE stream");

        let response = bounded(
            self.timeout,
            self.client
                .get(self.url.clone())
                .header(ACCEPT, "text/event-stream")
                .send(),
        )
        .await??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status, body));
        }

        let mut events = EventReader::new(byte_stream(response), self.read_timeout);
        let mut early = VecDeque::new();

        // Messages may arrive before the endpoint is announced; keep them.
        let endpoint = loop {
            match events.next_event().await? {
                Some(event) if event.event.as_deref() == Some("endpoint") => {
                    break self
                        .url
                        .join(event.data.trim())
                        .map_err(|_| TransportError::MissingEndpoint)?;
                }
                Some(event) if event.is_message() => early.push_back(event.data),
                Some(_) => {}
                None => return Err(TransportError::MissingEndpoint),
            }
        };

        debug!(endpoint = %endpoint, "SSE endpoint received");

        Ok(Arc::new(SseTransport {
            client: self.client,
            endpoint,
            timeout: self.timeout,
            inbound: Mutex::new(Inbound { events, early }),
            closed: CancellationToken::new(),
            connected: AtomicBool::new(true),
        }))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }
}

struct Inbound {
    events: EventReader,
    early: VecDeque<String>,
}

/// Open legacy SSE session.
pub struct SseTransport {
    client: reqwest::Client,
    endpoint: Url,
    timeout: Option<Duration>,
    inbound: Mutex<Inbound>,
    closed: CancellationToken,
    connected: AtomicBool,
}

impl SseTransport {
    /// URL that client messages are posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn next_message(&self) -> Result<String, TransportError> {
        let mut inbound = self.inbound.lock().await;
        if let Some(message) = inbound.early.pop_front() {
            return Ok(message);
        }

        loop {
            match inbound.events.next_event().await? {
                Some(event) if event.is_message() => return Ok(event.data),
                Some(event) => debug!(event = ?event.event, "Ignoring SSE event"),
                None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ConnectionClosed);
                }
            }
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let response = bounded(
            self.timeout,
            self.client
                .post(self.endpoint.clone())
                .header(CONTENT_TYPE, "application/json")
                .body(message.to_string())
                .send(),
        )
        .await??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status, body));
        }

        Ok(())
    }

    async fn receive(&self) -> Result<String, TransportError> {
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::ConnectionClosed),
            message = self.next_message() => message,
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.cancel();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_event() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: hello world\n\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello world");
        assert!(events[0].is_message());
    }

    #[test]
    fn test_endpoint_event() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: endpoint\ndata: /messages?session_id=42\n\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("endpoint"));
        assert!(!events[0].is_message());
    }

    #[test]
    fn test_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: {\"jsonrpc\":").is_empty());
        assert!(parser.feed(b" \"2.0\"}\r").is_empty());

        let events = parser.feed(b"\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, r#"{"jsonrpc": "2.0"}"#);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let payload = "data: {\"description\":\"获取天气\"}\n\n".as_bytes();
        let cut = payload.iter().position(|&b| b >= 0x80).unwrap() + 1;

        let mut parser = SseParser::new();
        assert!(parser.feed(&payload[..cut]).is_empty());
        let events = parser.feed(&payload[cut..]);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, r#"{"description":"获取天气"}"#);
    }

    #[test]
    fn test_multiline_data_and_comments() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": keepalive\ndata: line one\ndata: line two\nid: 7\n\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line one\nline two");
        assert_eq!(events[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_empty_event_ignored() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"\n\n").is_empty());
    }

    #[test]
    fn test_endpoint_resolution() {
        let base = Url::parse("http://localhost:8000/sse").unwrap();
        let endpoint = base.join("/messages/?session_id=abc").unwrap();
        assert_eq!(endpoint.as_str(), "http://localhost:8000/messages/?session_id=abc");
    }
}
