//! JSON-RPC session over an open transport.
//!
//! Outgoing requests get increasing numeric ids and park a oneshot sender
//! in the pending map. [`ClientSession::pump`] reads the transport and
//! routes each response to its waiter, so any number of requests can be
//! in flight at once. The pump runs inside the connection's lifecycle task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{McpError, TransportError};
use crate::protocol::{
    CallToolParams, CallToolResult, IncomingMessage, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsParams,
    ListToolsResult, ToolDescriptor,
};
use crate::transport::Transport;

type Reply = Result<Value, McpError>;

/// Upper bound on tools/list pages, against servers that loop their cursor.
const MAX_TOOL_PAGES: usize = 100;

/// Request/response correlation on top of a [`Transport`].
pub struct ClientSession {
    server: String,
    transport: Arc<dyn Transport>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    request_counter: AtomicU64,
    request_timeout: Duration,
    closed: AtomicBool,
}

/// Removes a pending entry when the waiting request goes away.
struct PendingSlot<'a> {
    session: &'a ClientSession,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.session.pending.lock().remove(&self.id);
    }
}

impl ClientSession {
    pub fn new(server: impl Into<String>, transport: Arc<dyn Transport>, request_timeout: Duration) -> Self {
        Self {
            server: server.into(),
            transport,
            pending: Mutex::new(HashMap::new()),
            request_counter: AtomicU64::new(1),
            request_timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    fn next_request_id(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a request and wait for the response.
    pub async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R, McpError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        if self.is_closed() {
            return Err(McpError::NotConnected(self.server.clone()));
        }

        let id = self.next_request_id();
        let request_json = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _slot = PendingSlot { session: self, id };

        debug!(server = %self.server, id = id, method = method, "Sending request");
        self.transport.send(&request_json).await?;

        let value = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply?,
            Ok(Err(_)) => return Err(TransportError::ConnectionClosed.into()),
            Err(_) => return Err(McpError::Timeout(self.request_timeout)),
        };

        serde_json::from_value(value)
            .map_err(|e| McpError::protocol(format!("Failed to parse {} result: {}", method, e)))
    }

    /// Send a notification (no response expected).
    pub async fn notify<P>(&self, method: &str, params: Option<P>) -> Result<(), McpError>
    where
        P: Serialize,
    {
        if self.is_closed() {
            return Err(McpError::NotConnected(self.server.clone()));
        }
        let notification_json = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.transport.send(&notification_json).await?;
        Ok(())
    }

    /// Run the protocol handshake.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        debug!(server = %self.server, "Initializing MCP session");

        let result: InitializeResult = self
            .request("initialize", Some(InitializeParams::default()))
            .await?;
        self.notify::<()>("notifications/initialized", None).await?;

        info!(
            server = %self.server,
            server_name = %result.server_info.name,
            protocol_version = %result.protocol_version,
            "MCP session initialized"
        );

        Ok(result)
    }

    /// Fetch every page of the server's tool list.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut cursor = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.take().map(|cursor| ListToolsParams { cursor: Some(cursor) });
            let page: ListToolsResult = self.request("tools/list", params).await?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        Err(McpError::protocol(format!(
            "tools/list did not finish within {} pages",
            MAX_TOOL_PAGES
        )))
    }

    /// Call a tool on the server.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult, McpError> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let result: CallToolResult = self.request("tools/call", Some(params)).await?;

        if result.is_error {
            warn!(server = %self.server, tool = name, "Tool returned error");
        }

        Ok(result)
    }

    pub async fn ping(&self) -> Result<(), McpError> {
        let _: Value = self.request::<(), _>("ping", None).await?;
        Ok(())
    }

    /// Read and route incoming messages until the transport fails.
    ///
    /// Returns the error that ended the stream. A clean end of stream is
    /// reported as a closed connection.
    pub async fn pump(&self) -> McpError {
        loop {
            match self.transport.receive().await {
                Ok(raw) => self.dispatch(&raw).await,
                Err(e) => {
                    debug!(server = %self.server, error = %e, "Session stream ended");
                    return e.into();
                }
            }
        }
    }

    async fn dispatch(&self, raw: &str) {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(server = %self.server, error = %e, "Discarding malformed message");
                return;
            }
        };

        match IncomingMessage::from_value(value) {
            Ok(IncomingMessage::Response(response)) => self.route_response(response),
            Ok(IncomingMessage::Request(request)) => self.answer_request(request).await,
            Ok(IncomingMessage::Notification(notification)) => {
                debug!(server = %self.server, method = %notification.method, "Server notification");
            }
            Err(e) => warn!(server = %self.server, error = %e, "Discarding message"),
        }
    }

    fn route_response(&self, response: JsonRpcResponse<Value>) {
        let Some(id) = response.id.as_u64() else {
            warn!(server = %self.server, id = ?response.id, "Response with foreign id");
            return;
        };

        let Some(waiter) = self.pending.lock().remove(&id) else {
            debug!(server = %self.server, id = id, "Response for abandoned request");
            return;
        };

        let reply = match (response.error, response.result) {
            (Some(error), _) => Err(McpError::server_error(error.code, error.message)),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        };
        let _ = waiter.send(reply);
    }

    async fn answer_request(&self, request: JsonRpcRequest<Value>) {
        let response = match request.method.as_str() {
            "ping" => JsonRpcResponse::success(request.id, serde_json::json!({})),
            other => {
                debug!(server = %self.server, method = other, "Rejecting server request");
                JsonRpcResponse::failure(request.id, JsonRpcError::method_not_found(other))
            }
        };

        let sent = match serde_json::to_string(&response) {
            Ok(json) => self.transport.send(&json).await.map_err(McpError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            warn!(server = %self.server, error = %e, "Failed to answer server request");
        }
    }

    /// Stop accepting requests and fail everything still waiting.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let waiters: Vec<_> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        for waiter in waiters {
            let _ = waiter.send(Err(McpError::NotConnected(self.server.clone())));
        }
        debug!(server = %self.server, "Session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    /// In-memory transport driven by a scripted peer.
    struct ChannelTransport {
        outgoing: mpsc::UnboundedSender<String>,
        incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn send(&self, message: &str) -> Result<(), TransportError> {
            self.outgoing
                .send(message.to_string())
                .map_err(|_| TransportError::ConnectionClosed)
        }

        async fn receive(&self) -> Result<String, TransportError> {
            self.incoming
                .lock()
                .await
                .recv()
                .await
                .ok_or(TransportError::ConnectionClosed)
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn pair() -> (Arc<ClientSession>, mpsc::UnboundedReceiver<String>, mpsc::UnboundedSender<String>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(ChannelTransport {
            outgoing: out_tx,
            incoming: tokio::sync::Mutex::new(in_rx),
        });
        let session = Arc::new(ClientSession::new("test", transport, Duration::from_secs(2)));
        (session, out_rx, in_tx)
    }

    #[tokio::test]
    async fn test_responses_routed_by_id() {
        let (session, mut sent, server) = pair();
        let pump_session = Arc::clone(&session);
        let pump = tokio::spawn(async move { pump_session.pump().await });

        let first = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.request::<(), Value>("a", None).await })
        };
        let second = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.request::<(), Value>("b", None).await })
        };

        let mut ids = HashMap::new();
        for _ in 0..2 {
            let msg: Value = serde_json::from_str(&sent.recv().await.unwrap()).unwrap();
            ids.insert(msg["method"].as_str().unwrap().to_string(), msg["id"].as_i64().unwrap());
        }

        // Answer out of order
        server
            .send(json!({"jsonrpc": "2.0", "id": ids["b"], "result": {"who": "b"}}).to_string())
            .unwrap();
        server
            .send(json!({"jsonrpc": "2.0", "id": ids["a"], "result": {"who": "a"}}).to_string())
            .unwrap();

        assert_eq!(first.await.unwrap().unwrap()["who"], "a");
        assert_eq!(second.await.unwrap().unwrap()["who"], "b");
        assert_eq!(session.pending_requests(), 0);

        drop(server);
        assert!(matches!(
            pump.await.unwrap(),
            McpError::Transport(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_server_error_response() {
        let (session, mut sent, server) = pair();
        let pump_session = Arc::clone(&session);
        tokio::spawn(async move { pump_session.pump().await });

        let call = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.request::<(), Value>("boom", None).await })
        };
        let msg: Value = serde_json::from_str(&sent.recv().await.unwrap()).unwrap();
        server
            .send(
                json!({"jsonrpc": "2.0", "id": msg["id"], "error": {"code": -32000, "message": "exploded"}})
                    .to_string(),
            )
            .unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::ServerError { code: -32000, .. }));
    }

    #[tokio::test]
    async fn test_answers_server_ping() {
        let (session, mut sent, server) = pair();
        let pump_session = Arc::clone(&session);
        tokio::spawn(async move { pump_session.pump().await });

        server
            .send(json!({"jsonrpc": "2.0", "id": "srv-9", "method": "ping"}).to_string())
            .unwrap();
        let reply: Value = serde_json::from_str(&sent.recv().await.unwrap()).unwrap();
        assert_eq!(reply["id"], "srv-9");
        assert_eq!(reply["result"], json!({}));

        server
            .send(json!({"jsonrpc": "2.0", "id": 5, "method": "sampling/createMessage"}).to_string())
            .unwrap();
        let reply: Value = serde_json::from_str(&sent.recv().await.unwrap()).unwrap();
        assert_eq!(reply["error"]["code"], JsonRpcError::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_tools_follows_cursor() {
        let (session, mut sent, server) = pair();
        let pump_session = Arc::clone(&session);
        tokio::spawn(async move { pump_session.pump().await });

        let listing = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.list_tools().await })
        };

        let first: Value = serde_json::from_str(&sent.recv().await.unwrap()).unwrap();
        assert!(first.get("params").is_none());
        server
            .send(
                json!({"jsonrpc": "2.0", "id": first["id"], "result": {
                    "tools": [{"name": "one", "inputSchema": {}}],
                    "nextCursor": "p2"
                }})
                .to_string(),
            )
            .unwrap();

        let second: Value = serde_json::from_str(&sent.recv().await.unwrap()).unwrap();
        assert_eq!(second["params"]["cursor"], "p2");
        server
            .send(
                json!({"jsonrpc": "2.0", "id": second["id"], "result": {
                    "tools": [{"name": "two", "inputSchema": {}}]
                }})
                .to_string(),
            )
            .unwrap();

        let tools = listing.await.unwrap().unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let (session, mut sent, _server) = pair();

        let call = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.request::<(), Value>("slow", None).await })
        };
        sent.recv().await.unwrap();
        session.close();

        assert!(matches!(call.await.unwrap(), Err(McpError::NotConnected(_))));
        assert!(matches!(
            session.request::<(), Value>("late", None).await,
            Err(McpError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_request_timeout_clears_pending() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(ChannelTransport {
            outgoing: out_tx,
            incoming: tokio::sync::Mutex::new(in_rx),
        });
        let session = ClientSession::new("test", transport, Duration::from_millis(20));

        let err = session.request::<(), Value>("never", None).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout(_)));
        assert_eq!(session.pending_requests(), 0);
    }
}
