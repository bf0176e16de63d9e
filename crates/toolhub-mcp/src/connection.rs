//! A supervised connection to one tool server.
//!
//! A [`Connection`] is shared between the manager's registry, the
//! lifecycle task that drives it, and any number of callers. The lifecycle
//! task is the only writer of session, state and error; callers read those,
//! refresh the tool cache, and may request shutdown.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{ConnectionFailure, McpError};
use crate::protocol::{CallToolResult, InitializeResult, ServerCapabilities, ServerInfo, ToolDescriptor};
use crate::session::ClientSession;
use crate::signal::Latch;

/// Where a connection is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    OpeningTransport,
    BuildingSession,
    Initializing,
    Ready,
    ShuttingDown,
    Closed,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::OpeningTransport => write!(f, "opening transport"),
            Self::BuildingSession => write!(f, "building session"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::ShuttingDown => write!(f, "shutting down"),
            Self::Closed => write!(f, "closed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Point-in-time summary of a connection.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub state: LifecycleState,
    pub connected: bool,
    pub tool_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(error) => write!(f, "{} ({}): {}", self.name, self.state, error),
            None => write!(f, "{} ({}, {} tools)", self.name, self.state, self.tool_count),
        }
    }
}

/// One server's session plus everything learned from it.
pub struct Connection {
    config: ServerConfig,
    state: RwLock<LifecycleState>,
    session: RwLock<Option<Arc<ClientSession>>>,
    server_info: RwLock<Option<ServerInfo>>,
    capabilities: RwLock<Option<ServerCapabilities>>,
    tools: RwLock<HashMap<String, ToolDescriptor>>,
    last_error: RwLock<Option<ConnectionFailure>>,
    connected_at: RwLock<Option<DateTime<Utc>>>,
    ready: Latch,
    shutdown: CancellationToken,
}

impl Connection {
    /// Create an idle connection. `shutdown` is usually a child of the
    /// manager's root token.
    pub fn new(config: ServerConfig, shutdown: CancellationToken) -> Self {
        Self {
            config,
            state: RwLock::new(LifecycleState::Created),
            session: RwLock::new(None),
            server_info: RwLock::new(None),
            capabilities: RwLock::new(None),
            tools: RwLock::new(HashMap::new()),
            last_error: RwLock::new(None),
            connected_at: RwLock::new(None),
            ready: Latch::new(),
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().clone()
    }

    pub fn capabilities(&self) -> Option<ServerCapabilities> {
        self.capabilities.read().clone()
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        *self.connected_at.read()
    }

    /// The failure that ended this connection, if any.
    pub fn last_error(&self) -> Option<ConnectionFailure> {
        self.last_error.read().clone()
    }

    /// Wait until the connection is ready or has failed.
    ///
    /// Check [`last_error`](Self::last_error) or
    /// [`is_healthy`](Self::is_healthy) afterwards.
    pub async fn wait_until_ready(&self) {
        self.ready.wait().await;
    }

    /// Ask the lifecycle task to wind down. Does not wait.
    pub fn request_shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            debug!(server = %self.name(), "Shutdown requested");
            self.shutdown.cancel();
        }
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Still starting up: neither ready nor failed nor told to stop.
    pub fn is_starting(&self) -> bool {
        !self.ready.is_set() && !self.shutdown.is_cancelled()
    }

    /// Usable for calls right now.
    pub fn is_healthy(&self) -> bool {
        self.session.read().as_ref().is_some_and(|s| !s.is_closed())
            && self.ready.is_set()
            && self.last_error.read().is_none()
            && !self.shutdown.is_cancelled()
    }

    fn session(&self) -> Result<Arc<ClientSession>, McpError> {
        self.session
            .read()
            .as_ref()
            .filter(|s| !s.is_closed())
            .cloned()
            .ok_or_else(|| McpError::NotConnected(self.name().to_string()))
    }

    /// Re-fetch the server's tools and replace the cache wholesale.
    pub async fn refresh_tool_list(&self) -> Result<usize, McpError> {
        let session = self.session()?;
        let tools = session.list_tools().await?;
        let count = tools.len();

        let tools = tools.into_iter().map(|t| (t.name.clone(), t)).collect();
        *self.tools.write() = tools;

        debug!(server = %self.name(), tool_count = count, "Tool list refreshed");
        Ok(count)
    }

    /// Look up a cached tool.
    pub fn describe_tool(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.read().get(name).cloned()
    }

    /// All cached tools, sorted by name.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<_> = self.tools.read().values().cloned().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Call a cached tool and return the server's result unchanged.
    pub async fn invoke_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, McpError> {
        if !self.tools.read().contains_key(name) {
            return Err(McpError::UnknownTool(name.to_string()));
        }
        let session = self.session()?;

        debug!(server = %self.name(), tool = name, "Calling tool");
        session.call_tool(name, arguments).await
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            name: self.name().to_string(),
            state: self.state(),
            connected: self.is_healthy(),
            tool_count: self.tools.read().len(),
            error: self.last_error().map(|e| e.to_string()),
            connected_at: self.connected_at(),
        }
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn set_state(&self, state: LifecycleState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(server = %self.name(), from = %previous, to = %state, "Connection state changed");
        }
    }

    pub(crate) fn attach_session(&self, session: Arc<ClientSession>) {
        *self.session.write() = Some(session);
    }

    pub(crate) fn detach_session(&self) -> Option<Arc<ClientSession>> {
        self.session.write().take()
    }

    pub(crate) fn record_handshake(&self, result: InitializeResult) {
        *self.server_info.write() = Some(result.server_info);
        *self.capabilities.write() = Some(result.capabilities);
    }

    pub(crate) fn mark_ready(&self) {
        *self.connected_at.write() = Some(Utc::now());
        self.set_state(LifecycleState::Ready);
        self.ready.set();
        info!(server = %self.name(), tool_count = self.tools.read().len(), "Connection ready");
    }

    /// Terminal failure: record it and release everyone waiting.
    pub(crate) fn fail(&self, error: &McpError) {
        let failure = ConnectionFailure::classify(error);
        warn!(server = %self.name(), error = %failure, "Connection failed");

        *self.last_error.write() = Some(failure);
        self.set_state(LifecycleState::Failed);
        self.ready.set();
        self.shutdown.cancel();
    }

    pub(crate) fn mark_closed(&self) {
        self.set_state(LifecycleState::Closed);
        // Shutdown may arrive before the handshake finished.
        self.ready.set();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("tools", &self.tools.read().len())
            .field("last_error", &self.last_error())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerEntry;
    use crate::error::{FailureCategory, TransportError};

    fn connection() -> Connection {
        let config = ServerConfig::resolve("files", &ServerEntry::stdio("mcp-files", vec![])).unwrap();
        Connection::new(config, CancellationToken::new())
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LifecycleState::OpeningTransport.to_string(), "opening transport");
        assert_eq!(LifecycleState::Ready.to_string(), "ready");
        assert!(LifecycleState::Failed.is_terminal());
        assert!(!LifecycleState::ShuttingDown.is_terminal());
    }

    #[test]
    fn test_new_connection_is_starting_not_healthy() {
        let conn = connection();
        assert_eq!(conn.state(), LifecycleState::Created);
        assert!(conn.is_starting());
        assert!(!conn.is_healthy());
        assert!(conn.last_error().is_none());
    }

    #[tokio::test]
    async fn test_unknown_tool_checked_before_session() {
        let conn = connection();
        // No session attached: an uncached name must still be UnknownTool.
        let err = conn.invoke_tool("missing", None).await.unwrap_err();
        assert!(matches!(err, McpError::UnknownTool(ref name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_refresh_without_session() {
        let conn = connection();
        assert!(matches!(conn.refresh_tool_list().await, Err(McpError::NotConnected(_))));
    }

    #[tokio::test]
    async fn test_failure_releases_waiters() {
        let conn = Arc::new(connection());
        let waiter = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.wait_until_ready().await })
        };

        conn.fail(&McpError::Transport(TransportError::NotFound(404)));
        waiter.await.unwrap();

        assert_eq!(conn.state(), LifecycleState::Failed);
        assert!(conn.shutdown_requested());
        assert!(!conn.is_healthy());
        assert!(!conn.is_starting());

        let failure = conn.last_error().unwrap();
        assert_eq!(failure.category, FailureCategory::ResourceNotFound);
        assert_eq!(conn.status().error.as_deref(), Some("server not found: 404 Not Found"));
    }

    #[test]
    fn test_request_shutdown_is_idempotent() {
        let conn = connection();
        conn.request_shutdown();
        conn.request_shutdown();
        assert!(conn.shutdown_requested());
        assert!(!conn.is_starting());
    }
}
