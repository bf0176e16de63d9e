//! Registry and supervisor of tool server connections.
//!
//! The manager owns a [`JoinSet`] that every lifecycle task is spawned
//! into, and a root [`CancellationToken`] whose children are the
//! per-connection shutdown tokens. Dropping the manager aborts whatever is
//! still running, so no task outlives it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{load_server_file, merge_servers, ServerConfig, ServerEntry};
use crate::connection::{Connection, LifecycleState, ServerStatus};
use crate::error::McpError;
use crate::lifecycle;
use crate::protocol::{CallToolResult, ToolDescriptor};
use crate::store::ServerStore;
use crate::transport::TransportFactory;

/// Tunables for a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// JSON file listing servers under `mcp.servers`.
    pub config_path: PathBuf,
    /// How long `exit` waits for connections to close on their own.
    pub shutdown_grace: Duration,
    /// Per-request protocol timeout.
    pub request_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from(&toolhub_core::McpSettings::default())
    }
}

impl From<&toolhub_core::McpSettings> for ManagerConfig {
    fn from(settings: &toolhub_core::McpSettings) -> Self {
        Self {
            config_path: settings.config_path.clone(),
            shutdown_grace: Duration::from_secs(settings.shutdown_grace_secs),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
        }
    }
}

/// Outcome of [`ConnectionManager::exit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks that finished within the grace period.
    pub completed: usize,
    /// Tasks that had to be cancelled.
    pub forced: usize,
}

/// One server's entry in a [`survey`](ConnectionManager::survey).
#[derive(Debug, Clone, Serialize)]
pub struct ServerSurvey {
    #[serde(flatten)]
    pub status: ServerStatus,
    pub tools: Vec<ToolDescriptor>,
}

pub struct ConnectionManager {
    options: ManagerConfig,
    store: Option<Arc<dyn ServerStore>>,
    servers: RwLock<Arc<HashMap<String, ServerEntry>>>,
    registry: Mutex<HashMap<String, Arc<Connection>>>,
    tasks: Mutex<JoinSet<()>>,
    root: CancellationToken,
    closing: AtomicBool,
}

impl ConnectionManager {
    /// Create a manager with no servers loaded.
    pub fn new(options: ManagerConfig, store: Option<Arc<dyn ServerStore>>) -> Self {
        Self {
            options,
            store,
            servers: RwLock::new(Arc::new(HashMap::new())),
            registry: Mutex::new(HashMap::new()),
            tasks: Mutex::new(JoinSet::new()),
            root: CancellationToken::new(),
            closing: AtomicBool::new(false),
        }
    }

    /// Create a manager and load its configuration.
    pub async fn enter(
        options: ManagerConfig,
        store: Option<Arc<dyn ServerStore>>,
    ) -> Result<Self, McpError> {
        let manager = Self::new(options, store);
        manager.load_config().await?;
        Ok(manager)
    }

    /// Re-read the server file and store, replacing the configuration.
    ///
    /// Stored records win over file records with the same name. Existing
    /// connections keep the configuration they were created with.
    pub async fn load_config(&self) -> Result<usize, McpError> {
        let file = load_server_file(&self.options.config_path).await?;
        let stored = match &self.store {
            Some(store) => store.active_servers().await?,
            None => HashMap::new(),
        };

        let merged = merge_servers(file, stored);
        let count = merged.len();
        *self.servers.write() = Arc::new(merged);

        info!(
            path = %self.options.config_path.display(),
            servers = count,
            "Server configuration loaded"
        );
        Ok(count)
    }

    /// Names of all configured servers, sorted.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.servers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Raw configuration record of a server.
    pub fn server_entry(&self, name: &str) -> Option<ServerEntry> {
        self.servers.read().get(name).cloned()
    }

    /// Cached connection, without connecting.
    pub async fn connection(&self, name: &str) -> Option<Arc<Connection>> {
        self.registry.lock().await.get(name).cloned()
    }

    /// Get a ready connection to `name`, connecting if necessary.
    ///
    /// A healthy cached connection is returned as is. One that is still
    /// starting is shared and awaited. An unhealthy one is evicted and
    /// replaced. The returned connection may have failed during startup;
    /// check [`Connection::is_healthy`].
    pub async fn get_server(&self, name: &str) -> Result<Arc<Connection>, McpError> {
        let connection = {
            let mut registry = self.registry.lock().await;
            if self.closing.load(Ordering::SeqCst) {
                return Err(McpError::ShuttingDown);
            }

            let entry = self
                .server_entry(name)
                .ok_or_else(|| McpError::UnknownServer(name.to_string()))?;

            let cached = registry.get(name).cloned();
            match cached {
                Some(existing) if existing.is_healthy() => return Ok(existing),
                Some(existing) if existing.is_starting() => existing,
                Some(stale) => {
                    info!(server = name, state = %stale.state(), "Evicting unhealthy connection");
                    registry.remove(name);
                    stale.request_shutdown();
                    self.spawn_connection(&mut registry, name, &entry).await?
                }
                None => self.spawn_connection(&mut registry, name, &entry).await?,
            }
        };

        connection.wait_until_ready().await;
        Ok(connection)
    }

    async fn spawn_connection(
        &self,
        registry: &mut HashMap<String, Arc<Connection>>,
        name: &str,
        entry: &ServerEntry,
    ) -> Result<Arc<Connection>, McpError> {
        let config = ServerConfig::resolve(name, entry)?;
        let connector = TransportFactory::build(&config)?;
        let connection = Arc::new(Connection::new(config, self.root.child_token()));

        {
            let mut tasks = self.tasks.lock().await;
            while let Some(finished) = tasks.try_join_next() {
                log_join_result(finished);
            }
            tasks.spawn(lifecycle::run(
                Arc::clone(&connection),
                connector,
                self.options.request_timeout,
            ));
        }

        debug!(server = name, "Connection task spawned");
        registry.insert(name.to_string(), Arc::clone(&connection));
        Ok(connection)
    }

    /// Connect and call a tool, failing if the server could not start.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResult, McpError> {
        let connection = self.get_server(server).await?;
        if let Some(failure) = connection.last_error() {
            return Err(McpError::Unavailable {
                server: server.to_string(),
                reason: failure.to_string(),
            });
        }
        connection.invoke_tool(tool, arguments).await
    }

    /// Connect to every configured server and report its tools and status.
    ///
    /// A server that fails is reported with its error instead of aborting
    /// the survey.
    pub async fn survey(&self) -> Vec<ServerSurvey> {
        let names = self.server_names();
        let results = join_all(names.iter().map(|name| self.get_server(name))).await;

        names
            .into_iter()
            .zip(results)
            .map(|(name, result)| match result {
                Ok(connection) => ServerSurvey {
                    status: connection.status(),
                    tools: connection.list_tools(),
                },
                Err(e) => ServerSurvey {
                    status: ServerStatus {
                        name,
                        state: LifecycleState::Failed,
                        connected: false,
                        tool_count: 0,
                        error: Some(e.to_string()),
                        connected_at: None,
                    },
                    tools: Vec::new(),
                },
            })
            .collect()
    }

    /// Shut down and forget one cached connection.
    pub async fn remove_server(&self, name: &str) -> bool {
        match self.registry.lock().await.remove(name) {
            Some(connection) => {
                connection.request_shutdown();
                true
            }
            None => false,
        }
    }

    /// Ask every cached connection to shut down. Does not wait.
    pub async fn disconnect_all(&self) {
        let registry = self.registry.lock().await;
        for connection in registry.values() {
            connection.request_shutdown();
        }
        debug!(connections = registry.len(), "Requested shutdown of all connections");
    }

    /// Tear everything down within the grace period.
    ///
    /// Tasks still running when the grace period ends are cancelled.
    /// Problems are logged, never returned.
    pub async fn exit(&self) -> ShutdownReport {
        self.closing.store(true, Ordering::SeqCst);
        let connections: Vec<Arc<Connection>> = {
            let mut registry = self.registry.lock().await;
            registry.drain().map(|(_, connection)| connection).collect()
        };
        for connection in &connections {
            connection.request_shutdown();
        }
        // Reaches evicted connections that are no longer in the registry.
        self.root.cancel();

        let mut report = ShutdownReport::default();
        let mut tasks = self.tasks.lock().await;

        let drained = tokio::time::timeout(self.options.shutdown_grace, async {
            while let Some(result) = tasks.join_next().await {
                log_join_result(result);
                report.completed += 1;
            }
        })
        .await;

        if drained.is_err() {
            report.forced = tasks.len();
            warn!(
                remaining = report.forced,
                grace = ?self.options.shutdown_grace,
                "Connections did not close in time, cancelling"
            );
            tasks.shutdown().await;
        }

        // Cancelled tasks never reach a terminal state on their own.
        for connection in connections.iter().filter(|c| !c.state().is_terminal()) {
            connection.mark_closed();
        }

        info!(completed = report.completed, forced = report.forced, "Connection manager closed");
        report
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

fn log_join_result(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "Connection task panicked");
        } else {
            debug!(error = %e, "Connection task cancelled");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
