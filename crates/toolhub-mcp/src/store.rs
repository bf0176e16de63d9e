//! External storage of server records.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::config::ServerEntry;
use crate::error::McpError;

/// A server record as kept by an external store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredServer {
    pub name: String,
    pub description: Option<String>,
    /// Inactive records are ignored when configuration is loaded.
    pub is_active: bool,
    pub entry: ServerEntry,
}

impl StoredServer {
    pub fn new(name: impl Into<String>, entry: ServerEntry) -> Self {
        Self {
            name: name.into(),
            description: None,
            is_active: true,
            entry,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Source of server records outside the static file.
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Every record, active or not.
    async fn list_servers(&self) -> Result<Vec<StoredServer>, McpError>;

    /// Active records only, keyed by name.
    async fn active_servers(&self) -> Result<HashMap<String, ServerEntry>, McpError> {
        Ok(self
            .list_servers()
            .await?
            .into_iter()
            .filter(|s| s.is_active)
            .map(|s| (s.name, s.entry))
            .collect())
    }
}

/// In-process store, used when no database is attached and in tests.
#[derive(Debug, Default)]
pub struct MemoryServerStore {
    servers: RwLock<HashMap<String, StoredServer>>,
}

impl MemoryServerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub fn upsert(&self, server: StoredServer) {
        self.servers.write().insert(server.name.clone(), server);
    }

    pub fn remove(&self, name: &str) -> Option<StoredServer> {
        self.servers.write().remove(name)
    }

    pub fn set_active(&self, name: &str, active: bool) -> bool {
        match self.servers.write().get_mut(name) {
            Some(server) => {
                server.is_active = active;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ServerStore for MemoryServerStore {
    async fn list_servers(&self) -> Result<Vec<StoredServer>, McpError> {
        Ok(self.servers.read().values().cloned().collect())
    }
}
