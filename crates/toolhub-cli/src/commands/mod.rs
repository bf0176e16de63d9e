//! CLI command implementations.

pub mod call;
pub mod config;
pub mod servers;
pub mod tools;

use std::future::Future;
use std::sync::Arc;

use toolhub_core::Settings;
use toolhub_mcp::{ConnectionManager, ManagerConfig};

/// Open a manager, run `f` against it, and always tear it down.
pub async fn with_manager<F, Fut, T>(settings: &Settings, f: F) -> anyhow::Result<T>
where
    F: FnOnce(Arc<ConnectionManager>) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let options = ManagerConfig::from(&settings.mcp);
    let manager = ConnectionManager::enter(options, None)
        .await
        .map_err(toolhub_core::Error::from)?;
    let manager = Arc::new(manager);

    let result = f(Arc::clone(&manager)).await;

    let report = manager.exit().await;
    if report.forced > 0 {
        tracing::warn!(forced = report.forced, "Some servers had to be cancelled");
    }
    result
}
