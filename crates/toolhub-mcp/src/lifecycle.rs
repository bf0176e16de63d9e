//! The task that drives one [`Connection`] from spawn to close.
//!
//! ```text
//! created -> opening transport -> building session -> initializing -> ready
//!         -> shutting down -> closed
//! any non-terminal state -> failed
//! ```
//!
//! The task pumps the session's incoming messages itself, both during the
//! handshake and while it waits for shutdown, so nothing outside the
//! manager's task set touches the transport. If the task is aborted, the
//! transport is dropped with it and subprocesses are killed on drop.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{Connection, LifecycleState};
use crate::error::McpError;
use crate::session::ClientSession;
use crate::transport::Connector;

/// Drive `connection` until shutdown is requested or its transport fails.
pub async fn run(connection: Arc<Connection>, connector: Box<dyn Connector>, request_timeout: Duration) {
    let shutdown = connection.shutdown_token();

    match drive(&connection, connector, request_timeout, &shutdown).await {
        Ok(()) => {
            connection.mark_closed();
            info!(server = %connection.name(), "Connection closed");
        }
        // Already recorded before the transport was closed.
        Err(_) if connection.state() == LifecycleState::Failed => {}
        Err(e) => connection.fail(&e),
    }
}

async fn drive(
    connection: &Connection,
    connector: Box<dyn Connector>,
    request_timeout: Duration,
    shutdown: &CancellationToken,
) -> Result<(), McpError> {
    connection.set_state(LifecycleState::OpeningTransport);
    let transport = tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        opened = connector.open() => opened?,
    };

    connection.set_state(LifecycleState::BuildingSession);
    let session = Arc::new(ClientSession::new(connection.name(), Arc::clone(&transport), request_timeout));
    connection.attach_session(Arc::clone(&session));

    let outcome = serve(connection, &session, shutdown).await;

    // Waiters are released before a possibly slow transport close.
    match &outcome {
        Ok(()) => connection.set_state(LifecycleState::ShuttingDown),
        Err(e) => connection.fail(e),
    }

    // Session first, then transport, on every exit path.
    session.close();
    connection.detach_session();
    if let Err(e) = transport.close().await {
        warn!(server = %connection.name(), error = %e, "Error closing transport");
    }
    debug!(server = %connection.name(), "Transport released");

    outcome
}

async fn serve(
    connection: &Connection,
    session: &ClientSession,
    shutdown: &CancellationToken,
) -> Result<(), McpError> {
    let pump = session.pump();
    tokio::pin!(pump);

    connection.set_state(LifecycleState::Initializing);
    tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        error = &mut pump => return Err(error),
        handshake = handshake(connection, session) => handshake?,
    }

    connection.mark_ready();

    // Any end of stream after the handshake is a failure, clean EOF included.
    tokio::select! {
        _ = shutdown.cancelled() => Ok(()),
        error = &mut pump => Err(error),
    }
}

async fn handshake(connection: &Connection, session: &ClientSession) -> Result<(), McpError> {
    let result = session.initialize().await?;
    connection.record_handshake(result);
    connection.refresh_tool_list().await?;
    Ok(())
}
