use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::error::NattersError;
use crate::notify::NotificationDispatcher;
use crate::registry::SessionRegistry;
use crate::router::MessageRouter;
use crate::store::FriendStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Maximum number of connections allowed to sit in the login handshake at once.
pub const MAX_PENDING_LOGINS: usize = 1000;

/// How long shutdown waits for open connections to close.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for the messaging server.
pub struct ServerState {
    /// Identity → connection table; the single source of presence.
    pub registry: SessionRegistry,
    /// Friend graph backend.
    pub store: Arc<dyn FriendStore>,
    /// Token validator used by the handshake and the HTTP API.
    pub auth: Arc<dyn Authenticator>,
    /// Runtime server configuration.
    pub config: ServerConfig,
    /// Open WebSocket connections, authenticated or not.
    pub active_connections: AtomicUsize,
    /// Semaphore to limit connections still in the login handshake.
    pub pending_logins: Semaphore,
}

impl ServerState {
    /// Build server state around the given store and authenticator.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn FriendStore>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            store,
            auth,
            config,
            active_connections: AtomicUsize::new(0),
            pending_logins: Semaphore::new(MAX_PENDING_LOGINS),
        }
    }

    /// Message router over this state's registry and store.
    #[must_use]
    pub fn router(&self) -> MessageRouter<'_> {
        MessageRouter::new(&self.registry, self.store.as_ref(), self.config.chat_alerts)
    }

    /// Notification dispatcher over this state's registry and store.
    #[must_use]
    pub fn dispatcher(&self) -> NotificationDispatcher<'_> {
        NotificationDispatcher::new(&self.registry, self.store.as_ref())
    }
}

/// Counts an open connection for as long as it lives.
struct ConnectionSlot(Arc<ServerState>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), NattersError> {
    let (shutdown_tx, _) = tokio::sync::watch::channel(());
    run_with_shutdown(listener, state, shutdown_tx).await
}

/// Run the server accept loop with an externally-controlled shutdown signal.
///
/// When `shutdown_tx` sends or is dropped, the accept loop stops accepting
/// new connections and waits for in-flight connections to finish.
///
/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run_with_shutdown(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown_tx: tokio::sync::watch::Sender<()>,
) -> Result<(), NattersError> {
    let local_addr = listener.local_addr().map_err(NattersError::Io)?;
    info!("server listening on {}", local_addr);
    let mut shutdown_rx = shutdown_tx.subscribe();
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        if state.active_connections.fetch_add(1, Ordering::Relaxed) >= state.config.max_conns {
                            state.active_connections.fetch_sub(1, Ordering::Relaxed);
                            warn!("max connections reached, rejecting {}", addr);
                            drop(stream);
                            continue;
                        }
                        let slot = ConnectionSlot(Arc::clone(&state));
                        let state = Arc::clone(&state);
                        let conn_shutdown = shutdown_tx.subscribe();
                        tasks.spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, state, conn_shutdown).await {
                                tracing::debug!("connection from {} closed: {}", addr, e);
                            }
                            drop(slot);
                        });
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                }
            }
            // Reap finished connection tasks so the set only holds live ones.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            _ = shutdown_rx.changed() => {
                info!("shutdown signal received, draining {} connections", tasks.len());
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (with timeout)
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while !tasks.is_empty() {
        if tokio::time::timeout_at(deadline, tasks.join_next())
            .await
            .is_err()
        {
            warn!(
                "drain timeout reached with {} connections still active, aborting",
                tasks.len()
            );
            tasks.abort_all();
            break;
        }
    }

    info!("server shut down gracefully");
    Ok(())
}
