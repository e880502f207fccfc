//! Listener bootstrap and the accept loop.
//!
//! The accept loop is the single owner of the [`ConnectionRegistry`]. It
//! multiplexes three event sources:
//!
//! - new clients from the listener (registered, then handed to a supervisor),
//! - completion notices from supervisors (entry removed),
//! - the shutdown signal (stop accepting, drain, abort stragglers).

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::config::GatewayConfig;
use crate::connection::{ConnectionId, ConnectionOutcome, handle_connection};
use crate::error::{GatewayError, GatewayResult};
use crate::registry::ConnectionRegistry;

/// Totals reported when the accept loop exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServeSummary {
    /// Clients accepted over the lifetime of the loop.
    pub accepted: u64,
    /// Connections whose supervisor returned on its own.
    pub completed: u64,
    /// Connections still open at the drain deadline and aborted.
    pub aborted: usize,
}

/// Bind the gateway's listening socket.
///
/// # Errors
///
/// [`GatewayError::Bind`] if the address is unavailable.
pub async fn bind(addr: SocketAddr) -> GatewayResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| GatewayError::Bind { addr, source })
}

/// Accept clients until `shutdown` resolves, then drain.
///
/// After shutdown no new clients are accepted. Open connections get up to
/// `config.tuning.drain_timeout` to finish; any left after that are aborted,
/// which closes their sockets.
///
/// # Errors
///
/// Only fails if the listener cannot report its local address. Per-connection
/// failures never end the loop.
pub async fn serve<F>(
    listener: TcpListener,
    config: Arc<GatewayConfig>,
    shutdown: F,
) -> GatewayResult<ServeSummary>
where
    F: Future<Output = ()>,
{
    let local_addr = listener.local_addr()?;
    tracing::info!(
        listen = %local_addr,
        proxee = %config.proxee,
        guardian = %config.guardian,
        "chaperoned accepting connections"
    );

    let mut registry = ConnectionRegistry::new();
    let mut completed = 0u64;
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<(ConnectionId, ConnectionOutcome)>();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((client, peer)) => {
                        if let Err(e) = config.tuning.apply(&client) {
                            tracing::warn!(%peer, error = %e, "failed to configure client socket");
                        }

                        let conn_id = registry.register(peer);
                        tracing::info!(%conn_id, %peer, active = registry.len(), "new connection");

                        let config = Arc::clone(&config);
                        let closed_tx = closed_tx.clone();
                        let handle = tokio::spawn(async move {
                            let outcome = handle_connection(conn_id, client, &config).await;
                            // Only fails once the loop has given up on this connection.
                            let _ = closed_tx.send((conn_id, outcome));
                        });
                        registry.attach(conn_id, handle.abort_handle());
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to accept connection");
                    }
                }
            }

            Some((conn_id, outcome)) = closed_rx.recv() => {
                release(&mut registry, conn_id, outcome);
                completed += 1;
            }

            _ = &mut shutdown => {
                tracing::info!("shutdown signal received, stopping new connections");
                break;
            }
        }
    }

    drop(listener);

    tracing::info!(
        active_connections = registry.len(),
        timeout_secs = config.tuning.drain_timeout.as_secs(),
        "waiting for active connections to drain"
    );

    let deadline = tokio::time::sleep(config.tuning.drain_timeout);
    tokio::pin!(deadline);

    while !registry.is_empty() {
        tokio::select! {
            Some((conn_id, outcome)) = closed_rx.recv() => {
                release(&mut registry, conn_id, outcome);
                completed += 1;
            }
            _ = &mut deadline => {
                tracing::warn!(
                    active_connections = registry.len(),
                    "drain timeout reached, closing remaining connections"
                );
                break;
            }
        }
    }

    let aborted = registry.abort_all();
    if aborted == 0 {
        tracing::info!("all connections drained, shutting down cleanly");
    }

    Ok(ServeSummary {
        accepted: registry.issued(),
        completed,
        aborted,
    })
}

fn release(registry: &mut ConnectionRegistry, conn_id: ConnectionId, outcome: ConnectionOutcome) {
    match registry.remove(conn_id) {
        Some(entry) => tracing::info!(
            %conn_id,
            %outcome,
            peer = %entry.peer,
            duration_ms = entry.age_ms(),
            active = registry.len(),
            "handle returned"
        ),
        None => tracing::warn!(%conn_id, "completion for unknown connection"),
    }
}

/// Resolve on SIGINT, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
        tracing::info!("received SIGINT, initiating graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("received SIGTERM, initiating graceful shutdown");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
