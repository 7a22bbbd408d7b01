//! Serving with a bounded graceful drain.
//!
//! The accept loop is owned here so every connection task is tracked. On
//! SIGINT/SIGTERM the listener is dropped, each connection is told to finish
//! its in-flight request and close, and the process waits up to the grace
//! period. Connection tasks still running after that are aborted, which
//! drops their sockets.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::{Extension, Router};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How the server stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// All connections finished inside the grace period.
    Drained,
    /// The grace period elapsed and the remaining connections were aborted.
    ForcedClose,
}

/// Serve `app` until `signal` resolves, then drain for at most `grace`.
///
/// Returns an error if the listener fails before any signal arrives.
pub async fn serve_until<F>(
    listener: TcpListener,
    app: Router,
    signal: F,
    grace: Duration,
) -> anyhow::Result<ShutdownOutcome>
where
    F: Future<Output = ()>,
{
    let (stop_tx, _) = watch::channel(false);
    let mut connections = JoinSet::new();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    let service = app.clone().layer(Extension(ConnectInfo(remote_addr)));
                    connections.spawn(serve_connection(
                        stream,
                        remote_addr,
                        service,
                        stop_tx.subscribe(),
                    ));
                }
                Err(e) if is_transient(&e) => {
                    debug!(error = %e, "Accept failed, continuing");
                }
                Err(e) => {
                    error!(error = %e, "Server error");
                    // Dropping the set aborts every open connection.
                    return Err(e.into());
                }
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "Connection task failed");
                }
            }
            _ = &mut signal => break,
        }
    }

    drop(listener);
    info!(
        grace_secs = grace.as_secs_f64(),
        open_connections = connections.len(),
        "Start shutdown"
    );
    let _ = stop_tx.send(true);

    let drained = tokio::time::timeout(grace, drain(&mut connections))
        .await
        .is_ok();
    if drained {
        info!("Server stopped");
        return Ok(ShutdownOutcome::Drained);
    }

    warn!(
        open_connections = connections.len(),
        "Graceful shutdown did not complete, closing remaining connections"
    );
    connections.abort_all();
    drain(&mut connections).await;
    Ok(ShutdownOutcome::ForcedClose)
}

/// Drive one connection until it ends, switching to a graceful close once
/// `stop` flips.
async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    app: Router,
    mut stop: watch::Receiver<bool>,
) {
    let builder = Builder::new(TokioExecutor::new());
    let conn =
        builder.serve_connection_with_upgrades(TokioIo::new(stream), TowerToHyperService::new(app));
    tokio::pin!(conn);

    let mut closing = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!(%remote_addr, error = %e, "Connection closed with error");
                }
                return;
            }
            _ = stop.changed(), if !closing => {
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

async fn drain(connections: &mut JoinSet<()>) {
    while connections.join_next().await.is_some() {}
}

/// Per-connection accept failures that leave the listener usable.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(signal = "SIGINT", "Received shutdown signal"),
        _ = terminate => info!(signal = "SIGTERM", "Received shutdown signal"),
    }
}
