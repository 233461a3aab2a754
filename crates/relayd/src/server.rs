use crate::config::ServerConfig;
use crate::connection::{run_message_loop, Connection, Outbound, OUTBOUND_QUEUE};
use crate::error::RelaydError;
use crate::metrics::{counters, gauges};
use crate::registry::{PeerHandle, Registry};
use crate::upgrade::{read_request_head, validate_upgrade, RequestHead};
use relay_common::handshake;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Shared state for the relay server.
pub struct ServerState {
    /// Pairing table routing messages between session peers.
    pub registry: Registry,
    /// Runtime server configuration.
    pub config: ServerConfig,
    /// Live connection count for enforcing `max_conns`.
    pub active_connections: AtomicUsize,
}

impl ServerState {
    /// Builds server state around an empty registry.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            registry: Registry::new(),
            config,
            active_connections: AtomicUsize::new(0),
        }
    }
}

/// Run the accept loop until it fails.
///
/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), RelaydError> {
    let (shutdown_tx, _) = tokio::sync::watch::channel(());
    run_with_shutdown(listener, state, shutdown_tx).await
}

/// Run the accept loop with an externally-controlled shutdown signal.
///
/// When `shutdown_tx` is dropped the loop stops accepting new
/// connections and drains in-flight ones, up to a timeout.
///
/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run_with_shutdown(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown_tx: tokio::sync::watch::Sender<()>,
) -> Result<(), RelaydError> {
    let local_addr = listener.local_addr()?;
    info!("relay listening on {}", local_addr);
    let mut shutdown_rx = shutdown_tx.subscribe();
    let done = Arc::new(tokio::sync::Notify::new());
    let mut in_flight: usize = 0;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        if state.active_connections.load(Ordering::Relaxed) >= state.config.max_conns {
                            warn!("max connections reached, dropping {}", addr);
                            drop(stream);
                            continue;
                        }
                        state.active_connections.fetch_add(1, Ordering::Relaxed);
                        in_flight += 1;
                        let state = Arc::clone(&state);
                        let done = done.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, &state).await {
                                debug!("connection from {} ended: {}", addr, e);
                            }
                            state.active_connections.fetch_sub(1, Ordering::Relaxed);
                            done.notify_one();
                        });
                    }
                    Err(e) => error!("failed to accept connection: {}", e),
                }
            }
            _ = shutdown_rx.changed() => {
                info!("shutdown signal received, draining {} connections", in_flight);
                break;
            }
        }
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while in_flight > 0 {
        if tokio::time::timeout_at(deadline, done.notified()).await.is_err() {
            warn!("drain timeout reached with {} connections still active", in_flight);
            break;
        }
        in_flight = in_flight.saturating_sub(1);
    }

    info!("relay shut down");
    Ok(())
}

/// Dispatch one accepted connection: read the request head, then either
/// serve a plain response or upgrade and relay until the peer goes away.
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: &ServerState,
) -> Result<(), RelaydError> {
    let (mut reader, mut writer) = stream.into_split();

    let head_timeout = Duration::from_secs(state.config.upgrade_timeout);
    let (head, leftover) = match timeout(head_timeout, read_request_head(&mut reader)).await {
        Ok(parsed) => parsed?,
        Err(_) => {
            debug!(%peer_addr, "timed out reading request head");
            return Err(RelaydError::BadRequest("timed out reading request head"));
        }
    };

    if !head.is_upgrade() {
        return serve_plain(&head, &mut writer, state).await;
    }

    let params = match validate_upgrade(&head, &state.config.token) {
        Ok(params) => params,
        Err(rejection) => {
            counters::upgrades_total(rejection.reason);
            warn!(%peer_addr, reason = rejection.reason, "rejecting upgrade");
            let response = handshake::http_error(rejection.status, rejection.reason);
            let _ = writer.write_all(response.as_bytes()).await;
            let _ = writer.shutdown().await;
            return Ok(());
        }
    };

    let accept = handshake::compute_accept(&params.key);
    writer
        .write_all(handshake::switching_protocols(&accept).as_bytes())
        .await?;

    let (deliver_tx, mut deliver_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let connected_at = Instant::now();
    let displaced = state.registry.install(
        &params.session_id,
        params.role,
        PeerHandle {
            tx: deliver_tx,
            connected_at,
        },
    );
    if displaced {
        counters::replacements_total();
        debug!(session = %params.session_id, role = %params.role, "displaced previous peer");
    }
    counters::upgrades_total("accepted");
    gauges::inc_connections_active();
    gauges::sessions_active(state.registry.len());
    info!(session = %params.session_id, role = %params.role, %peer_addr, "peer attached");

    let mut conn = Connection::new(writer);
    let result = run_message_loop(
        &mut reader,
        &mut conn,
        &mut deliver_rx,
        leftover,
        forward_to_peer(state, &params.session_id, params.role),
    )
    .await;

    state
        .registry
        .clear_if(&params.session_id, params.role, connected_at);
    gauges::dec_connections_active();
    gauges::sessions_active(state.registry.len());
    info!(session = %params.session_id, role = %params.role, %peer_addr, "peer detached");

    result
}

/// Message callback for one connection: resolve the CURRENT opposite
/// peer on every message (it may have been replaced) and forward the
/// text verbatim. Delivery is fire-and-forget: no peer, no backpressure
/// room, or a dead peer task all mean the message is dropped.
fn forward_to_peer<'a>(
    state: &'a ServerState,
    session_id: &str,
    role: relay_common::Role,
) -> impl FnMut(String) + 'a {
    let session_id = session_id.to_string();
    move |text: String| match state.registry.peer(&session_id, role) {
        Some(peer) => {
            if peer.tx.try_send(Outbound::Text(text)).is_ok() {
                counters::messages_relayed_total();
            } else {
                counters::messages_dropped_total("backpressure");
                debug!(session = %session_id, "peer queue unavailable, message dropped");
            }
        }
        None => {
            counters::messages_dropped_total("no_peer");
            debug!(session = %session_id, "no peer attached, message dropped");
        }
    }
}

/// Answers a non-upgrade request: the in-band health endpoint reports
/// the live session count; everything else is a 404.
async fn serve_plain(
    head: &RequestHead,
    writer: &mut OwnedWriteHalf,
    state: &ServerState,
) -> Result<(), RelaydError> {
    let response = if head.method == "GET" && head.path == "/health" {
        let body =
            serde_json::json!({ "ok": true, "sessions": state.registry.len() }).to_string();
        handshake::http_response("200 OK", "application/json", &body)
    } else {
        handshake::http_error("404 Not Found", "not_found")
    };
    writer.write_all(response.as_bytes()).await?;
    writer.shutdown().await?;
    Ok(())
}
