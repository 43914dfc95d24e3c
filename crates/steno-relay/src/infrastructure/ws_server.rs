//! WebSocket server for input devices: accept loop and per-connection task.
//!
//! For each connection this module:
//!
//! 1. Completes the WebSocket upgrade.
//! 2. Sends the server public key as the first binary frame.
//! 3. Feeds every inbound binary frame to an [`InputSession`].
//! 4. Spawns the accept decision as soon as the peer key arrives, and closes
//!    the connection if that decision comes back as a rejection.
//!
//! Any session error closes the connection without telling the peer why.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{anyhow, Context};
use futures_util::{SinkExt, StreamExt};
use steno_core::crypto::ServerIdentity;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};

use crate::application::{
    spawn_decision, AcceptDecisionSource, FanoutHub, InputSession, SessionStep,
};

/// How often the accept loop re-checks the running flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Shared state handed to every input connection.
#[derive(Clone)]
pub struct InputContext {
    /// Process-wide key pair; its public half opens every connection.
    pub identity: Arc<ServerIdentity>,
    /// Where finished chords go.
    pub hub: Arc<FanoutHub>,
    /// Decides whether a newly keyed peer may type.
    pub decisions: Arc<dyn AcceptDecisionSource>,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `addr` and serves input devices until `running` is cleared.
///
/// Each accepted connection runs on its own Tokio task, so a slow or
/// undecided device never holds up the others.
///
/// # Parameters
///
/// - `addr`    – TCP address for the WebSocket listener.
/// - `ctx`     – identity, hub, and decision source shared by all connections.
/// - `running` – shared flag; the loop exits within 200 ms of it going `false`.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound (port in use, or no
/// permission to bind).
pub async fn run_ws_server(
    addr: SocketAddr,
    ctx: InputContext,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {addr}"))?;

    info!("listening for input devices on ws://{addr}");
    serve(listener, ctx, running).await
}

/// Accept loop over an already-bound listener.
///
/// Split out of [`run_ws_server`] so callers can bind port 0 and learn the
/// address first.
///
/// # Errors
///
/// Currently never fails; accept errors are logged and the loop continues.
pub async fn serve(
    listener: TcpListener,
    ctx: InputContext,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping input accept loop");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                debug!("new input connection from {peer}");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    handle_input_connection(stream, peer, ctx).await;
                });
            }
            Ok(Err(e)) => {
                error!("accept error: {e}");
            }
            Err(_) => {
                // Poll timeout; loop back to check the running flag.
            }
        }
    }

    Ok(())
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Per-connection task entry point: runs [`run_connection`] and logs how it
/// ended.
async fn handle_input_connection(stream: TcpStream, peer: SocketAddr, ctx: InputContext) {
    match run_connection(stream, peer, ctx).await {
        Ok(()) => info!("input connection {peer} closed"),
        Err(e) => warn!("input connection {peer} closed with error: {e:#}"),
    }
}

/// Runs the full lifecycle of one input connection.
///
/// 1. Completes the WebSocket upgrade.
/// 2. Sends the server public key.
/// 3. Feeds binary frames to the [`InputSession`] until the peer leaves, the
///    stream finishes, a frame fails, or the gate reports a rejection.
/// 4. Cancels a still-pending accept decision and sends a bare Close.
///
/// # Errors
///
/// Returns an error if the upgrade fails, the server key cannot be sent, a
/// text frame arrives, or the session reports a fatal error.
async fn run_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: InputContext,
) -> anyhow::Result<()> {
    // ── Step 1: Complete the WebSocket handshake ───────────────────────────────
    let ws_stream = accept_async(stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer}"))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let mut session = InputSession::new(peer, Arc::clone(&ctx.identity), Arc::clone(&ctx.hub));
    let gate = session.gate();
    let id = session.id();
    info!("connection {id} ({peer}): WebSocket session established");

    // ── Step 2: Server key goes out first, unencrypted ─────────────────────────
    ws_tx
        .send(WsMessage::Binary(session.server_key_frame()))
        .await
        .with_context(|| format!("connection {id}: failed to send server key"))?;

    // ── Step 3: Frame loop, racing the accept decision ─────────────────────────
    let mut decision: Option<JoinHandle<()>> = None;

    let result = loop {
        tokio::select! {
            _ = gate.rejected() => {
                info!("connection {id} ({peer}): rejected by operator");
                break Ok(());
            }

            next = ws_rx.next() => {
                let frame = match next {
                    Some(Ok(WsMessage::Binary(frame))) => frame,
                    Some(Ok(WsMessage::Text(_))) => {
                        break Err(anyhow!("text frame on a binary-only channel"));
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        debug!("connection {id}: peer closed");
                        break Ok(());
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {
                        continue;
                    }
                    Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                        debug!("connection {id}: WebSocket closed");
                        break Ok(());
                    }
                    Some(Err(e)) => break Err(e.into()),
                };

                match session.on_frame(&frame) {
                    Ok(SessionStep::RequestDecision(fingerprint)) => {
                        decision = Some(spawn_decision(
                            Arc::clone(&ctx.decisions),
                            Arc::clone(&gate),
                            fingerprint,
                            peer,
                        ));
                    }
                    Ok(SessionStep::Continue) => {}
                    Ok(SessionStep::Finished) => {
                        info!("connection {id} ({peer}): stream finished by peer");
                        break Ok(());
                    }
                    Err(e) if e.is_fatal() => {
                        break Err(anyhow::Error::new(e).context(format!("connection {id}")));
                    }
                    Err(e) => warn!("connection {id} ({peer}): {e}"),
                }
            }
        }
    };

    // ── Step 4: Tear down ──────────────────────────────────────────────────────
    // An open operator question for this peer is withdrawn by the abort.
    if let Some(task) = decision {
        task.abort();
    }
    // Best effort; the peer may already be gone.
    let _ = ws_tx.send(WsMessage::Close(None)).await;

    result
}
