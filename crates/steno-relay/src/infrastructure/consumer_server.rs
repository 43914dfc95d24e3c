//! Unix domain socket listener for local steno engines.
//!
//! Every accepted connection becomes a [`ChannelSink`] in the hub.  A Unix
//! stream socket does not keep message boundaries, so each chord packet is
//! written followed by [`STROKE_TERMINATOR`]:
//!
//! ```text
//! {S-} then {A}   →   01 00 42 00
//! ```
//!
//! Consumers split on the terminator ([`steno_core::split_strokes`]); the
//! group tags alone are ambiguous across chords.  Anything a consumer writes
//! to us is read and discarded so a hang-up is noticed promptly.

use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use steno_core::STROKE_TERMINATOR;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::{ChannelSink, FanoutHub};

/// Packets queued per consumer before it is considered stuck.
pub const CONSUMER_QUEUE_DEPTH: usize = 256;

const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Binds the consumer socket at `path` and serves until `running` is cleared.
///
/// A stale socket file at `path` is replaced; the file is removed on exit.
/// A regular file at `path` is never deleted.
///
/// # Parameters
///
/// - `path`    – filesystem path of the Unix socket.
/// - `hub`     – fan-out hub each accepted consumer is attached to.
/// - `running` – shared shutdown flag; clearing it stops the accept loop
///   within one poll interval.
///
/// # Errors
///
/// Returns an error if a stale file cannot be removed, `path` holds something
/// other than a socket, or the socket cannot be bound.
pub async fn run_consumer_server(
    path: &Path,
    hub: Arc<FanoutHub>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    remove_socket_file(path)
        .with_context(|| format!("failed to remove stale socket {}", path.display()))?;

    let listener = UnixListener::bind(path)
        .with_context(|| format!("failed to bind consumer socket {}", path.display()))?;
    info!("listening for consumers on {}", path.display());

    let result = serve_consumers(listener, hub, running).await;

    if let Err(e) = remove_socket_file(path) {
        warn!("failed to remove consumer socket {}: {e}", path.display());
    }
    result
}

/// Accept loop over an already-bound listener.
///
/// Each accepted stream is handled on its own task; the loop re-checks
/// `running` at least every 200 ms.
///
/// # Errors
///
/// Currently never fails; accept errors are logged and the loop continues.
pub async fn serve_consumers(
    listener: UnixListener,
    hub: Arc<FanoutHub>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping consumer accept loop");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, _addr))) => {
                let hub = Arc::clone(&hub);
                tokio::spawn(async move {
                    handle_consumer(stream, hub).await;
                });
            }
            Ok(Err(e)) => error!("consumer accept error: {e}"),
            Err(_) => {}
        }
    }

    Ok(())
}

/// Serves one consumer until it hangs up, a write fails, or the hub drops
/// its sink.
async fn handle_consumer(stream: UnixStream, hub: Arc<FanoutHub>) {
    let (mut reader, mut writer) = stream.into_split();

    // ── Step 1: register a queue-backed sink with the hub ───────────────────
    let (sink, mut packets) = ChannelSink::channel(CONSUMER_QUEUE_DEPTH);
    let id = hub.attach(Arc::new(sink));
    info!("consumer {id} attached ({} total)", hub.len());

    // ── Step 2: forward packets, watching the read half for hang-up ──────────
    let mut discard = [0u8; 64];
    let mut framed = Vec::with_capacity(8);
    loop {
        tokio::select! {
            packet = packets.recv() => {
                let Some(packet) = packet else { break };
                framed.clear();
                framed.extend_from_slice(&packet);
                framed.push(STROKE_TERMINATOR);
                if let Err(e) = writer.write_all(&framed).await {
                    debug!("consumer {id}: write failed: {e}");
                    break;
                }
            }

            read = reader.read(&mut discard) => {
                match read {
                    Ok(0) => {
                        debug!("consumer {id}: hung up");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!("consumer {id}: read failed: {e}");
                        break;
                    }
                }
            }
        }
    }

    // ── Step 3: leave the hub; later broadcasts skip this consumer ──────────
    hub.detach(id);
    info!("consumer {id} detached ({} remaining)", hub.len());
}

/// Removes a leftover socket at `path`.  Refuses to delete anything that is
/// not a socket.
fn remove_socket_file(path: &Path) -> std::io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => std::fs::remove_file(path),
        Ok(_) => Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "path exists and is not a socket",
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("sr-{tag}-{}", uuid::Uuid::new_v4().simple()))
    }

    #[test]
    fn test_remove_missing_socket_is_ok() {
        assert!(remove_socket_file(&scratch_path("missing")).is_ok());
    }

    #[test]
    fn test_remove_refuses_regular_file() {
        // Arrange
        let path = scratch_path("regular");
        std::fs::write(&path, b"not a socket").unwrap();

        // Act
        let result = remove_socket_file(&path);

        // Assert: the file survives
        assert!(result.is_err());
        assert!(path.exists());
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_remove_replaces_stale_socket() {
        let path = scratch_path("stale");
        let listener = UnixListener::bind(&path).unwrap();
        drop(listener);

        remove_socket_file(&path).unwrap();

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_consumer_receives_terminated_packets() {
        // Arrange
        let path = scratch_path("serve");
        let listener = UnixListener::bind(&path).unwrap();
        let hub = Arc::new(FanoutHub::new());
        let running = Arc::new(AtomicBool::new(true));
        let server = tokio::spawn(serve_consumers(
            listener,
            Arc::clone(&hub),
            Arc::clone(&running),
        ));

        let mut client = UnixStream::connect(&path).await.unwrap();
        for _ in 0..50 {
            if hub.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hub.len(), 1);

        // Act: {S-} then {A}, which would read as one chord unframed
        hub.broadcast(&[0x01]);
        hub.broadcast(&[0x42]);

        // Assert
        let mut buf = [0u8; 4];
        timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf, [0x01, STROKE_TERMINATOR, 0x42, STROKE_TERMINATOR]);

        // Hanging up detaches the consumer.
        drop(client);
        for _ in 0..50 {
            if hub.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(hub.is_empty());

        running.store(false, Ordering::Relaxed);
        server.await.unwrap().unwrap();
        std::fs::remove_file(&path).unwrap();
    }
}
