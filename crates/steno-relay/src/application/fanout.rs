//! Fan-out of finished chord packets to every attached local consumer.
//!
//! Consumers attach and detach at any time.  A broadcast works on a snapshot
//! of the consumer set, so attach/detach during a broadcast is safe, and a
//! consumer whose write fails is detached without affecting the others.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifies one attached consumer.
pub type ConsumerId = Uuid;

/// Why a packet could not be handed to a consumer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerWriteError {
    /// The consumer's connection is gone.
    #[error("consumer disconnected")]
    Disconnected,
    /// The consumer stopped reading and its queue is full.
    #[error("consumer queue is full")]
    Backlogged,
}

/// Destination for chord packets.
///
/// `send` must not block; implementations queue the packet for their own
/// writer.
pub trait ConsumerSink: Send + Sync {
    fn send(&self, packet: &[u8]) -> Result<(), ConsumerWriteError>;
}

/// A sink backed by a bounded channel drained by a socket writer task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelSink {
    /// Creates a sink and the receiver its writer task reads from.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl ConsumerSink for ChannelSink {
    fn send(&self, packet: &[u8]) -> Result<(), ConsumerWriteError> {
        self.tx.try_send(packet.to_vec()).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => ConsumerWriteError::Disconnected,
            mpsc::error::TrySendError::Full(_) => ConsumerWriteError::Backlogged,
        })
    }
}

/// The set of attached consumers.
#[derive(Default)]
pub struct FanoutHub {
    consumers: Mutex<HashMap<ConsumerId, Arc<dyn ConsumerSink>>>,
}

impl FanoutHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a consumer and returns its id.
    pub fn attach(&self, sink: Arc<dyn ConsumerSink>) -> ConsumerId {
        let id = Uuid::new_v4();
        self.lock().insert(id, sink);
        id
    }

    /// Removes a consumer.  Returns `false` if it was already gone.
    pub fn detach(&self, id: ConsumerId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Number of attached consumers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sends `packet` to every consumer and returns how many accepted it.
    ///
    /// Consumers that fail are detached; the rest still receive the packet.
    /// Empty packets are never sent.
    ///
    /// # Parameters
    ///
    /// - `packet` – one complete encoded chord.  Transport framing is the
    ///   consumer writer's job.
    ///
    /// Never blocks: sinks only queue.  The registry lock is not held while
    /// sinks run, so a sink may attach or detach consumers itself.
    pub fn broadcast(&self, packet: &[u8]) -> usize {
        if packet.is_empty() {
            return 0;
        }

        // ── Step 1: snapshot the registry ───────────────────────────────────
        let snapshot: Vec<(ConsumerId, Arc<dyn ConsumerSink>)> = self
            .lock()
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect();

        // ── Step 2: offer the packet to each sink ───────────────────────────
        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, sink) in snapshot {
            match sink.send(packet) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("consumer {id}: {e}; detaching");
                    failed.push(id);
                }
            }
        }

        // ── Step 3: drop the consumers that failed ──────────────────────────
        if !failed.is_empty() {
            let mut consumers = self.lock();
            for id in failed {
                consumers.remove(&id);
            }
        }

        debug!("broadcast {} byte packet to {delivered} consumer(s)", packet.len());
        delivered
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConsumerId, Arc<dyn ConsumerSink>>> {
        self.consumers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for FanoutHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutHub")
            .field("consumers", &self.len())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
