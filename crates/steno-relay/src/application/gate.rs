//! Connection gate: holds events back until the peer has been accepted.
//!
//! Each connection owns one [`ConnectionGate`].  It starts `Pending` and is
//! resolved exactly once by an [`AcceptDecisionSource`], which runs in its
//! own task so frame processing never waits on it.  Events decrypted while
//! the gate is still pending are dropped; decryption itself carries on so
//! the stream stays in step.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use steno_core::crypto::Fingerprint;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Answer from a decision source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// Gate state for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    Pending,
    Accepted,
    Rejected,
}

/// Something that can say yes or no to a new peer.
///
/// Infrastructure implementations prompt the operator; test implementations
/// answer from a script.
#[async_trait]
pub trait AcceptDecisionSource: Send + Sync {
    /// Decides whether the peer with `fingerprint` may send input.
    async fn request_decision(&self, fingerprint: &Fingerprint, peer: SocketAddr) -> Decision;
}

// ── Gate ──────────────────────────────────────────────────────────────────────

/// Set-once acceptance flag with change notification.
#[derive(Debug)]
pub struct ConnectionGate {
    state: watch::Sender<Acceptance>,
}

impl ConnectionGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Acceptance::Pending);
        Self { state }
    }

    pub fn acceptance(&self) -> Acceptance {
        *self.state.borrow()
    }

    pub fn is_accepted(&self) -> bool {
        self.acceptance() == Acceptance::Accepted
    }

    /// Records the decision.  Returns `false` if the gate was already
    /// resolved, in which case nothing changes.
    pub fn resolve(&self, decision: Decision) -> bool {
        self.state.send_if_modified(|state| {
            if *state != Acceptance::Pending {
                return false;
            }
            *state = match decision {
                Decision::Accept => Acceptance::Accepted,
                Decision::Reject => Acceptance::Rejected,
            };
            true
        })
    }

    /// Completes once the gate has been resolved to `Rejected`.  Never
    /// completes for an accepted connection.
    pub async fn rejected(&self) {
        let mut rx = self.state.subscribe();
        if rx
            .wait_for(|state| *state == Acceptance::Rejected)
            .await
            .is_err()
        {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for ConnectionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `source` for one connection and resolves `gate` with the answer.
///
/// Frame processing does not wait on this task; events that decrypt before
/// the gate opens are dropped by the caller.
///
/// # Parameters
///
/// - `source`      – decision chain built from the relay config.
/// - `gate`        – the connection's gate; resolved at most once.
/// - `fingerprint` – peer key fingerprint shown to whoever decides.
/// - `peer`        – remote address, for display and logs.
///
/// The returned handle should be aborted when the connection closes first.
/// Aborting cancels `request_decision` mid-await; a late answer is never
/// applied.
pub fn spawn_decision(
    source: Arc<dyn AcceptDecisionSource>,
    gate: Arc<ConnectionGate>,
    fingerprint: Fingerprint,
    peer: SocketAddr,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let decision = source.request_decision(&fingerprint, peer).await;
        if gate.resolve(decision) {
            info!("peer {peer} ({fingerprint}): {decision:?}");
        }
    })
}

// ── Decision sources ──────────────────────────────────────────────────────────

/// Accepts every peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl AcceptDecisionSource for AcceptAll {
    async fn request_decision(&self, _fingerprint: &Fingerprint, _peer: SocketAddr) -> Decision {
        Decision::Accept
    }
}

/// Accepts known fingerprints outright and asks `fallback` about the rest.
pub struct TrustList {
    trusted: HashSet<Fingerprint>,
    fallback: Arc<dyn AcceptDecisionSource>,
}

impl TrustList {
    /// # Parameters
    ///
    /// - `trusted`  – fingerprints accepted without asking.
    /// - `fallback` – consulted for every other peer.
    pub fn new(
        trusted: impl IntoIterator<Item = Fingerprint>,
        fallback: Arc<dyn AcceptDecisionSource>,
    ) -> Self {
        Self {
            trusted: trusted.into_iter().collect(),
            fallback,
        }
    }
}

#[async_trait]
impl AcceptDecisionSource for TrustList {
    async fn request_decision(&self, fingerprint: &Fingerprint, peer: SocketAddr) -> Decision {
        if self.trusted.contains(fingerprint) {
            info!("peer {peer}: fingerprint {fingerprint} is trusted");
            return Decision::Accept;
        }
        self.fallback.request_decision(fingerprint, peer).await
    }
}

/// Turns a decision that takes longer than `limit` into a rejection.
pub struct DecisionTimeout {
    inner: Arc<dyn AcceptDecisionSource>,
    limit: Duration,
}

impl DecisionTimeout {
    /// Wraps `inner`; an answer slower than `limit` counts as
    /// [`Decision::Reject`] and `inner`'s future is dropped.
    pub fn new(inner: Arc<dyn AcceptDecisionSource>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl AcceptDecisionSource for DecisionTimeout {
    async fn request_decision(&self, fingerprint: &Fingerprint, peer: SocketAddr) -> Decision {
        match tokio::time::timeout(self.limit, self.inner.request_decision(fingerprint, peer)).await
        {
            Ok(decision) => decision,
            Err(_) => {
                warn!(
                    "peer {peer}: no decision within {:?}; rejecting",
                    self.limit
                );
                Decision::Reject
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
