//! InputSession: one input-device connection from raw frames to packets.
//!
//! ```text
//! frame → SecureSession → ConnectionGate → ChordAccumulator → FanoutHub
//! ```
//!
//! Each connection owns its own accumulator, so two devices connected at the
//! same time never mix keys into each other's chords.

use std::net::SocketAddr;
use std::sync::Arc;

use steno_core::crypto::{Fingerprint, ServerIdentity};
use steno_core::domain::chord::ChordAccumulator;
use steno_core::protocol::KeyEvent;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::fanout::FanoutHub;
use crate::application::gate::ConnectionGate;
use crate::application::session::{FrameOutcome, SecureSession, SessionError};

/// What the connection loop should do after a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStep {
    /// Keep reading.
    Continue,
    /// Keys are agreed; ask for an accept decision for this fingerprint.
    RequestDecision(Fingerprint),
    /// The peer ended the stream; close cleanly.
    Finished,
}

/// Per-connection pipeline state.
#[derive(Debug)]
pub struct InputSession {
    id: Uuid,
    peer: SocketAddr,
    secure: SecureSession,
    gate: Arc<ConnectionGate>,
    chords: ChordAccumulator,
    hub: Arc<FanoutHub>,
}

impl InputSession {
    pub fn new(peer: SocketAddr, identity: Arc<ServerIdentity>, hub: Arc<FanoutHub>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            secure: SecureSession::new(identity),
            gate: Arc::new(ConnectionGate::new()),
            chords: ChordAccumulator::new(),
            hub,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// This connection's gate, for the decision task and the reject watcher.
    pub fn gate(&self) -> Arc<ConnectionGate> {
        Arc::clone(&self.gate)
    }

    pub fn secure(&self) -> &SecureSession {
        &self.secure
    }

    /// First frame to send to the peer.
    pub fn server_key_frame(&self) -> Vec<u8> {
        self.secure.server_key_frame()
    }

    /// Processes one inbound binary frame.
    ///
    /// Handshake frames advance the secure session.  A decrypted event passes
    /// the gate check, then the chord accumulator; a finished chord is
    /// broadcast to every consumer before this returns.  An event with an
    /// unknown key is logged and dropped without ending the session.
    ///
    /// # Returns
    ///
    /// - [`SessionStep::RequestDecision`] once, right after the peer key.
    /// - [`SessionStep::Finished`] when the peer ended the stream.
    /// - [`SessionStep::Continue`] otherwise.
    ///
    /// # Errors
    ///
    /// Returns the [`SessionError`] that closed the session.
    pub fn on_frame(&mut self, frame: &[u8]) -> Result<SessionStep, SessionError> {
        match self.secure.handle_frame(frame)? {
            FrameOutcome::PeerKeyAccepted { fingerprint } => {
                info!(
                    "connection {} ({}): peer fingerprint {fingerprint}",
                    self.id, self.peer
                );
                Ok(SessionStep::RequestDecision(fingerprint))
            }
            FrameOutcome::StreamReady => {
                debug!("connection {} ({}): stream ready", self.id, self.peer);
                Ok(SessionStep::Continue)
            }
            FrameOutcome::Event(event) => {
                self.on_event(&event);
                if self.secure.is_closed() {
                    Ok(SessionStep::Finished)
                } else {
                    Ok(SessionStep::Continue)
                }
            }
            FrameOutcome::Finished => Ok(SessionStep::Finished),
        }
    }

    fn on_event(&mut self, event: &KeyEvent) {
        // Pending and rejected connections are decrypted but not heard.
        if !self.gate.is_accepted() {
            debug!(
                "connection {} ({}): dropping {event} (not accepted)",
                self.id, self.peer
            );
            return;
        }

        debug!("connection {} ({}): {event}", self.id, self.peer);
        match self.chords.on_event(event) {
            Ok(Some(packet)) => {
                self.hub.broadcast(packet.as_bytes());
            }
            Ok(None) => {}
            Err(e) => warn!("connection {} ({}): {e}; event dropped", self.id, self.peer),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fanout::ChannelSink;
    use crate::application::gate::Decision;
    use steno_core::crypto::{ClientKeypair, EncryptContext, StreamTag};
    use steno_core::protocol::Half;
    use tokio::sync::mpsc;

    struct Harness {
        session: InputSession,
        device: EncryptContext,
        packets: mpsc::Receiver<Vec<u8>>,
    }

    impl Harness {
        /// A session past the handshake, gate still pending.
        fn handshaken() -> Self {
            let identity = Arc::new(ServerIdentity::generate());
            let hub = Arc::new(FanoutHub::new());
            let (sink, packets) = ChannelSink::channel(16);
            hub.attach(Arc::new(sink));

            let mut session =
                InputSession::new("127.0.0.1:40000".parse().unwrap(), identity.clone(), hub);
            let keypair = ClientKeypair::generate();
            let keys = keypair.session_keys(&identity.public_key_bytes()).unwrap();
            let (device, header) = EncryptContext::new(keys.tx());

            let step = session.on_frame(&keypair.public_key_bytes()).unwrap();
            assert!(matches!(step, SessionStep::RequestDecision(_)));
            assert_eq!(session.on_frame(&header), Ok(SessionStep::Continue));

            Self {
                session,
                device,
                packets,
            }
        }

        fn send(&mut self, event: KeyEvent) -> Result<SessionStep, SessionError> {
            let frame = self
                .device
                .encrypt(&event.to_json_bytes().unwrap(), StreamTag::Message);
            self.session.on_frame(&frame)
        }

        fn stroke(&mut self, half: Half, letter: &str) {
            self.send(KeyEvent::press(half, letter)).unwrap();
            self.send(KeyEvent::release(half, letter)).unwrap();
        }
    }

    #[test]
    fn test_fingerprint_step_matches_peer_key() {
        let identity = Arc::new(ServerIdentity::generate());
        let mut session = InputSession::new(
            "127.0.0.1:40000".parse().unwrap(),
            identity,
            Arc::new(FanoutHub::new()),
        );
        let keypair = ClientKeypair::generate();

        let step = session.on_frame(&keypair.public_key_bytes()).unwrap();

        assert_eq!(
            step,
            SessionStep::RequestDecision(Fingerprint::of(&keypair.public_key_bytes()))
        );
    }

    #[test]
    fn test_events_before_acceptance_are_dropped_without_desync() {
        // Arrange
        let mut h = Harness::handshaken();

        // Act: a full stroke while pending, then accept, then another stroke
        h.stroke(Half::Left, "S");
        assert!(h.packets.try_recv().is_err(), "nothing forwarded while pending");

        h.session.gate().resolve(Decision::Accept);
        h.stroke(Half::Left, "H");

        // Assert: only the post-acceptance chord {5} arrives
        assert_eq!(h.packets.try_recv().unwrap(), vec![0b0010_0000]);
        assert!(h.packets.try_recv().is_err());
    }

    #[test]
    fn test_accepted_session_emits_one_packet_per_chord() {
        let mut h = Harness::handshaken();
        h.session.gate().resolve(Decision::Accept);

        h.send(KeyEvent::press(Half::Left, "S")).unwrap();
        h.send(KeyEvent::press(Half::Left, "T")).unwrap();
        h.send(KeyEvent::release(Half::Left, "S")).unwrap();
        assert!(h.packets.try_recv().is_err(), "chord still in progress");
        h.send(KeyEvent::release(Half::Left, "T")).unwrap();

        assert_eq!(h.packets.try_recv().unwrap(), vec![0b0000_0011]);
    }

    #[test]
    fn test_unknown_key_keeps_connection_open() {
        let mut h = Harness::handshaken();
        h.session.gate().resolve(Decision::Accept);

        h.send(KeyEvent::press(Half::Left, "K")).unwrap();
        assert_eq!(
            h.send(KeyEvent::press(Half::Left, "Q")),
            Ok(SessionStep::Continue)
        );
        h.send(KeyEvent::release(Half::Left, "K")).unwrap();

        assert_eq!(h.packets.try_recv().unwrap(), vec![0b0000_0100]);
    }

    #[test]
    fn test_rejected_gate_never_forwards() {
        let mut h = Harness::handshaken();
        h.session.gate().resolve(Decision::Reject);

        h.stroke(Half::Right, "D");

        assert!(h.packets.try_recv().is_err());
    }

    #[test]
    fn test_final_frame_finishes_after_delivering_event() {
        let mut h = Harness::handshaken();
        h.session.gate().resolve(Decision::Accept);
        h.send(KeyEvent::press(Half::Left, "W")).unwrap();

        let frame = h.device.encrypt(
            &KeyEvent::release(Half::Left, "W").to_json_bytes().unwrap(),
            StreamTag::Final,
        );
        let step = h.session.on_frame(&frame);

        assert_eq!(step, Ok(SessionStep::Finished));
        assert_eq!(h.packets.try_recv().unwrap(), vec![0b0001_0000]);
    }

    #[test]
    fn test_tampered_frame_is_an_error() {
        let mut h = Harness::handshaken();
        let mut frame = h.device.encrypt(b"{}", StreamTag::Message);
        frame[1] ^= 0xFF;

        assert!(matches!(
            h.session.on_frame(&frame),
            Err(SessionError::Decryption(_))
        ));
    }

    #[test]
    fn test_each_session_has_its_own_chord_state() {
        // Two sessions on one hub: interleaved strokes do not merge.
        let identity = Arc::new(ServerIdentity::generate());
        let hub = Arc::new(FanoutHub::new());
        let (sink, mut packets) = ChannelSink::channel(16);
        hub.attach(Arc::new(sink));

        let mut devices = Vec::new();
        for port in [40001u16, 40002] {
            let addr = SocketAddr::from(([127, 0, 0, 1], port));
            let mut session = InputSession::new(addr, identity.clone(), Arc::clone(&hub));
            let keypair = ClientKeypair::generate();
            let keys = keypair.session_keys(&identity.public_key_bytes()).unwrap();
            let (device, header) = EncryptContext::new(keys.tx());
            session.on_frame(&keypair.public_key_bytes()).unwrap();
            session.on_frame(&header).unwrap();
            session.gate().resolve(Decision::Accept);
            devices.push((session, device));
        }

        let mut send = |i: usize, event: KeyEvent| {
            let (session, device) = &mut devices[i];
            let frame = device.encrypt(&event.to_json_bytes().unwrap(), StreamTag::Message);
            session.on_frame(&frame).unwrap();
        };

        send(0, KeyEvent::press(Half::Left, "S"));
        send(1, KeyEvent::press(Half::Left, "T"));
        send(0, KeyEvent::release(Half::Left, "S"));
        send(1, KeyEvent::release(Half::Left, "T"));

        assert_eq!(packets.try_recv().unwrap(), vec![0b0000_0001]);
        assert_eq!(packets.try_recv().unwrap(), vec![0b0000_0010]);
    }
}
