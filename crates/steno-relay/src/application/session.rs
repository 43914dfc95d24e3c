//! Per-connection secure session: handshake, then in-order decryption.
//!
//! ```text
//! AwaitingPeerKey ──peer key──▶ AwaitingHeader ──header──▶ Streaming ──▶ Closed
//!        │                            │                        │
//!        └──────────── any error ─────┴────────────────────────┴──────▶ Closed
//! ```
//!
//! The state machine is pure: it consumes raw frame bytes and reports what
//! happened.  Sending the server key, asking for an accept decision, and
//! closing the socket are the caller's job.
//!
//! Every error is fatal.  Once a frame fails, the session is `Closed` and
//! refuses all further input; there is no resynchronization.

use std::sync::Arc;

use steno_core::crypto::{
    CryptoError, DecryptContext, Fingerprint, PeerPublicKey, ServerIdentity, SessionKey,
    StreamTag,
};
use steno_core::protocol::{KeyEvent, ProtocolError};
use thiserror::Error;

/// Errors that end a secure session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The first inbound frame was not a public key of the right size.
    #[error("invalid peer key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Key agreement or stream initialization failed.
    #[error("handshake failed: {0}")]
    Handshake(#[source] CryptoError),

    /// A ciphertext frame did not authenticate.
    #[error("decryption failed: {0}")]
    Decryption(#[source] CryptoError),

    /// A frame authenticated but its plaintext is not a key event.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[source] ProtocolError),

    /// A frame arrived after the session ended.
    #[error("session is closed")]
    Closed,
}

impl SessionError {
    /// Whether the connection must be dropped.  Always true today; callers
    /// check it rather than assuming, so a recoverable variant can be added.
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::InvalidKeyLength { .. }
            | SessionError::Handshake(_)
            | SessionError::Decryption(_)
            | SessionError::MalformedPayload(_)
            | SessionError::Closed => true,
        }
    }
}

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingPeerKey,
    AwaitingHeader,
    Streaming,
    Closed,
}

/// What one inbound frame did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The peer key was accepted and session keys derived.  The caller should
    /// request an accept decision for `fingerprint`.
    PeerKeyAccepted { fingerprint: Fingerprint },
    /// The stream header was accepted; ciphertext frames follow.
    StreamReady,
    /// A key event was decrypted.  If the frame carried the final tag the
    /// session is now closed.
    Event(KeyEvent),
    /// The peer ended the stream with an empty final frame.
    Finished,
}

enum State {
    AwaitingPeerKey,
    AwaitingHeader { rx: SessionKey },
    Streaming { stream: DecryptContext },
    Closed,
}

/// Receive-only encrypted channel for one input-device connection.
///
/// Only the receive half of the derived key pair is kept; nothing is ever
/// encrypted toward the peer.
pub struct SecureSession {
    identity: Arc<ServerIdentity>,
    state: State,
}

impl SecureSession {
    pub fn new(identity: Arc<ServerIdentity>) -> Self {
        Self {
            identity,
            state: State::AwaitingPeerKey,
        }
    }

    /// The server public key to send, unencrypted, when the connection opens.
    pub fn server_key_frame(&self) -> Vec<u8> {
        self.identity.public_key_bytes().to_vec()
    }

    pub fn phase(&self) -> SessionPhase {
        match self.state {
            State::AwaitingPeerKey => SessionPhase::AwaitingPeerKey,
            State::AwaitingHeader { .. } => SessionPhase::AwaitingHeader,
            State::Streaming { .. } => SessionPhase::Streaming,
            State::Closed => SessionPhase::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Feeds the next inbound frame through the state machine.
    ///
    /// | Phase           | Frame is        | Outcome             |
    /// |-----------------|-----------------|---------------------|
    /// | AwaitingPeerKey | 32-byte key     | `PeerKeyAccepted`   |
    /// | AwaitingHeader  | 24-byte header  | `StreamReady`       |
    /// | Streaming       | sealed event    | `Event` / `Finished`|
    ///
    /// # Errors
    ///
    /// Any [`SessionError`]; the session is `Closed` afterwards.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Result<FrameOutcome, SessionError> {
        let state = std::mem::replace(&mut self.state, State::Closed);
        let (next, outcome) = self.step(state, frame)?;
        self.state = next;
        Ok(outcome)
    }

    /// Closes the session.  Later frames fail with [`SessionError::Closed`].
    pub fn close(&mut self) {
        self.state = State::Closed;
    }

    fn step(&self, state: State, frame: &[u8]) -> Result<(State, FrameOutcome), SessionError> {
        match state {
            State::AwaitingPeerKey => {
                let peer = PeerPublicKey::from_slice(frame).map_err(|e| match e {
                    CryptoError::InvalidKeyLength { expected, actual } => {
                        SessionError::InvalidKeyLength { expected, actual }
                    }
                    other => SessionError::Handshake(other),
                })?;
                let keys = self
                    .identity
                    .session_keys(&peer)
                    .map_err(SessionError::Handshake)?;
                Ok((
                    State::AwaitingHeader {
                        rx: keys.into_receive_key(),
                    },
                    FrameOutcome::PeerKeyAccepted {
                        fingerprint: peer.fingerprint(),
                    },
                ))
            }

            State::AwaitingHeader { rx } => {
                let stream = DecryptContext::init(frame, &rx).map_err(SessionError::Handshake)?;
                Ok((State::Streaming { stream }, FrameOutcome::StreamReady))
            }

            State::Streaming { mut stream } => {
                let opened = stream.decrypt(frame).map_err(SessionError::Decryption)?;
                let last = opened.tag == StreamTag::Final;

                if last && opened.plaintext.is_empty() {
                    return Ok((State::Closed, FrameOutcome::Finished));
                }

                let event = KeyEvent::from_json_bytes(&opened.plaintext)
                    .map_err(SessionError::MalformedPayload)?;
                let next = if last {
                    State::Closed
                } else {
                    State::Streaming { stream }
                };
                Ok((next, FrameOutcome::Event(event)))
            }

            State::Closed => Err(SessionError::Closed),
        }
    }
}

impl std::fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use steno_core::crypto::{ClientKeypair, EncryptContext, HEADER_LEN, PUBLIC_KEY_LEN};
    use steno_core::protocol::Half;

    /// An input device that has completed key agreement with `identity`.
    struct Device {
        keypair: ClientKeypair,
        stream: EncryptContext,
        header: [u8; HEADER_LEN],
    }

    impl Device {
        fn new(identity: &ServerIdentity) -> Self {
            let keypair = ClientKeypair::generate();
            let keys = keypair
                .session_keys(&identity.public_key_bytes())
                .unwrap();
            let (stream, header) = EncryptContext::new(keys.tx());
            Self {
                keypair,
                stream,
                header,
            }
        }

        fn seal(&mut self, event: &KeyEvent, tag: StreamTag) -> Vec<u8> {
            self.stream.encrypt(&event.to_json_bytes().unwrap(), tag)
        }
    }

    fn streaming_session() -> (SecureSession, Device) {
        let identity = Arc::new(ServerIdentity::generate());
        let device = Device::new(&identity);
        let mut session = SecureSession::new(identity);
        session
            .handle_frame(&device.keypair.public_key_bytes())
            .unwrap();
        session.handle_frame(&device.header).unwrap();
        (session, device)
    }

    #[test]
    fn test_new_session_awaits_peer_key() {
        let session = SecureSession::new(Arc::new(ServerIdentity::generate()));
        assert_eq!(session.phase(), SessionPhase::AwaitingPeerKey);
        assert_eq!(session.server_key_frame().len(), PUBLIC_KEY_LEN);
    }

    #[test]
    fn test_handshake_walks_through_phases() {
        // Arrange
        let identity = Arc::new(ServerIdentity::generate());
        let device = Device::new(&identity);
        let mut session = SecureSession::new(identity);

        // Act: peer key
        let outcome = session
            .handle_frame(&device.keypair.public_key_bytes())
            .unwrap();

        // Assert: fingerprint of the peer key is reported
        assert_eq!(
            outcome,
            FrameOutcome::PeerKeyAccepted {
                fingerprint: Fingerprint::of(&device.keypair.public_key_bytes())
            }
        );
        assert_eq!(session.phase(), SessionPhase::AwaitingHeader);

        // Act: header
        assert_eq!(
            session.handle_frame(&device.header),
            Ok(FrameOutcome::StreamReady)
        );
        assert_eq!(session.phase(), SessionPhase::Streaming);
    }

    #[test]
    fn test_streaming_decrypts_events_in_order() {
        let (mut session, mut device) = streaming_session();
        let press = KeyEvent::press(Half::Left, "S");
        let release = KeyEvent::release(Half::Left, "S");

        let f1 = device.seal(&press, StreamTag::Message);
        let f2 = device.seal(&release, StreamTag::Message);

        assert_eq!(session.handle_frame(&f1), Ok(FrameOutcome::Event(press)));
        assert_eq!(session.handle_frame(&f2), Ok(FrameOutcome::Event(release)));
        assert_eq!(session.phase(), SessionPhase::Streaming);
    }

    fn unhex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_accepts_libsodium_device_transcript() {
        // Arrange: a fixed server secret and the frames a libsodium device
        // (crypto_kx client + secretstream push) sent to it.
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&unhex(
            "0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20",
        ));
        let mut session = SecureSession::new(Arc::new(ServerIdentity::from_secret_bytes(secret)));
        let peer_key = unhex("79a631eede1bf9c98f12032cdeadd0e7a079398fc786b88cc846ec89af85a51a");
        let header = unhex("e67ef061eeae8ac670f188550ddc86ae5493ac5bc5104653");
        let press = unhex(
            "c74880131fc694d91ae19765ae54300a4a9a90c39abc669e50c5f74b190205ff\
             d55d2b8e2d9574a729e7f880e8fe56e8bdf17a0c242059793f2d9b58",
        );

        // Act
        session.handle_frame(&peer_key).unwrap();
        session.handle_frame(&header).unwrap();
        let outcome = session.handle_frame(&press);

        // Assert
        assert_eq!(
            outcome,
            Ok(FrameOutcome::Event(KeyEvent::press(Half::Left, "S")))
        );
        assert_eq!(session.phase(), SessionPhase::Streaming);
    }

    #[test]
    fn test_short_peer_key_is_invalid_key_length_and_closes() {
        let mut session = SecureSession::new(Arc::new(ServerIdentity::generate()));

        let result = session.handle_frame(&[0u8; 16]);

        assert_eq!(
            result,
            Err(SessionError::InvalidKeyLength {
                expected: PUBLIC_KEY_LEN,
                actual: 16
            })
        );
        assert!(session.is_closed());
    }

    #[test]
    fn test_low_order_peer_key_is_handshake_error() {
        let mut session = SecureSession::new(Arc::new(ServerIdentity::generate()));
        let result = session.handle_frame(&[0u8; PUBLIC_KEY_LEN]);
        assert_eq!(
            result,
            Err(SessionError::Handshake(CryptoError::WeakPeerKey))
        );
        assert!(session.is_closed());
    }

    #[test]
    fn test_bad_header_is_terminal() {
        // Arrange
        let identity = Arc::new(ServerIdentity::generate());
        let device = Device::new(&identity);
        let mut session = SecureSession::new(identity);
        session
            .handle_frame(&device.keypair.public_key_bytes())
            .unwrap();

        // Act: a header one byte short
        let result = session.handle_frame(&device.header[..HEADER_LEN - 1]);

        // Assert: handshake error, and the correct header is no longer accepted
        assert!(matches!(result, Err(SessionError::Handshake(_))));
        assert_eq!(session.handle_frame(&device.header), Err(SessionError::Closed));
    }

    #[test]
    fn test_swapped_frames_fail_and_close() {
        let (mut session, mut device) = streaming_session();
        let _first = device.seal(&KeyEvent::press(Half::Left, "S"), StreamTag::Message);
        let second = device.seal(&KeyEvent::press(Half::Left, "T"), StreamTag::Message);

        let result = session.handle_frame(&second);

        assert_eq!(
            result,
            Err(SessionError::Decryption(CryptoError::Authentication))
        );
        assert!(session.is_closed());
    }

    #[test]
    fn test_replayed_frame_fails() {
        let (mut session, mut device) = streaming_session();
        let frame = device.seal(&KeyEvent::press(Half::Left, "S"), StreamTag::Message);

        assert!(session.handle_frame(&frame).is_ok());
        assert!(matches!(
            session.handle_frame(&frame),
            Err(SessionError::Decryption(_))
        ));
    }

    #[test]
    fn test_frame_sealed_for_another_server_fails() {
        let (mut session, _device) = streaming_session();
        let mut stranger = Device::new(&ServerIdentity::generate());
        let frame = stranger.seal(&KeyEvent::press(Half::Left, "S"), StreamTag::Message);

        assert!(matches!(
            session.handle_frame(&frame),
            Err(SessionError::Decryption(_))
        ));
    }

    #[test]
    fn test_non_event_plaintext_is_malformed_payload() {
        let (mut session, mut device) = streaming_session();
        let frame = device.stream.encrypt(b"{\"hello\":1}", StreamTag::Message);

        let result = session.handle_frame(&frame);

        assert!(matches!(result, Err(SessionError::MalformedPayload(_))));
        assert!(session.is_closed());
    }

    #[test]
    fn test_final_tag_delivers_event_then_closes() {
        let (mut session, mut device) = streaming_session();
        let last = KeyEvent::release(Half::Right, "Z");
        let frame = device.seal(&last, StreamTag::Final);

        assert_eq!(session.handle_frame(&frame), Ok(FrameOutcome::Event(last)));
        assert!(session.is_closed());
    }

    #[test]
    fn test_empty_final_frame_finishes() {
        let (mut session, mut device) = streaming_session();
        let frame = device.stream.encrypt(&[], StreamTag::Final);

        assert_eq!(session.handle_frame(&frame), Ok(FrameOutcome::Finished));
        assert!(session.is_closed());
    }

    #[test]
    fn test_rekey_tag_keeps_stream_in_sync() {
        let (mut session, mut device) = streaming_session();
        let a = KeyEvent::press(Half::Left, "K");
        let b = KeyEvent::release(Half::Left, "K");

        let f1 = device.seal(&a, StreamTag::Rekey);
        let f2 = device.seal(&b, StreamTag::Message);

        assert_eq!(session.handle_frame(&f1), Ok(FrameOutcome::Event(a)));
        assert_eq!(session.handle_frame(&f2), Ok(FrameOutcome::Event(b)));
    }

    #[test]
    fn test_close_rejects_further_frames() {
        let (mut session, mut device) = streaming_session();
        session.close();
        let frame = device.seal(&KeyEvent::press(Half::Left, "S"), StreamTag::Message);
        assert_eq!(session.handle_frame(&frame), Err(SessionError::Closed));
    }

    #[test]
    fn test_every_session_error_is_fatal() {
        let errors = [
            SessionError::InvalidKeyLength {
                expected: 32,
                actual: 0,
            },
            SessionError::Handshake(CryptoError::WeakPeerKey),
            SessionError::Decryption(CryptoError::Authentication),
            SessionError::MalformedPayload(ProtocolError::EmptyPacket),
            SessionError::Closed,
        ];
        assert!(errors.iter().all(SessionError::is_fatal));
    }
}
