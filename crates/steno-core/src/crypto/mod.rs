//! Session cryptography for the input-device channel.
//!
//! - [`kx`]: X25519 key agreement producing a per-connection key pair
//!   `{rx, tx}` (BLAKE2b-512 over the shared point and both public keys).
//! - [`stream`]: XChaCha20-Poly1305 secret stream.  Frames must be opened in
//!   the order they were sealed; every frame advances the context.
//! - [`fingerprint`]: short, human-comparable identity of a public key.
//!
//! The constructions match what the browser-side input device produces, so
//! the relay can talk to it without any shim.

pub mod fingerprint;
pub mod kx;
pub mod stream;

use thiserror::Error;

pub use fingerprint::Fingerprint;
pub use kx::{ClientKeypair, PeerPublicKey, ServerIdentity, SessionKey, SessionKeys, PUBLIC_KEY_LEN};
pub use stream::{DecryptContext, DecryptedFrame, EncryptContext, StreamTag, ABYTES, HEADER_LEN};

/// Errors raised by the key agreement and stream primitives.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// A public key frame was not exactly [`PUBLIC_KEY_LEN`] bytes.
    #[error("invalid public key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// The peer key produced an all-zero shared point.
    #[error("peer public key is a low-order point")]
    WeakPeerKey,

    /// A stream header was not exactly [`HEADER_LEN`] bytes.
    #[error("invalid stream header length: expected {expected}, got {actual}")]
    InvalidHeader { expected: usize, actual: usize },

    /// A ciphertext frame is shorter than the per-frame overhead.
    #[error("ciphertext frame too short: {0} bytes")]
    MessageTooShort(usize),

    /// The frame's authenticator did not verify (corrupt, replayed, reordered,
    /// or sealed under a different key).
    #[error("frame authentication failed")]
    Authentication,

    /// The frame authenticated but carries a tag this stream does not define.
    #[error("unknown stream tag 0x{0:02X}")]
    UnknownTag(u8),

    /// A fingerprint string did not decode to a 32-byte digest.
    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),
}
