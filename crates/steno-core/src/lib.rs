//! # steno-core
//!
//! Shared library for steno-relay: everything needed to turn an encrypted
//! stream of key transitions into steno chord packets, with no sockets,
//! threads, or runtime attached.
//!
//! # Architecture overview
//!
//! A remote split keyboard sends one event per key press or release.  The
//! relay decrypts those events, groups them into chords (all keys held
//! together until every key is up), and hands each finished chord to local
//! steno engines as a compact group-tagged packet.
//!
//! - **`keymap`** – The key index table: `(label, half)` → bit position.
//!
//! - **`protocol`** – The JSON key-event payload and the chord packet codec.
//!
//! - **`domain`** – The chord accumulator that turns transitions into
//!   finished strokes.
//!
//! - **`crypto`** – Key agreement, the decrypt-side stream context, and
//!   public-key fingerprints.

pub mod crypto;
pub mod domain;
pub mod keymap;
pub mod protocol;

pub use domain::chord::{ChordAccumulator, StenoKeys};
pub use keymap::{key_index, KeyIndex, KeymapError};
pub use protocol::codec::{
    decode_chord, encode_chord, split_strokes, ChordPacket, ProtocolError, STROKE_TERMINATOR,
};
pub use protocol::messages::{Half, KeyAction, KeyEvent};
