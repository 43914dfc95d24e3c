//! Protocol module: the key-event payload and the chord packet codec.

pub mod codec;
pub mod messages;

pub use codec::{
    decode_chord, encode_chord, split_strokes, ChordPacket, ProtocolError, STROKE_TERMINATOR,
};
pub use messages::{Half, KeyAction, KeyEvent};
