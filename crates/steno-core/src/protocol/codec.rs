//! Chord codec: finished chord → TxBolt-style group-tagged packet.
//!
//! Wire format (one packet per chord, 0–4 bytes, no length prefix):
//! ```text
//! [gg bbbbbb] ...
//!  gg      = group number (0..=3), top two bits
//!  bbbbbb  = membership of keys group*6 + 0..6 (group 3 uses only 5 bits)
//! ```
//! Groups are written in ascending order and a group with no keys down is
//! omitted entirely, so `{S-}` is the single byte `0x01` and `{S-, A}` is
//! `0x01 0x42`.
//!
//! Group tags alone cannot delimit chords on a byte stream: `{S-}` followed
//! by `{A}` is also `0x01 0x42`.  Stream transports therefore end every chord
//! with [`STROKE_TERMINATOR`], a group-0 byte with no keys that never occurs
//! inside a packet; [`split_strokes`] undoes that.

use thiserror::Error;

use crate::domain::chord::StenoKeys;
use crate::keymap::KEY_COUNT;

/// Largest packet the codec can produce (one byte per group).
pub const MAX_PACKET_LEN: usize = 4;

/// Keys carried per group byte.
const KEYS_PER_GROUP: usize = 6;

/// Mask for the low (key) bits of a group byte.
const KEY_BITS_MASK: u8 = 0x3F;

/// Errors that can occur while decoding payloads or chord packets.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A decrypted frame did not contain a well-formed key event.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A chord packet had no bytes.
    #[error("empty chord packet")]
    EmptyPacket,

    /// Group tags must strictly increase within one packet.
    #[error("group {found} follows group {previous} in the same packet")]
    GroupOutOfOrder { previous: u8, found: u8 },

    /// A group byte with no key bits set (the encoder never emits these).
    #[error("group {0} byte carries no keys")]
    EmptyGroup(u8),

    /// A key bit beyond the last key on the board.
    #[error("byte 0x{0:02X} sets a key beyond the end of the board")]
    KeyOutOfRange(u8),
}

// ── Packet ────────────────────────────────────────────────────────────────────

/// The wire encoding of one finished chord.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChordPacket {
    bytes: [u8; MAX_PACKET_LEN],
    len: usize,
}

impl ChordPacket {
    /// The bytes to send to consumers.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Number of group bytes in the packet.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` for the encoding of an empty chord, which must never be sent.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn push(&mut self, byte: u8) {
        self.bytes[self.len] = byte;
        self.len += 1;
    }
}

impl AsRef<[u8]> for ChordPacket {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a chord into its group-tagged packet.
///
/// An empty chord yields an empty packet.
///
/// # Examples
///
/// ```rust
/// use steno_core::domain::chord::StenoKeys;
/// use steno_core::protocol::codec::encode_chord;
///
/// let keys = StenoKeys::from_indices([0, 7]);
/// assert_eq!(encode_chord(keys).as_bytes(), &[0b0000_0001, 0b0100_0010]);
/// ```
pub fn encode_chord(keys: StenoKeys) -> ChordPacket {
    let mut packet = ChordPacket {
        bytes: [0; MAX_PACKET_LEN],
        len: 0,
    };

    for group in 0..MAX_PACKET_LEN {
        let first = group * KEYS_PER_GROUP;
        let width = KEYS_PER_GROUP.min(KEY_COUNT - first);

        let mut byte = 0u8;
        for bit in 0..width {
            if keys.contains((first + bit) as u8) {
                byte |= 1 << bit;
            }
        }

        if byte != 0 {
            packet.push(byte | ((group as u8) << 6));
        }
    }

    packet
}

/// Decodes one chord packet back into its key set.
///
/// # Errors
///
/// Returns a [`ProtocolError`] if the packet is empty, repeats or reorders a
/// group, carries an empty group byte, or sets a bit past the last key.
pub fn decode_chord(bytes: &[u8]) -> Result<StenoKeys, ProtocolError> {
    if bytes.is_empty() {
        return Err(ProtocolError::EmptyPacket);
    }

    let mut keys = StenoKeys::new();
    let mut previous: Option<u8> = None;

    for &byte in bytes {
        let group = byte >> 6;
        if let Some(prev) = previous {
            if group <= prev {
                return Err(ProtocolError::GroupOutOfOrder {
                    previous: prev,
                    found: group,
                });
            }
        }
        previous = Some(group);

        let bits = byte & KEY_BITS_MASK;
        if bits == 0 {
            return Err(ProtocolError::EmptyGroup(group));
        }

        let first = group as usize * KEYS_PER_GROUP;
        for bit in 0..KEYS_PER_GROUP {
            if bits & (1 << bit) == 0 {
                continue;
            }
            let idx = first + bit;
            if idx >= KEY_COUNT {
                return Err(ProtocolError::KeyOutOfRange(byte));
            }
            keys.insert(idx as u8);
        }
    }

    Ok(keys)
}

/// Ends each chord on a byte-stream transport.  TxBolt readers already treat
/// an empty group-0 byte as a stroke boundary.
pub const STROKE_TERMINATOR: u8 = 0x00;

/// Splits a terminated byte stream into chord packets.
///
/// Returns the complete packets in order, plus the unterminated tail still
/// waiting for more bytes.  Empty packets (repeated terminators) are skipped.
pub fn split_strokes(stream: &[u8]) -> (Vec<&[u8]>, &[u8]) {
    let mut strokes = Vec::new();
    let mut rest = stream;
    while let Some(end) = rest.iter().position(|&b| b == STROKE_TERMINATOR) {
        if end > 0 {
            strokes.push(&rest[..end]);
        }
        rest = &rest[end + 1..];
    }
    (strokes, rest)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
