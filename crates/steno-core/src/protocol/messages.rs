//! Key-event payload carried inside each decrypted stream frame.
//!
//! The input device sends one JSON object per key transition:
//!
//! ```json
//! {"half":"left","letter":"S","type":"press"}
//! ```
//!
//! `letter` is kept as a string here.  Whether it names a real steno key is
//! decided later by the key index table, so an unknown label is a per-event
//! [`crate::keymap::KeymapError`] rather than a payload parse failure.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;

// ── Keyboard half ─────────────────────────────────────────────────────────────

/// Which half of the split keyboard produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Half {
    Left,
    Right,
}

impl fmt::Display for Half {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Half::Left => f.write_str("left"),
            Half::Right => f.write_str("right"),
        }
    }
}

// ── Key transition ────────────────────────────────────────────────────────────

/// Whether the key went down or came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAction {
    Press,
    Release,
}

impl fmt::Display for KeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAction::Press => f.write_str("press"),
            KeyAction::Release => f.write_str("release"),
        }
    }
}

// ── Key event ─────────────────────────────────────────────────────────────────

/// One decoded key transition from the remote input device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    /// Keyboard half the key lives on.
    pub half: Half,
    /// Steno key label, e.g. `"S"`, `"*"`, `"#"`.
    pub letter: String,
    /// Press or release.
    #[serde(rename = "type")]
    pub action: KeyAction,
}

impl KeyEvent {
    /// Builds a press event.
    pub fn press(half: Half, letter: impl Into<String>) -> Self {
        Self {
            half,
            letter: letter.into(),
            action: KeyAction::Press,
        }
    }

    /// Builds a release event.
    pub fn release(half: Half, letter: impl Into<String>) -> Self {
        Self {
            half,
            letter: letter.into(),
            action: KeyAction::Release,
        }
    }

    /// Parses a decrypted plaintext frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if the bytes are not a JSON
    /// object with the three expected fields.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
    }

    /// Serializes the event the way the input device does.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
    }
}

impl fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.half, self.letter, self.action)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
