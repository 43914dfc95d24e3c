//! Chord accumulation: individual key transitions → finished strokes.
//!
//! A chord starts with the first key press and ends when every key is up
//! again.  Two sets are tracked while it is in progress:
//!
//! - `pressed`: keys currently held down.
//! - `current`: every key pressed since the chord began.  Releasing a key
//!   never removes it from `current`; a key lifted early still belongs to
//!   the stroke.
//!
//! When `pressed` drains to empty, `current` is encoded and cleared.

use std::fmt;

use tracing::debug;

use crate::keymap::{key_index, KeyIndex, KeymapError, KEY_COUNT, STENO_ORDER};
use crate::protocol::codec::{encode_chord, ChordPacket};
use crate::protocol::messages::{KeyAction, KeyEvent};

/// Index of the number bar, written first when rendering.
const NUMBER_BAR: KeyIndex = 22;

/// Indices of `A O * E U`; a chord with any of these needs no hyphen.
const MIDDLE_KEYS: std::ops::Range<KeyIndex> = 7..12;

/// Indices of the right bank `-F .. -Z`.
const RIGHT_KEYS: std::ops::Range<KeyIndex> = 12..22;

// ── Key set ───────────────────────────────────────────────────────────────────

/// A set of steno keys, one bit per [`KeyIndex`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StenoKeys(u32);

impl StenoKeys {
    /// An empty key set.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Builds a set from bit positions.  Positions past the board are ignored.
    pub fn from_indices(indices: impl IntoIterator<Item = KeyIndex>) -> Self {
        let mut keys = Self::new();
        for idx in indices {
            keys.insert(idx);
        }
        keys
    }

    /// Adds a key.
    pub fn insert(&mut self, idx: KeyIndex) {
        if (idx as usize) < KEY_COUNT {
            self.0 |= 1 << idx;
        }
    }

    /// Removes a key.  Removing an absent key is a no-op.
    pub fn remove(&mut self, idx: KeyIndex) {
        if (idx as usize) < KEY_COUNT {
            self.0 &= !(1 << idx);
        }
    }

    pub fn contains(&self, idx: KeyIndex) -> bool {
        (idx as usize) < KEY_COUNT && self.0 & (1 << idx) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Number of keys in the set.
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Raw bitmask (bit `n` = key index `n`).
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Iterates over member indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = KeyIndex> + '_ {
        (0..KEY_COUNT as KeyIndex).filter(move |idx| self.contains(*idx))
    }

    fn any_in(&self, range: std::ops::Range<KeyIndex>) -> bool {
        range.into_iter().any(|idx| self.contains(idx))
    }
}

impl fmt::Display for StenoKeys {
    /// Renders the chord in steno order, e.g. `STPH-FPLT` or `#KWR*EUS`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::with_capacity(KEY_COUNT + 1);

        if self.contains(NUMBER_BAR) {
            out.push('#');
        }
        for idx in 0..MIDDLE_KEYS.end {
            if self.contains(idx) {
                out.push(STENO_ORDER[idx as usize]);
            }
        }
        if self.any_in(RIGHT_KEYS) && !self.any_in(MIDDLE_KEYS) {
            out.push('-');
        }
        for idx in RIGHT_KEYS {
            if self.contains(idx) {
                out.push(STENO_ORDER[idx as usize]);
            }
        }

        f.write_str(&out)
    }
}

// ── Accumulator ───────────────────────────────────────────────────────────────

/// Tracks one input source's in-progress chord.
///
/// Not synchronized: each input session owns its own accumulator.
#[derive(Debug, Default)]
pub struct ChordAccumulator {
    pressed: StenoKeys,
    current: StenoKeys,
}

impl ChordAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one key transition.
    ///
    /// Returns `Ok(Some(packet))` when this event finished a chord, and
    /// `Ok(None)` while a chord is still being built or when nothing was
    /// held (a duplicate release, for example).
    ///
    /// # Errors
    ///
    /// Returns [`KeymapError::UnknownKey`] for labels not on the board.  The
    /// accumulator state is left untouched in that case.
    pub fn on_event(&mut self, event: &KeyEvent) -> Result<Option<ChordPacket>, KeymapError> {
        let idx = key_index(&event.letter, event.half)?;

        match event.action {
            KeyAction::Press => {
                self.pressed.insert(idx);
                self.current.insert(idx);
                Ok(None)
            }
            KeyAction::Release => {
                self.pressed.remove(idx);
                if self.pressed.is_empty() {
                    Ok(self.finish())
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Keys currently held.
    pub fn pressed(&self) -> StenoKeys {
        self.pressed
    }

    /// Keys in the chord being built.
    pub fn current(&self) -> StenoKeys {
        self.current
    }

    /// Drops any partial chord without emitting it.
    pub fn reset(&mut self) {
        self.pressed = StenoKeys::new();
        self.current = StenoKeys::new();
    }

    fn finish(&mut self) -> Option<ChordPacket> {
        let chord = std::mem::take(&mut self.current);
        if chord.is_empty() {
            return None;
        }
        debug!("chord complete: {chord}");
        Some(encode_chord(chord))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
