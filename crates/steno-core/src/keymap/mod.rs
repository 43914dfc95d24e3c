//! Key index table: steno key label + keyboard half → chord bit position.
//!
//! Bit positions follow the 23-key steno layout used on the wire:
//!
//! ```text
//! index:  0  1  2  3  4  5  6  7  8  9  10 11 12 13 14 15 16 17 18 19 20 21 22
//! key:    S- T- K- P- W- H- R- A- O- *  -E -U -F -R -P -B -L -G -T -S -D -Z #
//! ```
//!
//! Most labels exist on only one side of the board, so the half reported by
//! the device is ignored for them (`H` is always index 5, wherever it was
//! pressed).  Only `S`, `T`, `P` and `R` appear on both sides and resolve by
//! half.  This is how steno layouts behave, so the asymmetry is kept exactly.

use thiserror::Error;

use crate::protocol::messages::Half;

/// Bit position of a key within a chord (`0..KEY_COUNT`).
pub type KeyIndex = u8;

/// Number of keys on the board, and therefore bits in a chord.
pub const KEY_COUNT: usize = 23;

/// Single-character labels in steno order, indexed by [`KeyIndex`].
///
/// Used when rendering chords in log lines.
pub const STENO_ORDER: [char; KEY_COUNT] = [
    'S', 'T', 'K', 'P', 'W', 'H', 'R', 'A', 'O', '*', 'E', 'U', 'F', 'R', 'P', 'B', 'L', 'G',
    'T', 'S', 'D', 'Z', '#',
];

/// Errors produced while resolving a key label.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeymapError {
    /// The label is not a key on the steno board.
    #[error("unknown key {letter:?} on {half} half")]
    UnknownKey { letter: String, half: Half },
}

/// Where a label sits on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// The label exists once; the half is ignored.
    Either(KeyIndex),
    /// The label exists on both halves.
    Split { left: KeyIndex, right: KeyIndex },
}

const STENO_KEYS: [(&str, Placement); 19] = [
    ("S", Placement::Split { left: 0, right: 19 }),
    ("T", Placement::Split { left: 1, right: 18 }),
    ("K", Placement::Either(2)),
    ("P", Placement::Split { left: 3, right: 14 }),
    ("W", Placement::Either(4)),
    ("H", Placement::Either(5)),
    ("R", Placement::Split { left: 6, right: 13 }),
    ("A", Placement::Either(7)),
    ("O", Placement::Either(8)),
    ("*", Placement::Either(9)),
    ("E", Placement::Either(10)),
    ("U", Placement::Either(11)),
    ("F", Placement::Either(12)),
    ("B", Placement::Either(15)),
    ("L", Placement::Either(16)),
    ("G", Placement::Either(17)),
    ("D", Placement::Either(20)),
    ("Z", Placement::Either(21)),
    ("#", Placement::Either(22)),
];

/// Every index in `0..KEY_COUNT` must be produced by exactly one
/// (label, half) placement.
const fn covers_every_index_once(table: &[(&str, Placement)]) -> bool {
    let mut seen: u32 = 0;
    let mut i = 0;
    while i < table.len() {
        let (a, b) = match table[i].1 {
            Placement::Either(idx) => (idx, idx),
            Placement::Split { left, right } => {
                if left == right {
                    return false;
                }
                (left, right)
            }
        };
        if a as usize >= KEY_COUNT || b as usize >= KEY_COUNT {
            return false;
        }
        let bits = (1u32 << a) | (1u32 << b);
        if seen & bits != 0 {
            return false;
        }
        seen |= bits;
        i += 1;
    }
    seen == (1u32 << KEY_COUNT) - 1
}

const _: () = assert!(covers_every_index_once(&STENO_KEYS));

/// Resolves a key label on a keyboard half to its chord bit position.
///
/// # Errors
///
/// Returns [`KeymapError::UnknownKey`] if `letter` is not a steno key.
///
/// # Examples
///
/// ```rust
/// use steno_core::keymap::key_index;
/// use steno_core::protocol::messages::Half;
///
/// assert_eq!(key_index("S", Half::Left), Ok(0));
/// assert_eq!(key_index("S", Half::Right), Ok(19));
/// assert_eq!(key_index("H", Half::Right), Ok(5));
/// ```
pub fn key_index(letter: &str, half: Half) -> Result<KeyIndex, KeymapError> {
    let placement = STENO_KEYS
        .iter()
        .find(|(label, _)| *label == letter)
        .map(|(_, placement)| *placement)
        .ok_or_else(|| KeymapError::UnknownKey {
            letter: letter.to_string(),
            half,
        })?;

    Ok(match (placement, half) {
        (Placement::Either(idx), _) => idx,
        (Placement::Split { left, .. }, Half::Left) => left,
        (Placement::Split { right, .. }, Half::Right) => right,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_left_bank_maps_to_first_group() {
        let expected = [("S", 0), ("T", 1), ("K", 2), ("P", 3), ("W", 4), ("H", 5)];
        for (label, idx) in expected {
            assert_eq!(key_index(label, Half::Left), Ok(idx), "label {label}");
        }
    }

    #[test]
    fn test_split_labels_resolve_by_half() {
        assert_eq!(key_index("S", Half::Right), Ok(19));
        assert_eq!(key_index("T", Half::Right), Ok(18));
        assert_eq!(key_index("P", Half::Right), Ok(14));
        assert_eq!(key_index("R", Half::Left), Ok(6));
        assert_eq!(key_index("R", Half::Right), Ok(13));
    }

    #[test]
    fn test_single_side_labels_ignore_half() {
        // H only exists on the left bank; a right-half report still resolves there.
        assert_eq!(key_index("H", Half::Right), Ok(5));
        assert_eq!(key_index("Z", Half::Left), Ok(21));
        assert_eq!(key_index("*", Half::Right), Ok(9));
    }

    #[test]
    fn test_unknown_label_reports_letter_and_half() {
        let result = key_index("Q", Half::Right);
        assert_eq!(
            result,
            Err(KeymapError::UnknownKey {
                letter: "Q".to_string(),
                half: Half::Right,
            })
        );
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        assert!(key_index("s", Half::Left).is_err());
    }

    #[test]
    fn test_empty_and_multi_char_labels_are_unknown() {
        assert!(key_index("", Half::Left).is_err());
        assert!(key_index("ST", Half::Left).is_err());
    }

    #[test]
    fn test_labels_are_unique() {
        for (i, (a, _)) in STENO_KEYS.iter().enumerate() {
            for (b, _) in &STENO_KEYS[i + 1..] {
                assert_ne!(a, b, "duplicate label in key table");
            }
        }
    }

    #[test]
    fn test_every_label_half_pair_agrees_with_steno_order() {
        for (label, _) in STENO_KEYS {
            for half in [Half::Left, Half::Right] {
                let idx = key_index(label, half).unwrap();
                let rendered = STENO_ORDER[idx as usize].to_string();
                assert_eq!(rendered, label, "{label} on {half} resolved to {idx}");
            }
        }
    }
}
