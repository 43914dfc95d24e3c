//! Domain logic for steno-relay.
//!
//! Pure state with no I/O: the chord accumulator turns key transitions into
//! finished strokes.  It can be driven directly from tests without any
//! network listener.

/// Chord accumulation and the [`chord::StenoKeys`] set type.
pub mod chord;
