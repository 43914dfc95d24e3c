//! Domain layer for steno-relay.
//!
//! Only configuration lives here.  The steno and crypto domain types come
//! from `steno-core`.

pub mod config;

pub use config::{AcceptPolicy, RelayConfig};
