//! steno-relay library crate.
//!
//! Accepts encrypted key events from remote steno input devices over
//! WebSocket, turns them into chords, and fans the resulting TxBolt packets
//! out to local steno engines over a Unix domain socket.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Input device (X25519 + secret stream over WebSocket)
//!         ↓
//! [steno-relay]
//!   ├── domain/             RelayConfig, AcceptPolicy
//!   ├── application/
//!   │     ├── session/      SecureSession handshake + decrypt state machine
//!   │     ├── gate/         ConnectionGate, accept-decision sources
//!   │     ├── relay/        InputSession: session → gate → chords → hub
//!   │     └── fanout/       FanoutHub and consumer sinks
//!   └── infrastructure/
//!         ├── ws_server/        WebSocket accept loop (tokio-tungstenite)
//!         ├── consumer_server/  Unix socket accept loop for consumers
//!         ├── prompt/           Operator y/n prompt
//!         └── config_file/      TOML config loader
//!         ↓
//! Steno engine(s) (raw TxBolt packets)
//! ```
//!
//! # Layer rules
//!
//! - `domain` holds plain configuration types; no I/O.
//! - `application` depends on `domain` and `steno-core`; it never touches a
//!   socket, so every rule here is testable with in-memory frames.
//! - `infrastructure` wires the application layer to real sockets, stdin,
//!   and files.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: session state machines, gating, and fan-out.
pub mod application;

/// Infrastructure layer: listeners, operator prompt, config file.
pub mod infrastructure;
