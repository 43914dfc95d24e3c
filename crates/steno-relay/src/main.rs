//! steno-relay: encrypted steno key-event relay, entry point.
//!
//! Remote input devices connect over WebSocket, agree keys with the relay,
//! and stream encrypted key presses.  Once the operator accepts a device,
//! its presses are grouped into chords and every finished chord is written
//! as a TxBolt packet to each steno engine connected to the consumer socket.
//!
//! # Usage
//!
//! ```text
//! steno-relay [OPTIONS]
//!
//! Options:
//!   --config <PATH>             TOML config file
//!   --ws-bind <IP>              Input listener address  [default: 127.0.0.1]
//!   --ws-port <PORT>            Input listener port     [default: 8080]
//!   --consumer-socket <PATH>    Unix socket for engines [default: $TMPDIR/steno-relay.sock]
//!   --accept-policy <POLICY>    prompt | accept-all     [default: prompt]
//!   --trust <FINGERPRINT>       Accept this peer without asking (repeatable)
//!   --decision-timeout <SECS>   Reject peers not decided within SECS
//!   --log-level <FILTER>        Used when RUST_LOG is unset [default: info]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                        | Flag                 |
//! |---------------------------------|----------------------|
//! | `STENO_RELAY_CONFIG`            | `--config`           |
//! | `STENO_RELAY_WS_BIND`           | `--ws-bind`          |
//! | `STENO_RELAY_WS_PORT`           | `--ws-port`          |
//! | `STENO_RELAY_CONSUMER_SOCKET`   | `--consumer-socket`  |
//! | `STENO_RELAY_ACCEPT_POLICY`     | `--accept-policy`    |
//! | `STENO_RELAY_TRUST`             | `--trust` (comma-separated) |
//! | `STENO_RELAY_DECISION_TIMEOUT`  | `--decision-timeout` |
//! | `STENO_RELAY_LOG_LEVEL`         | `--log-level`        |
//!
//! Precedence, lowest first: built-in defaults, config file, flags and
//! environment.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use steno_core::crypto::{Fingerprint, ServerIdentity};
use tracing::info;
use tracing_subscriber::EnvFilter;

use steno_relay::application::FanoutHub;
use steno_relay::domain::{AcceptPolicy, RelayConfig};
use steno_relay::infrastructure::{
    decision_source, load_config_file, run_consumer_server, run_ws_server, InputContext,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Encrypted steno key-event relay.
#[derive(Debug, Parser)]
#[command(
    name = "steno-relay",
    about = "Relays encrypted steno key events to local steno engines",
    version
)]
struct Cli {
    /// TOML config file; flags override its values.
    #[arg(long, env = "STENO_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// IP address for the input-device WebSocket listener.
    #[arg(long, env = "STENO_RELAY_WS_BIND")]
    ws_bind: Option<String>,

    /// Port for the input-device WebSocket listener.
    #[arg(long, env = "STENO_RELAY_WS_PORT")]
    ws_port: Option<u16>,

    /// Path of the Unix socket steno engines connect to.
    #[arg(long, env = "STENO_RELAY_CONSUMER_SOCKET")]
    consumer_socket: Option<PathBuf>,

    /// How to decide on peers that are not trusted: `prompt` or `accept-all`.
    #[arg(long, env = "STENO_RELAY_ACCEPT_POLICY")]
    accept_policy: Option<AcceptPolicy>,

    /// Fingerprint to accept without asking.  Repeatable.
    #[arg(long = "trust", env = "STENO_RELAY_TRUST", value_delimiter = ',')]
    trust: Vec<String>,

    /// Seconds to wait for an accept decision before rejecting.
    #[arg(long, env = "STENO_RELAY_DECISION_TIMEOUT")]
    decision_timeout: Option<u64>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, env = "STENO_RELAY_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Builds the effective [`RelayConfig`]: defaults, then the config file,
    /// then flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded, `--ws-bind` is
    /// not an IP address, a `--trust` value is not a fingerprint, or
    /// `--decision-timeout` is zero.
    fn into_relay_config(self) -> anyhow::Result<RelayConfig> {
        let mut config = RelayConfig::default();

        if let Some(path) = &self.config {
            load_config_file(path)
                .and_then(|file| file.apply_to(&mut config))
                .with_context(|| format!("failed to load config file {}", path.display()))?;
        }

        if let Some(bind) = &self.ws_bind {
            let ip: IpAddr = bind
                .parse()
                .with_context(|| format!("invalid WebSocket bind address: '{bind}'"))?;
            config.ws_bind_addr = SocketAddr::new(ip, config.ws_bind_addr.port());
        }
        if let Some(port) = self.ws_port {
            config.ws_bind_addr.set_port(port);
        }
        if let Some(path) = self.consumer_socket {
            config.consumer_socket = path;
        }
        if let Some(policy) = self.accept_policy {
            config.accept_policy = policy;
        }
        for value in &self.trust {
            let fingerprint: Fingerprint = value
                .parse()
                .with_context(|| format!("invalid --trust fingerprint: '{value}'"))?;
            config.trusted_fingerprints.push(fingerprint);
        }
        match self.decision_timeout {
            Some(0) => bail!("--decision-timeout must be greater than zero"),
            Some(secs) => config.decision_timeout = Some(Duration::from_secs(secs)),
            None => {}
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }

        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_relay_config()?;

    // RUST_LOG wins; otherwise the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let identity = Arc::new(ServerIdentity::generate());
    info!("server fingerprint: {}", identity.fingerprint());
    info!(
        "steno-relay starting: ws={}, consumers={}, policy={}, trusted={}",
        config.ws_bind_addr,
        config.consumer_socket.display(),
        config.accept_policy,
        config.trusted_fingerprints.len()
    );

    let hub = Arc::new(FanoutHub::new());
    let ctx = InputContext {
        identity,
        hub: Arc::clone(&hub),
        decisions: decision_source(&config),
    };

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    // ── Listeners ─────────────────────────────────────────────────────────────
    let (consumers, inputs) = tokio::join!(
        stop_all_on_error(
            run_consumer_server(&config.consumer_socket, hub, Arc::clone(&running)),
            Arc::clone(&running),
        ),
        stop_all_on_error(
            run_ws_server(config.ws_bind_addr, ctx, Arc::clone(&running)),
            Arc::clone(&running),
        ),
    );
    consumers?;
    inputs?;

    info!("steno-relay stopped");
    Ok(())
}

/// Clears `running` if `task` fails so the other listener stops too.
async fn stop_all_on_error(
    task: impl Future<Output = anyhow::Result<()>>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let result = task.await;
    if result.is_err() {
        running.store(false, Ordering::Relaxed);
    }
    result
}

// ── Tests ─────────────────────────────────────────────────────────────────────
