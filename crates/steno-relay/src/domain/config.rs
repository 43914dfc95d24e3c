//! Relay configuration types.
//!
//! [`RelayConfig`] is the single source of truth for runtime settings.  It
//! starts from [`Default`], is overlaid by an optional TOML file, then by
//! command-line flags; the infrastructure layer does the overlaying.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use steno_core::crypto::Fingerprint;

/// Port the reference input device connects to.
pub const DEFAULT_WS_PORT: u16 = 8080;

/// File name of the consumer socket inside the temp directory.
pub const DEFAULT_SOCKET_NAME: &str = "steno-relay.sock";

/// How an untrusted connection gets its accept decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcceptPolicy {
    /// Ask the operator on stdin.
    #[default]
    Prompt,
    /// Accept every connection.  Only sensible on a trusted network.
    AcceptAll,
}

impl fmt::Display for AcceptPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceptPolicy::Prompt => f.write_str("prompt"),
            AcceptPolicy::AcceptAll => f.write_str("accept-all"),
        }
    }
}

impl FromStr for AcceptPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prompt" => Ok(AcceptPolicy::Prompt),
            "accept-all" | "accept_all" => Ok(AcceptPolicy::AcceptAll),
            other => Err(format!(
                "unknown accept policy '{other}' (expected 'prompt' or 'accept-all')"
            )),
        }
    }
}

/// All runtime configuration for the relay.
///
/// # Example
///
/// ```rust
/// use steno_relay::domain::RelayConfig;
///
/// let cfg = RelayConfig::default();
/// assert_eq!(cfg.ws_bind_addr.port(), 8080);
/// ```
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the input-device WebSocket listener binds to.
    pub ws_bind_addr: SocketAddr,

    /// Path of the Unix socket local consumers connect to.
    pub consumer_socket: PathBuf,

    /// Decision source for connections whose fingerprint is not trusted.
    pub accept_policy: AcceptPolicy,

    /// Peers accepted without asking.
    pub trusted_fingerprints: Vec<Fingerprint>,

    /// A pending decision older than this counts as a rejection.
    /// `None` waits indefinitely.
    pub decision_timeout: Option<Duration>,

    /// Fallback `tracing` filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl RelayConfig {
    pub fn is_trusted(&self, fingerprint: &Fingerprint) -> bool {
        self.trusted_fingerprints.contains(fingerprint)
    }
}

impl Default for RelayConfig {
    /// | Field                | Default                       |
    /// |----------------------|-------------------------------|
    /// | ws_bind_addr         | `127.0.0.1:8080`              |
    /// | consumer_socket      | `$TMPDIR/steno-relay.sock`    |
    /// | accept_policy        | `prompt`                      |
    /// | trusted_fingerprints | empty                         |
    /// | decision_timeout     | none                          |
    /// | log_level            | `info`                        |
    fn default() -> Self {
        Self {
            ws_bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_WS_PORT)),
            consumer_socket: std::env::temp_dir().join(DEFAULT_SOCKET_NAME),
            accept_policy: AcceptPolicy::default(),
            trusted_fingerprints: Vec::new(),
            decision_timeout: None,
            log_level: "info".to_string(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ws_bind_is_loopback_8080() {
        // Arrange / Act
        let cfg = RelayConfig::default();
        // Assert
        assert_eq!(cfg.ws_bind_addr.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_default_consumer_socket_is_in_temp_dir() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.consumer_socket.file_name().unwrap(), DEFAULT_SOCKET_NAME);
        assert!(cfg.consumer_socket.starts_with(std::env::temp_dir()));
    }

    #[test]
    fn test_default_policy_prompts_without_timeout() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.accept_policy, AcceptPolicy::Prompt);
        assert!(cfg.decision_timeout.is_none());
        assert!(cfg.trusted_fingerprints.is_empty());
    }

    #[test]
    fn test_is_trusted_matches_listed_fingerprint_only() {
        let trusted = Fingerprint::of(b"device a");
        let cfg = RelayConfig {
            trusted_fingerprints: vec![trusted],
            ..RelayConfig::default()
        };
        assert!(cfg.is_trusted(&trusted));
        assert!(!cfg.is_trusted(&Fingerprint::of(b"device b")));
    }

    #[test]
    fn test_accept_policy_parses_both_spellings() {
        assert_eq!("prompt".parse(), Ok(AcceptPolicy::Prompt));
        assert_eq!("accept-all".parse(), Ok(AcceptPolicy::AcceptAll));
        assert_eq!("Accept_All".parse(), Ok(AcceptPolicy::AcceptAll));
    }

    #[test]
    fn test_accept_policy_rejects_unknown_value() {
        assert!("maybe".parse::<AcceptPolicy>().is_err());
    }

    #[test]
    fn test_accept_policy_display_matches_parse() {
        for policy in [AcceptPolicy::Prompt, AcceptPolicy::AcceptAll] {
            assert_eq!(policy.to_string().parse(), Ok(policy));
        }
    }
}
