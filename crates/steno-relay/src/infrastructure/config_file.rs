//! TOML config file for the relay.
//!
//! Every key is optional; whatever is present overrides the built-in
//! defaults, and command-line flags override the file.
//!
//! ```toml
//! ws_bind_addr = "0.0.0.0:8080"
//! consumer_socket = "/run/steno-relay/consumers.sock"
//! accept_policy = "prompt"          # or "accept-all"
//! trusted_fingerprints = ["q2VY7Mx0o1pJq0C0mD1qf0h3bI2s5nTn6Yc7a0b1c2d"]
//! decision_timeout_secs = 30
//! log_level = "debug"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use steno_core::crypto::{CryptoError, Fingerprint};
use thiserror::Error;

use crate::domain::{AcceptPolicy, RelayConfig};

/// Error type for config file loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A trusted fingerprint entry is not a valid fingerprint.
    #[error("invalid trusted fingerprint '{value}': {source}")]
    Fingerprint {
        value: String,
        #[source]
        source: CryptoError,
    },

    /// `decision_timeout_secs` was zero.
    #[error("decision_timeout_secs must be greater than zero")]
    ZeroTimeout,
}

/// On-disk schema.  Absent keys leave the corresponding setting alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub ws_bind_addr: Option<SocketAddr>,
    pub consumer_socket: Option<PathBuf>,
    pub accept_policy: Option<AcceptPolicy>,
    pub trusted_fingerprints: Vec<String>,
    pub decision_timeout_secs: Option<u64>,
    pub log_level: Option<String>,
}

impl FileConfig {
    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Overlays the settings present in this file onto `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Fingerprint`] or [`ConfigError::ZeroTimeout`]
    /// for values that parse as TOML but are not usable.  `config` is not
    /// modified on error.
    pub fn apply_to(self, config: &mut RelayConfig) -> Result<(), ConfigError> {
        let trusted = self
            .trusted_fingerprints
            .iter()
            .map(|value| {
                value
                    .parse::<Fingerprint>()
                    .map_err(|source| ConfigError::Fingerprint {
                        value: value.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let timeout = match self.decision_timeout_secs {
            Some(0) => return Err(ConfigError::ZeroTimeout),
            other => other.map(Duration::from_secs),
        };

        if let Some(addr) = self.ws_bind_addr {
            config.ws_bind_addr = addr;
        }
        if let Some(path) = self.consumer_socket {
            config.consumer_socket = path;
        }
        if let Some(policy) = self.accept_policy {
            config.accept_policy = policy;
        }
        config.trusted_fingerprints.extend(trusted);
        if timeout.is_some() {
            config.decision_timeout = timeout;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        Ok(())
    }
}

/// Reads and parses the config file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if it is not valid.
pub fn load_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    FileConfig::parse(&text)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_changes_nothing() {
        // Arrange
        let mut cfg = RelayConfig::default();
        let before = cfg.clone();

        // Act
        FileConfig::parse("").unwrap().apply_to(&mut cfg).unwrap();

        // Assert
        assert_eq!(cfg.ws_bind_addr, before.ws_bind_addr);
        assert_eq!(cfg.consumer_socket, before.consumer_socket);
        assert_eq!(cfg.accept_policy, before.accept_policy);
        assert_eq!(cfg.log_level, before.log_level);
    }

    #[test]
    fn test_full_file_overrides_every_field() {
        let fp = Fingerprint::of(b"trusted device");
        let text = format!(
            r#"
            ws_bind_addr = "0.0.0.0:9000"
            consumer_socket = "/run/steno.sock"
            accept_policy = "accept-all"
            trusted_fingerprints = ["{fp}"]
            decision_timeout_secs = 30
            log_level = "debug"
            "#
        );
        let mut cfg = RelayConfig::default();

        FileConfig::parse(&text).unwrap().apply_to(&mut cfg).unwrap();

        assert_eq!(cfg.ws_bind_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(cfg.consumer_socket, PathBuf::from("/run/steno.sock"));
        assert_eq!(cfg.accept_policy, AcceptPolicy::AcceptAll);
        assert_eq!(cfg.trusted_fingerprints, vec![fp]);
        assert_eq!(cfg.decision_timeout, Some(Duration::from_secs(30)));
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn test_unknown_key_is_parse_error() {
        let result = FileConfig::parse("ws_port = 8080");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_policy_is_parse_error() {
        let result = FileConfig::parse(r#"accept_policy = "sometimes""#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_bad_fingerprint_leaves_config_untouched() {
        let file = FileConfig::parse(
            r#"
            log_level = "trace"
            trusted_fingerprints = ["short"]
            "#,
        )
        .unwrap();
        let mut cfg = RelayConfig::default();

        let result = file.apply_to(&mut cfg);

        assert!(matches!(result, Err(ConfigError::Fingerprint { .. })));
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let file = FileConfig::parse("decision_timeout_secs = 0").unwrap();
        let result = file.apply_to(&mut RelayConfig::default());
        assert!(matches!(result, Err(ConfigError::ZeroTimeout)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let path = std::env::temp_dir().join(format!("steno-relay-missing-{}.toml", uuid::Uuid::new_v4()));
        let result = load_config_file(&path);
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_reads_file_from_disk() {
        let path = std::env::temp_dir().join(format!("steno-relay-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "log_level = \"warn\"\n").unwrap();

        let file = load_config_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(file.log_level.as_deref(), Some("warn"));
    }
}
