//! Infrastructure layer: sockets, terminal, and files.

pub mod config_file;
pub mod consumer_server;
pub mod prompt;
pub mod ws_server;

use std::sync::Arc;

pub use config_file::{load_config_file, ConfigError, FileConfig};
pub use consumer_server::run_consumer_server;
pub use prompt::{LinePrompt, StdinPrompt};
pub use ws_server::{run_ws_server, InputContext};

use crate::application::{AcceptAll, AcceptDecisionSource, DecisionTimeout, TrustList};
use crate::domain::{AcceptPolicy, RelayConfig};

/// Builds the decision chain described by `config`:
/// trust list, then the policy's source, with the timeout wrapped around
/// whatever is left to decide.
///
/// With the prompt policy this starts the stdin reader task, so it must run
/// inside a Tokio runtime.
pub fn decision_source(config: &RelayConfig) -> Arc<dyn AcceptDecisionSource> {
    let mut source: Arc<dyn AcceptDecisionSource> = match config.accept_policy {
        AcceptPolicy::Prompt => Arc::new(StdinPrompt::stdio()),
        AcceptPolicy::AcceptAll => Arc::new(AcceptAll),
    };
    if let Some(limit) = config.decision_timeout {
        source = Arc::new(DecisionTimeout::new(source, limit));
    }
    if !config.trusted_fingerprints.is_empty() {
        source = Arc::new(TrustList::new(
            config.trusted_fingerprints.iter().copied(),
            source,
        ));
    }
    source
}
