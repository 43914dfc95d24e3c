//! Application layer: the per-connection pipeline and the consumer hub.
//!
//! Nothing here opens a socket.  The infrastructure layer feeds raw frames
//! into [`InputSession::on_frame`] and attaches consumer sinks to the
//! [`FanoutHub`].

pub mod fanout;
pub mod gate;
pub mod relay;
pub mod session;

pub use fanout::{ChannelSink, ConsumerId, ConsumerSink, ConsumerWriteError, FanoutHub};
pub use gate::{
    spawn_decision, AcceptAll, AcceptDecisionSource, Acceptance, ConnectionGate, Decision,
    DecisionTimeout, TrustList,
};
pub use relay::{InputSession, SessionStep};
pub use session::{FrameOutcome, SecureSession, SessionError, SessionPhase};
