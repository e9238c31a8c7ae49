//! RTMP session handling
//!
//! One [`Session`] per connection. It owns the handshake and chunk parser
//! state, answers commands, and registers its publish or play role with the
//! shared stream registry.

pub mod auth;
pub mod connection;
pub mod sink;
pub mod state;
pub mod transport;

pub use auth::{AllowAll, AuthAction, AuthDecision, AuthRequest, Authorizer};
pub use connection::Session;
pub use sink::ViewerSink;
pub use state::{SessionConfig, SessionPhase, SessionState, StreamRole};
pub use transport::Transport;
