//! TCP server
//!
//! Accepts connections and drives one [`crate::session::Session`] per socket
//! on a single-threaded reactor.

pub mod config;
pub mod listener;
pub mod transport;

pub use config::ServerConfig;
pub use listener::RtmpServer;
pub use transport::{ChannelTransport, Outbound};
