//! rtmp-relay: an RTMP ingest and relay core
//!
//! Publishers push live audio/video over RTMP; the relay caches what a late
//! joiner needs (metadata, codec sequence headers, the current GOP) and fans
//! every frame out to the viewers of the same path.
//!
//! # Example
//!
//! ```no_run
//! use rtmp_relay::{RtmpServer, ServerConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> rtmp_relay::Result<()> {
//!     let server = RtmpServer::new(ServerConfig::default());
//!     server.run().await
//! }
//! ```
//!
//! # Layers
//!
//! - [`protocol`]: handshake, chunk stream (de)multiplexing, messages
//! - [`amf`]: AMF0 values used by commands and data messages
//! - [`media`]: FLV tags, AVC/AAC packets, SPS parsing, GOP cache
//! - [`registry`]: publish paths, viewers and frame fan-out
//! - [`session`]: the per-connection state machine (sans-IO)
//! - [`server`]: TCP accept loop on a single-threaded reactor
//! - [`stats`]: session counters and stream snapshots

pub mod amf;
pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use error::{Error, Result};
pub use registry::{SharedRegistry, StreamRegistry};
pub use server::{RtmpServer, ServerConfig};
pub use session::Session;
