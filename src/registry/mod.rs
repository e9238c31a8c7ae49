//! Stream registry for pub/sub routing
//!
//! The registry tracks live publish paths and routes media from each
//! publisher to the viewers of its path.
//!
//! # Architecture
//!
//! ```text
//!                     Rc<RefCell<StreamRegistry>>
//!                 ┌──────────────────────────────────┐
//!                 │ publishers: path -> PublishStream │
//!                 │   { metadata, avc/aac headers,   │
//!                 │     gop cache, media info }      │
//!                 │ players: path -> [PlayStream]    │
//!                 └────────────────┬─────────────────┘
//!                                  │
//!         ┌────────────────────────┼────────────────────────┐
//!         │                        │                        │
//!         ▼                        ▼                        ▼
//!    [Publisher]              [Viewer sink]            [Viewer sink]
//!    publish_frame() ──► cache ──► send_frame() ──► mpsc ──► TCP
//! ```
//!
//! Everything runs on one thread. Frames carry `bytes::Bytes`, so each
//! viewer shares the publisher's payload allocation.

pub mod config;
pub mod entry;
pub mod error;
pub mod player;
pub mod sink;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{MediaInfo, PublishStream};
pub use error::RegistryError;
pub use player::PlayStream;
pub use sink::{FrameSink, RelayFrame, RelayListener};
pub use store::{SharedRegistry, StreamRegistry};
