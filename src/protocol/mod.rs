//! RTMP wire protocol
//!
//! Handshake, chunk stream framing and the message layer on top of it.

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;

pub use chunk::{ChunkDecoder, ChunkEncoder, RtmpChunk};
pub use handshake::{Handshake, HandshakeState};
pub use message::{
    Command, ConnectParams, DataMessage, PlayParams, PublishParams, RtmpMessage, UserControlEvent,
};
