//! Error types for the relay core
//!
//! Each layer has its own error enum; they all fold into [`Error`] so that
//! protocol code can propagate with `?` regardless of which layer failed.

use thiserror::Error;

use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("amf error: {0}")]
    Amf(#[from] AmfError),

    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Peer went away (EOF or explicit close)
    #[error("connection closed")]
    ConnectionClosed,
}

/// Chunk/message framing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid chunk size {0}")]
    InvalidChunkSize(u32),

    #[error("message type {message_type} payload too short ({len} bytes)")]
    ShortMessage { message_type: u8, len: usize },

    #[error("unknown user control event {0}")]
    UnknownUserControl(u16),

    #[error("malformed command: {0}")]
    MalformedCommand(String),
}

/// AMF0 decode errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmfError {
    #[error("unexpected end of AMF data")]
    UnexpectedEof,

    #[error("AMF nesting too deep")]
    NestingTooDeep,

    #[error("unknown AMF0 marker 0x{0:02x}")]
    UnknownMarker(u8),

    #[error("missing AMF object end marker")]
    InvalidObjectEnd,

    #[error("invalid AMF reference {0}")]
    InvalidReference(u16),

    #[error("invalid UTF-8 in AMF string")]
    InvalidUtf8,
}

/// Media bitstream errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("invalid FLV tag")]
    InvalidFlvTag,

    #[error("invalid AAC packet")]
    InvalidAacPacket,

    #[error("invalid AVC packet")]
    InvalidAvcPacket,

    #[error("empty media payload")]
    EmptyPayload,
}
