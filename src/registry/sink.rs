//! Seams between the registry and the outside world
//!
//! A [`FrameSink`] is the delivery end of one viewer: the registry hands it
//! frames in publish order and never waits on it. A [`RelayListener`] sees
//! every path's lifecycle and frames, for recorders or cluster gateways.

use bytes::Bytes;

use crate::media::{Frame, FrameKind};

/// Delivery end of one viewer
pub trait FrameSink {
    /// Queue a frame for the viewer; must not block
    fn send_frame(&mut self, frame: &Frame);

    /// The publisher went away; notify the viewer and shut it down
    fn close(&mut self);
}

/// A published frame as seen by a [`RelayListener`]
#[derive(Debug, Clone, Copy)]
pub struct RelayFrame<'a> {
    pub path: &'a str,
    pub payload: &'a Bytes,
    pub timestamp: u32,
    pub kind: FrameKind,
}

impl<'a> RelayFrame<'a> {
    pub fn new(path: &'a str, frame: &'a Frame) -> Self {
        Self {
            path,
            payload: frame.payload(),
            timestamp: frame.timestamp(),
            kind: frame.kind(),
        }
    }
}

/// Observer for every publish path
///
/// All methods default to no-ops.
pub trait RelayListener {
    /// The path has a publisher and is ready for viewers
    fn on_publish_ready(&mut self, _path: &str) {}

    fn on_frame(&mut self, _frame: &RelayFrame<'_>) {}

    /// The publisher left
    fn on_close(&mut self, _path: &str) {}
}
