//! Viewer registrations

use std::collections::HashMap;
use std::fmt;

use super::sink::FrameSink;
use crate::media::{Frame, FrameKind};

/// One viewer attached to a path
pub struct PlayStream {
    /// Viewing session
    pub session_id: u64,
    pub path: String,
    /// Message stream id frames are sent on
    pub stream_id: u32,
    /// Query arguments of the play name
    pub args: HashMap<String, String>,

    pub receive_audio: bool,
    pub receive_video: bool,
    /// Send the cached GOP when playback starts
    pub gop_enabled: bool,

    idle: bool,
    sink: Box<dyn FrameSink>,
}

impl PlayStream {
    pub fn new(
        session_id: u64,
        path: impl Into<String>,
        stream_id: u32,
        sink: Box<dyn FrameSink>,
    ) -> Self {
        Self {
            session_id,
            path: path.into(),
            stream_id,
            args: HashMap::new(),
            receive_audio: true,
            receive_video: true,
            gop_enabled: true,
            idle: true,
            sink,
        }
    }

    pub fn with_args(mut self, args: HashMap<String, String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_gop(mut self, enabled: bool) -> Self {
        self.gop_enabled = enabled;
        self
    }

    /// Waiting for the path to go live
    pub fn is_idle(&self) -> bool {
        self.idle
    }

    pub fn is_playing(&self) -> bool {
        !self.idle
    }

    pub(super) fn mark_playing(&mut self) {
        self.idle = false;
    }

    fn wants(&self, kind: FrameKind) -> bool {
        match kind {
            FrameKind::Metadata => true,
            FrameKind::Audio => self.receive_audio,
            FrameKind::Video => self.receive_video,
        }
    }

    /// Forward a frame subject to the audio/video toggles
    pub(super) fn deliver(&mut self, frame: &Frame) {
        if self.wants(frame.kind()) {
            self.sink.send_frame(frame);
        }
    }

    pub(super) fn close(&mut self) {
        self.idle = true;
        self.sink.close();
    }
}

impl fmt::Debug for PlayStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayStream")
            .field("session_id", &self.session_id)
            .field("path", &self.path)
            .field("stream_id", &self.stream_id)
            .field("idle", &self.idle)
            .field("receive_audio", &self.receive_audio)
            .field("receive_video", &self.receive_video)
            .field("gop_enabled", &self.gop_enabled)
            .finish()
    }
}
