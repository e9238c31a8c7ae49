//! Per-session counters

/// Session-level statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Bytes read from the peer, handshake included
    pub bytes_received: u64,
    /// Bytes queued to the peer
    pub bytes_sent: u64,
    /// Video messages received
    pub video_frames: u64,
    /// Audio messages received
    pub audio_frames: u64,
    /// Video keyframes received
    pub keyframes: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_video(&mut self, keyframe: bool) {
        self.video_frames += 1;
        if keyframe {
            self.keyframes += 1;
        }
    }

    pub(crate) fn on_audio(&mut self) {
        self.audio_frames += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_counters() {
        let mut stats = SessionStats::new();
        stats.on_video(true);
        stats.on_video(false);
        stats.on_audio();

        assert_eq!(stats.video_frames, 2);
        assert_eq!(stats.keyframes, 1);
        assert_eq!(stats.audio_frames, 1);
        assert_eq!(stats.bytes_received, 0);
    }
}
