//! GOP (Group of Pictures) cache for late joiners
//!
//! A viewer that joins mid-stream needs the sequence headers and every
//! frame since the last keyframe to start decoding at once. The sequence
//! headers are kept by the publish stream; this cache holds the frames.
//!
//! Policy on each published frame:
//! - a video keyframe NALU clears the cache, then is appended
//! - AVC/AAC sequence headers and metadata are never appended
//! - every other audio/video frame is appended
//!
//! The cache therefore starts at a keyframe, or holds a partial leading
//! GOP if no keyframe has been seen yet.

use std::collections::VecDeque;

use super::frame::Frame;

#[derive(Debug, Default)]
pub struct GopCache {
    frames: VecDeque<Frame>,
    /// Payload bytes held
    size: usize,
    /// Optional byte cap
    max_size: Option<usize>,
    /// Set after the cap was hit; frames are dropped until the next keyframe
    waiting_for_keyframe: bool,
}

impl GopCache {
    /// Unbounded cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache that gives up on a GOP once it grows past `max_size` bytes
    pub fn with_max_size(max_size: Option<usize>) -> Self {
        Self {
            max_size,
            ..Self::default()
        }
    }

    /// Apply the cache policy to a published frame
    ///
    /// Returns true if the frame was stored. Stored frames have their parsed
    /// sub-packet dropped.
    pub fn push(&mut self, mut frame: Frame) -> bool {
        if matches!(frame, Frame::Metadata(_)) || frame.is_sequence_header() {
            return false;
        }

        if frame.is_keyframe_nalu() {
            self.clear();
        } else if self.waiting_for_keyframe {
            return false;
        }

        let len = frame.payload().len();
        if let Some(max) = self.max_size {
            if self.size + len > max {
                // a truncated GOP is undecodable; start over at the next keyframe
                self.clear();
                self.waiting_for_keyframe = true;
                return false;
            }
        }

        frame.destroy();
        self.size += len;
        self.frames.push_back(frame);
        true
    }

    /// Cached frames, oldest first
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.size = 0;
        self.waiting_for_keyframe = false;
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Payload bytes currently held
    pub fn size(&self) -> usize {
        self.size
    }

    /// True when the first cached frame is a keyframe NALU
    pub fn starts_with_keyframe(&self) -> bool {
        self.frames.front().is_some_and(|f| f.is_keyframe_nalu())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn key(ts: u32) -> Frame {
        Frame::video(ts, Bytes::from_static(&[0x17, 0x01, 0, 0, 0, 0xAA]))
    }

    fn inter(ts: u32) -> Frame {
        Frame::video(ts, Bytes::from_static(&[0x27, 0x01, 0, 0, 0, 0xBB]))
    }

    fn audio(ts: u32) -> Frame {
        Frame::audio(ts, Bytes::from_static(&[0xAF, 0x01, 0x21]))
    }

    fn timestamps(cache: &GopCache) -> Vec<u32> {
        cache.frames().map(|f| f.timestamp()).collect()
    }

    #[test]
    fn test_keyframe_restarts_cache() {
        let mut cache = GopCache::new();
        for frame in [key(0), audio(10), inter(40), key(80), audio(90), inter(120)] {
            cache.push(frame);
        }
        assert_eq!(timestamps(&cache), vec![80, 90, 120]);
        assert!(cache.starts_with_keyframe());
    }

    #[test]
    fn test_sequence_headers_not_cached() {
        let mut cache = GopCache::new();
        assert!(!cache.push(Frame::video(0, Bytes::from_static(&[0x17, 0x00, 0, 0, 0]))));
        assert!(!cache.push(Frame::audio(0, Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]))));
        assert!(!cache.push(Frame::metadata(0, Bytes::from_static(b"meta"))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_partial_leading_gop() {
        let mut cache = GopCache::new();
        cache.push(inter(0));
        cache.push(audio(5));
        assert_eq!(cache.len(), 2);
        assert!(!cache.starts_with_keyframe());

        cache.push(key(40));
        assert_eq!(timestamps(&cache), vec![40]);
    }

    #[test]
    fn test_gop_invariant_over_sequence() {
        // deterministic mix of frame kinds
        let mut cache = GopCache::new();
        let mut last_key = None;
        for i in 0..200u32 {
            let frame = match (i * 7 + 3) % 11 {
                0 | 5 => key(i),
                1 | 2 | 3 => audio(i),
                _ => inter(i),
            };
            if frame.is_keyframe_nalu() {
                last_key = Some(i);
            }
            cache.push(frame);

            if let Some(k) = last_key {
                assert!(cache.starts_with_keyframe());
                let expected: Vec<u32> = (k..=i).collect();
                assert_eq!(timestamps(&cache), expected);
            }
        }
    }

    #[test]
    fn test_stored_frames_are_destroyed() {
        let mut cache = GopCache::new();
        let frame = key(0);
        if let Frame::Video(v) = &frame {
            assert!(v.avc().is_some());
        }
        assert!(frame.is_parsed());
        cache.push(frame);
        assert!(cache.frames().all(|f| !f.is_parsed()));
    }

    #[test]
    fn test_byte_cap_waits_for_next_keyframe() {
        // each video frame is 6 bytes, audio 3
        let mut cache = GopCache::with_max_size(Some(15));
        assert!(cache.push(key(0)));
        assert!(cache.push(inter(1)));
        assert!(cache.push(audio(2)));
        assert_eq!(cache.size(), 15);

        assert!(!cache.push(inter(3)));
        assert!(cache.is_empty());
        assert!(!cache.push(audio(4)));

        assert!(cache.push(key(5)));
        assert_eq!(timestamps(&cache), vec![5]);
    }
}
