//! Relay frames
//!
//! A [`Frame`] is one audio, video or metadata message as it travels from
//! a publisher to its viewers. The raw payload never changes after
//! construction. Codec sub-packets are parsed on first access and cached;
//! [`Frame::destroy`] drops that cache so frames parked in a GOP cache only
//! hold their payload.

use std::cell::OnceCell;

use bytes::Bytes;

use super::aac::AacData;
use super::flv::{AudioData, FlvTag, VideoData};
use super::h264::H264Data;
use crate::protocol::constants::{
    CSID_AUDIO, CSID_DATA, CSID_VIDEO, MSG_AUDIO, MSG_DATA_AMF0, MSG_VIDEO,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Metadata,
    Audio,
    Video,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Metadata => "metadata",
            FrameKind::Audio => "audio",
            FrameKind::Video => "video",
        }
    }

    /// RTMP message type used to carry this kind
    pub fn message_type(&self) -> u8 {
        match self {
            FrameKind::Metadata => MSG_DATA_AMF0,
            FrameKind::Audio => MSG_AUDIO,
            FrameKind::Video => MSG_VIDEO,
        }
    }

    /// Chunk stream the frame is sent on
    pub fn csid(&self) -> u32 {
        match self {
            FrameKind::Metadata => CSID_DATA,
            FrameKind::Audio => CSID_AUDIO,
            FrameKind::Video => CSID_VIDEO,
        }
    }
}

/// Encoded `onMetaData` data message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFrame {
    pub timestamp: u32,
    pub payload: Bytes,
}

#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub timestamp: u32,
    pub payload: Bytes,
    aac: OnceCell<Option<AacData>>,
}

impl AudioFrame {
    pub fn new(timestamp: u32, payload: Bytes) -> Self {
        Self {
            timestamp,
            payload,
            aac: OnceCell::new(),
        }
    }

    pub fn header(&self) -> Option<AudioData> {
        AudioData::parse(&self.payload).ok()
    }

    /// AAC packet, parsed once; `None` for other formats or a bad packet
    pub fn aac(&self) -> Option<&AacData> {
        self.aac
            .get_or_init(|| {
                let audio = self.header().filter(|a| a.is_aac())?;
                AacData::parse(audio.body).ok()
            })
            .as_ref()
    }

    pub fn is_sequence_header(&self) -> bool {
        self.header().is_some_and(|a| a.is_sequence_header())
    }
}

#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub timestamp: u32,
    pub payload: Bytes,
    avc: OnceCell<Option<H264Data>>,
}

impl VideoFrame {
    pub fn new(timestamp: u32, payload: Bytes) -> Self {
        Self {
            timestamp,
            payload,
            avc: OnceCell::new(),
        }
    }

    pub fn header(&self) -> Option<VideoData> {
        VideoData::parse(&self.payload).ok()
    }

    /// AVC packet, parsed once; `None` for other codecs or a bad packet
    pub fn avc(&self) -> Option<&H264Data> {
        self.avc
            .get_or_init(|| {
                let video = self.header().filter(|v| v.codec_id == 7)?;
                H264Data::parse(video.body).ok()
            })
            .as_ref()
    }

    pub fn is_sequence_header(&self) -> bool {
        self.header().is_some_and(|v| v.is_sequence_header())
    }

    /// Keyframe carrying coded picture data (starts a GOP)
    pub fn is_keyframe_nalu(&self) -> bool {
        self.header().is_some_and(|v| v.is_keyframe() && v.is_nalu())
    }
}

/// Closed union of everything a publisher relays
#[derive(Debug, Clone)]
pub enum Frame {
    Metadata(MetadataFrame),
    Audio(AudioFrame),
    Video(VideoFrame),
}

impl Frame {
    pub fn metadata(timestamp: u32, payload: Bytes) -> Self {
        Frame::Metadata(MetadataFrame { timestamp, payload })
    }

    pub fn audio(timestamp: u32, payload: Bytes) -> Self {
        Frame::Audio(AudioFrame::new(timestamp, payload))
    }

    pub fn video(timestamp: u32, payload: Bytes) -> Self {
        Frame::Video(VideoFrame::new(timestamp, payload))
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Metadata(_) => FrameKind::Metadata,
            Frame::Audio(_) => FrameKind::Audio,
            Frame::Video(_) => FrameKind::Video,
        }
    }

    pub fn timestamp(&self) -> u32 {
        match self {
            Frame::Metadata(f) => f.timestamp,
            Frame::Audio(f) => f.timestamp,
            Frame::Video(f) => f.timestamp,
        }
    }

    pub fn payload(&self) -> &Bytes {
        match self {
            Frame::Metadata(f) => &f.payload,
            Frame::Audio(f) => &f.payload,
            Frame::Video(f) => &f.payload,
        }
    }

    /// AVC or AAC sequence header
    pub fn is_sequence_header(&self) -> bool {
        match self {
            Frame::Metadata(_) => false,
            Frame::Audio(f) => f.is_sequence_header(),
            Frame::Video(f) => f.is_sequence_header(),
        }
    }

    pub fn is_keyframe_nalu(&self) -> bool {
        match self {
            Frame::Video(f) => f.is_keyframe_nalu(),
            Frame::Metadata(_) | Frame::Audio(_) => false,
        }
    }

    /// Drop any parsed sub-packet, keeping the payload
    pub fn destroy(&mut self) {
        match self {
            Frame::Metadata(_) => {}
            Frame::Audio(f) => {
                f.aac.take();
            }
            Frame::Video(f) => {
                f.avc.take();
            }
        }
    }

    /// True while a parsed sub-packet is cached
    pub fn is_parsed(&self) -> bool {
        match self {
            Frame::Metadata(_) => false,
            Frame::Audio(f) => f.aac.get().is_some(),
            Frame::Video(f) => f.avc.get().is_some(),
        }
    }

    pub fn to_flv_tag(&self) -> FlvTag {
        let payload = self.payload().clone();
        match self {
            Frame::Metadata(f) => FlvTag::script(f.timestamp, payload),
            Frame::Audio(f) => FlvTag::audio(f.timestamp, payload),
            Frame::Video(f) => FlvTag::video(f.timestamp, payload),
        }
    }
}
