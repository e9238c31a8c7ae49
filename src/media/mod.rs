//! Media handling for RTMP
//!
//! This module provides:
//! - FLV tag envelope and audio/video data headers
//! - H.264/AVC packets and SPS parsing
//! - AAC packets and AudioSpecificConfig parsing
//! - Relay frames with lazily parsed codec data
//! - GOP caching for late joiners

pub mod aac;
pub mod bits;
pub mod flv;
pub mod frame;
pub mod gop;
pub mod h264;

pub use aac::{AacData, AacPacketType, AudioSpecificConfig};
pub use bits::BitReader;
pub use flv::{AudioData, FlvTag, FlvTagType, VideoData};
pub use frame::{AudioFrame, Frame, FrameKind, MetadataFrame, VideoFrame};
pub use gop::GopCache;
pub use h264::{AvcConfig, AvcPacketType, H264Data, SpsInfo};
