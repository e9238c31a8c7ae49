//! FLV tags and the audio/video data headers
//!
//! RTMP audio/video message payloads are FLV tag bodies. The tag envelope
//! itself only appears when writing FLV files:
//!
//! ```text
//! +--------+-------------+-----------+---------------+---------+-------------+
//! | Type(1)| DataSize(3) | TS(3+1)   | StreamID(3)   | Data(N) | PrevSize(4) |
//! +--------+-------------+-----------+---------------+---------+-------------+
//! ```
//!
//! Video data:
//! ```text
//! +----------+----------+
//! | FrameType| CodecID  | CodecData...
//! | (4 bits) | (4 bits) |
//! +----------+----------+
//! ```
//!
//! Audio data:
//! ```text
//! +-----------+---------+----------+----------+
//! |SoundFormat|SoundRate|SoundSize |SoundType | AudioData...
//! | (4 bits)  | (2 bits)| (1 bit)  | (1 bit)  |
//! +-----------+---------+----------+----------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};

/// Size of the tag envelope before the data
pub const FLV_TAG_HEADER_SIZE: usize = 11;

/// Size of the FLV file header including the leading PreviousTagSize0
pub const FLV_FILE_HEADER_SIZE: usize = 13;

const AUDIO_CODEC_NAMES: [&str; 17] = [
    "",
    "ADPCM",
    "MP3",
    "LinearLE",
    "Nellymoser16",
    "Nellymoser8",
    "Nellymoser",
    "G711A",
    "G711U",
    "",
    "AAC",
    "Speex",
    "",
    "OPUS",
    "MP3-8K",
    "DeviceSpecific",
    "Uncompressed",
];

const VIDEO_CODEC_NAMES: [&str; 13] = [
    "",
    "Jpeg",
    "Sorenson-H263",
    "Screen Video",
    "On2-VP6",
    "On2-VP6-Alpha",
    "Screen Video 2",
    "H264",
    "",
    "",
    "",
    "",
    "H265",
];

const SOUND_RATES: [u32; 4] = [5512, 11025, 22050, 44100];

/// Display name for an FLV SoundFormat
pub fn audio_codec_name(format: u8) -> &'static str {
    AUDIO_CODEC_NAMES.get(format as usize).copied().unwrap_or("")
}

/// Display name for an FLV video CodecID
pub fn video_codec_name(codec_id: u8) -> &'static str {
    VIDEO_CODEC_NAMES.get(codec_id as usize).copied().unwrap_or("")
}

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio = 8,
    Video = 9,
    Script = 18,
}

impl FlvTagType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            8 => Some(FlvTagType::Audio),
            9 => Some(FlvTagType::Video),
            18 => Some(FlvTagType::Script),
            _ => None,
        }
    }
}

/// One FLV tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlvTag {
    pub tag_type: FlvTagType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Tag body (the RTMP message payload)
    pub data: Bytes,
}

impl FlvTag {
    pub fn new(tag_type: FlvTagType, timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type,
            timestamp,
            data,
        }
    }

    pub fn video(timestamp: u32, data: Bytes) -> Self {
        Self::new(FlvTagType::Video, timestamp, data)
    }

    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self::new(FlvTagType::Audio, timestamp, data)
    }

    pub fn script(timestamp: u32, data: Bytes) -> Self {
        Self::new(FlvTagType::Script, timestamp, data)
    }

    /// Encoded size including the trailing PreviousTagSize
    pub fn encoded_len(&self) -> usize {
        FLV_TAG_HEADER_SIZE + self.data.len() + 4
    }

    /// Write header, data and PreviousTagSize (11 + DataSize)
    pub fn encode(&self, buf: &mut BytesMut) {
        let size = self.data.len() as u32;
        buf.reserve(self.encoded_len());
        buf.put_u8(self.tag_type as u8);
        buf.put_uint(size as u64 & 0xFF_FFFF, 3);
        buf.put_uint(self.timestamp as u64 & 0xFF_FFFF, 3);
        buf.put_u8((self.timestamp >> 24) as u8);
        buf.put_uint(0, 3);
        buf.put_slice(&self.data);
        buf.put_u32(FLV_TAG_HEADER_SIZE as u32 + size);
    }

    /// Read one tag, including its trailing PreviousTagSize
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        if buf.len() < FLV_TAG_HEADER_SIZE {
            return Err(MediaError::InvalidFlvTag.into());
        }
        let tag_type = FlvTagType::from_byte(buf[0]).ok_or(MediaError::InvalidFlvTag)?;
        let size = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]) as usize;
        if buf.len() < FLV_TAG_HEADER_SIZE + size + 4 {
            return Err(MediaError::InvalidFlvTag.into());
        }

        buf.advance(4);
        let low = buf.get_uint(3) as u32;
        let high = buf.get_u8() as u32;
        let _stream_id = buf.get_uint(3);
        let data = buf.split_to(size);
        let _previous_size = buf.get_u32();

        Ok(Self {
            tag_type,
            timestamp: (high << 24) | low,
            data,
        })
    }

    pub fn is_keyframe(&self) -> bool {
        self.tag_type == FlvTagType::Video
            && VideoData::parse(&self.data).is_ok_and(|v| v.is_keyframe())
    }

    pub fn is_sequence_header(&self) -> bool {
        match self.tag_type {
            FlvTagType::Audio => AudioData::parse(&self.data).is_ok_and(|a| a.is_sequence_header()),
            FlvTagType::Video => VideoData::parse(&self.data).is_ok_and(|v| v.is_sequence_header()),
            FlvTagType::Script => false,
        }
    }
}

/// Write the 9-byte FLV file header followed by PreviousTagSize0
pub fn write_file_header(buf: &mut BytesMut, has_audio: bool, has_video: bool) {
    let mut flags = 0u8;
    if has_audio {
        flags |= 0x04;
    }
    if has_video {
        flags |= 0x01;
    }
    buf.reserve(FLV_FILE_HEADER_SIZE);
    buf.put_slice(b"FLV");
    buf.put_u8(1);
    buf.put_u8(flags);
    buf.put_u32(9);
    buf.put_u32(0);
}

/// Video frame type (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    /// Keyframe (for AVC, a seekable frame)
    Keyframe = 1,
    /// Inter frame (for AVC, a non-seekable frame)
    InterFrame = 2,
    /// Disposable inter frame (H.263 only)
    DisposableInterFrame = 3,
    /// Generated keyframe (reserved for server use)
    GeneratedKeyframe = 4,
    /// Video info/command frame
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }
}

/// Video codec ID (lower 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Jpeg = 1,
    SorensonH263 = 2,
    ScreenVideo = 3,
    Vp6 = 4,
    Vp6Alpha = 5,
    ScreenVideoV2 = 6,
    /// AVC (H.264)
    Avc = 7,
    /// HEVC (H.265), carried with the AVC packet layout
    Hevc = 12,
}

impl VideoCodec {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x0F {
            1 => Some(VideoCodec::Jpeg),
            2 => Some(VideoCodec::SorensonH263),
            3 => Some(VideoCodec::ScreenVideo),
            4 => Some(VideoCodec::Vp6),
            5 => Some(VideoCodec::Vp6Alpha),
            6 => Some(VideoCodec::ScreenVideoV2),
            7 => Some(VideoCodec::Avc),
            12 => Some(VideoCodec::Hevc),
            _ => None,
        }
    }

    /// Whether payloads start with an AVCPacketType byte
    pub fn has_packet_type(&self) -> bool {
        matches!(self, VideoCodec::Avc | VideoCodec::Hevc)
    }
}

/// Audio format (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    LinearPcmPlatform = 0,
    Adpcm = 1,
    Mp3 = 2,
    LinearPcmLe = 3,
    Nellymoser16kMono = 4,
    Nellymoser8kMono = 5,
    Nellymoser = 6,
    G711ALaw = 7,
    G711MuLaw = 8,
    Aac = 10,
    Speex = 11,
    Opus = 13,
    Mp38k = 14,
    DeviceSpecific = 15,
}

impl AudioFormat {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            0 => Some(AudioFormat::LinearPcmPlatform),
            1 => Some(AudioFormat::Adpcm),
            2 => Some(AudioFormat::Mp3),
            3 => Some(AudioFormat::LinearPcmLe),
            4 => Some(AudioFormat::Nellymoser16kMono),
            5 => Some(AudioFormat::Nellymoser8kMono),
            6 => Some(AudioFormat::Nellymoser),
            7 => Some(AudioFormat::G711ALaw),
            8 => Some(AudioFormat::G711MuLaw),
            10 => Some(AudioFormat::Aac),
            11 => Some(AudioFormat::Speex),
            13 => Some(AudioFormat::Opus),
            14 => Some(AudioFormat::Mp38k),
            15 => Some(AudioFormat::DeviceSpecific),
            _ => None,
        }
    }
}

/// Decoded first byte of an audio payload plus the codec data after it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioData {
    /// SoundFormat, 10 = AAC
    pub sound_format: u8,
    /// SoundRate index into 5.5/11/22/44 kHz
    pub sound_rate: u8,
    /// 0 = 8-bit, 1 = 16-bit samples
    pub sound_size: u8,
    /// 0 = mono, 1 = stereo
    pub sound_type: u8,
    pub body: Bytes,
}

impl AudioData {
    pub fn parse(payload: &Bytes) -> Result<Self> {
        let first = *payload.first().ok_or(MediaError::EmptyPayload)?;
        Ok(Self {
            sound_format: first >> 4,
            sound_rate: (first >> 2) & 0x03,
            sound_size: (first >> 1) & 0x01,
            sound_type: first & 0x01,
            body: payload.slice(1..),
        })
    }

    pub fn format(&self) -> Option<AudioFormat> {
        AudioFormat::from_byte(self.sound_format << 4)
    }

    pub fn is_aac(&self) -> bool {
        self.sound_format == AudioFormat::Aac as u8
    }

    pub fn is_sequence_header(&self) -> bool {
        self.is_aac() && self.body.first() == Some(&0)
    }

    pub fn codec_name(&self) -> &'static str {
        audio_codec_name(self.sound_format)
    }

    pub fn sample_rate(&self) -> u32 {
        SOUND_RATES[self.sound_rate as usize & 0x03]
    }

    pub fn channels(&self) -> u8 {
        self.sound_type + 1
    }
}

/// Decoded first byte of a video payload plus the codec data after it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoData {
    pub frame_type: u8,
    pub codec_id: u8,
    pub body: Bytes,
}

impl VideoData {
    pub fn parse(payload: &Bytes) -> Result<Self> {
        let first = *payload.first().ok_or(MediaError::EmptyPayload)?;
        Ok(Self {
            frame_type: first >> 4,
            codec_id: first & 0x0F,
            body: payload.slice(1..),
        })
    }

    pub fn frame_type(&self) -> Option<VideoFrameType> {
        VideoFrameType::from_byte(self.frame_type << 4)
    }

    pub fn codec(&self) -> Option<VideoCodec> {
        VideoCodec::from_byte(self.codec_id)
    }

    pub fn is_keyframe(&self) -> bool {
        self.frame_type == VideoFrameType::Keyframe as u8
    }

    /// AVCPacketType for AVC/HEVC payloads
    pub fn packet_type(&self) -> Option<u8> {
        match self.codec() {
            Some(codec) if codec.has_packet_type() => self.body.first().copied(),
            _ => None,
        }
    }

    pub fn is_sequence_header(&self) -> bool {
        self.packet_type() == Some(0)
    }

    pub fn is_nalu(&self) -> bool {
        self.packet_type() == Some(1)
    }

    pub fn codec_name(&self) -> &'static str {
        video_codec_name(self.codec_id)
    }
}
