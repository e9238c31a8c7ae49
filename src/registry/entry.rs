//! Per-path publish state
//!
//! A [`PublishStream`] owns everything a late joiner needs: the last
//! metadata, the AVC and AAC sequence headers and the current GOP. It also
//! collects the stream description reported by snapshots.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::amf::AmfValue;
use crate::media::flv::AudioFormat;
use crate::media::{AudioFrame, Frame, GopCache, VideoFrame};

/// Stream description gathered from the published frames
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    /// SoundFormat of the first audio frame
    pub audio_codec: Option<u8>,
    pub audio_codec_name: &'static str,
    pub audio_profile_name: &'static str,
    pub audio_sample_rate: u32,
    pub audio_channels: u8,

    /// CodecID of the first video frame
    pub video_codec: Option<u8>,
    pub video_codec_name: &'static str,
    pub video_profile_name: &'static str,
    pub video_width: u32,
    pub video_height: u32,
    pub video_fps: f64,
    pub video_level: f64,
}

impl MediaInfo {
    pub fn observe(&mut self, frame: &Frame) {
        match frame {
            Frame::Metadata(_) => {}
            Frame::Audio(audio) => self.observe_audio(audio),
            Frame::Video(video) => self.observe_video(video),
        }
    }

    fn observe_audio(&mut self, frame: &AudioFrame) {
        let Some(audio) = frame.header() else {
            return;
        };

        if self.audio_codec.is_none() {
            self.audio_codec = Some(audio.sound_format);
            self.audio_codec_name = audio.codec_name();
            self.audio_channels = audio.channels();
            // codecs with a fixed rate ignore the SoundRate field
            self.audio_sample_rate = match audio.format() {
                Some(AudioFormat::Nellymoser16kMono) | Some(AudioFormat::Speex) => 16000,
                Some(AudioFormat::Nellymoser8kMono)
                | Some(AudioFormat::G711ALaw)
                | Some(AudioFormat::G711MuLaw)
                | Some(AudioFormat::Mp38k) => 8000,
                _ => audio.sample_rate(),
            };
        }

        if let Some(config) = frame.aac().and_then(|aac| aac.config()) {
            self.audio_sample_rate = config.sample_rate;
            self.audio_channels = config.channels;
            self.audio_profile_name = config.profile_name();
        }
    }

    fn observe_video(&mut self, frame: &VideoFrame) {
        let Some(video) = frame.header() else {
            return;
        };

        if video.is_sequence_header() {
            if let Some(config) = frame.avc().and_then(|avc| avc.config()) {
                self.video_width = config.width();
                self.video_height = config.height();
                self.video_profile_name = config.profile_name();
                self.video_level = config.level_number();
            }
        }

        if self.video_codec.is_none() {
            self.video_codec = Some(video.codec_id);
            self.video_codec_name = video.codec_name();
        }
    }

    /// Take the encoder-declared properties of an `@setDataFrame` object
    pub fn apply_metadata(&mut self, data: &AmfValue) {
        if let Some(rate) = data.get_number("audiosamplerate") {
            self.audio_sample_rate = rate as u32;
        }
        if let Some(stereo) = data.get_bool("stereo") {
            self.audio_channels = if stereo { 2 } else { 1 };
        }
        if let Some(width) = data.get_number("width") {
            self.video_width = width as u32;
        }
        if let Some(height) = data.get_number("height") {
            self.video_height = height as u32;
        }
        if let Some(fps) = data.get_number("framerate") {
            self.video_fps = fps;
        }
    }
}

/// The live state of one publish path
#[derive(Debug)]
pub struct PublishStream {
    /// Publishing session
    pub session_id: u64,
    pub path: String,
    /// Message stream id the publisher sends on
    pub stream_id: u32,
    /// Query arguments of the publish name
    pub args: HashMap<String, String>,
    pub start_time: DateTime<Utc>,
    pub info: MediaInfo,

    has_audio: bool,
    has_video: bool,
    metadata: Option<Frame>,
    avc_header: Option<Frame>,
    aac_header: Option<Frame>,
    gop: Option<GopCache>,
}

impl PublishStream {
    pub fn new(session_id: u64, path: impl Into<String>, stream_id: u32) -> Self {
        Self {
            session_id,
            path: path.into(),
            stream_id,
            args: HashMap::new(),
            start_time: Utc::now(),
            info: MediaInfo::default(),
            has_audio: false,
            has_video: false,
            metadata: None,
            avc_header: None,
            aac_header: None,
            gop: None,
        }
    }

    pub fn with_args(mut self, args: HashMap<String, String>) -> Self {
        self.args = args;
        self
    }

    pub(super) fn set_gop_cache(&mut self, gop: Option<GopCache>) {
        self.gop = gop;
    }

    pub fn has_audio(&self) -> bool {
        self.has_audio
    }

    pub fn has_video(&self) -> bool {
        self.has_video
    }

    pub fn metadata(&self) -> Option<&Frame> {
        self.metadata.as_ref()
    }

    pub fn avc_header(&self) -> Option<&Frame> {
        self.avc_header.as_ref()
    }

    pub fn aac_header(&self) -> Option<&Frame> {
        self.aac_header.as_ref()
    }

    pub fn gop(&self) -> Option<&GopCache> {
        self.gop.as_ref()
    }

    /// Update caches and stream info with a published frame
    pub(super) fn ingest(&mut self, frame: &Frame) {
        self.info.observe(frame);

        match frame {
            Frame::Metadata(_) => {
                self.metadata = Some(frame.clone());
            }
            Frame::Audio(audio) => {
                self.has_audio = true;
                if audio.is_sequence_header() {
                    self.aac_header = Some(detached(frame));
                }
            }
            Frame::Video(video) => {
                self.has_video = true;
                if video.is_sequence_header() {
                    self.avc_header = Some(detached(frame));
                }
            }
        }

        if let Some(gop) = self.gop.as_mut() {
            gop.push(frame.clone());
        }
    }

    /// What a joining viewer receives before live frames, in order:
    /// metadata, AVC header, AAC header, then the GOP if requested
    pub fn bootstrap_frames(&self, with_gop: bool) -> impl Iterator<Item = &Frame> {
        let gop = self
            .gop
            .as_ref()
            .filter(|_| with_gop)
            .into_iter()
            .flat_map(|gop| gop.frames());

        self.metadata
            .iter()
            .chain(self.avc_header.iter())
            .chain(self.aac_header.iter())
            .chain(gop)
    }
}

/// Clone for long-lived storage, without the parsed sub-packet
fn detached(frame: &Frame) -> Frame {
    let mut frame = frame.clone();
    frame.destroy();
    frame
}
