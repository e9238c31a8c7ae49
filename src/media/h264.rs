//! H.264/AVC packets
//!
//! RTMP carries H.264 in AVCC form (length-prefixed NAL units). After the
//! one-byte FLV video header comes:
//!
//! ```text
//! +-----------------+-----------------------+------+
//! | AVCPacketType   | CompositionTime       | Data |
//! | (1 byte)        | (3 bytes, signed)     |      |
//! +-----------------+-----------------------+------+
//! ```
//!
//! AVCPacketType 0 carries an AVCDecoderConfigurationRecord:
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | lengthSizeMinusOne (1, lower 2 bits)
//! | numOfSPS (1, lower 5 bits) | { spsLength (2) | spsNALUnit }*
//! | numOfPPS (1) | { ppsLength (2) | ppsNALUnit }*
//! ```
//!
//! The first SPS is bit-parsed for picture dimensions. Truncated records and
//! SPS bodies are tolerated: whatever could not be read is reported as zero.

use bytes::{Buf, Bytes};

use super::bits::BitReader;
use crate::error::{MediaError, Result};

/// Profiles whose SPS carries the chroma format / bit depth / scaling block
const HIGH_PROFILES: [u32; 8] = [100, 110, 122, 244, 44, 83, 86, 118];

/// AVC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    SequenceHeader = 0,
    Nalu = 1,
    EndOfSequence = 2,
}

impl AvcPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AvcPacketType::SequenceHeader),
            1 => Some(AvcPacketType::Nalu),
            2 => Some(AvcPacketType::EndOfSequence),
            _ => None,
        }
    }
}

/// Parsed H.264 packet
#[derive(Debug, Clone, PartialEq)]
pub enum H264Data {
    SequenceHeader(AvcConfig),

    /// One or more NAL units
    Nalu {
        /// PTS - DTS in milliseconds
        composition_time: i32,
        /// AVCC length-prefixed NAL units
        nalus: Bytes,
    },

    EndOfSequence,
}

impl H264Data {
    /// Parse from RTMP video data (after the frame type / codec byte)
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.len() < 4 {
            return Err(MediaError::InvalidAvcPacket.into());
        }

        let packet_type = data.get_u8();
        let raw = data.get_uint(3) as i32;
        // sign-extend 24 bits
        let composition_time = (raw << 8) >> 8;

        match AvcPacketType::from_byte(packet_type) {
            Some(AvcPacketType::SequenceHeader) => Ok(H264Data::SequenceHeader(AvcConfig::parse(data))),
            Some(AvcPacketType::Nalu) => Ok(H264Data::Nalu {
                composition_time,
                nalus: data,
            }),
            Some(AvcPacketType::EndOfSequence) => Ok(H264Data::EndOfSequence),
            None => Err(MediaError::InvalidAvcPacket.into()),
        }
    }

    pub fn is_sequence_header(&self) -> bool {
        matches!(self, H264Data::SequenceHeader(_))
    }

    pub fn config(&self) -> Option<&AvcConfig> {
        match self {
            H264Data::SequenceHeader(config) => Some(config),
            _ => None,
        }
    }
}

/// AVC decoder configuration (from the sequence header)
#[derive(Debug, Clone, PartialEq)]
pub struct AvcConfig {
    /// AVCProfileIndication (66=Baseline, 77=Main, 100=High, ...)
    pub profile: u8,
    pub compatibility: u8,
    /// AVCLevelIndication (31 = 3.1)
    pub level: u8,
    /// Bytes per NAL length prefix (usually 4)
    pub nalu_length_size: u8,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
    /// Fields decoded from the first SPS
    pub sps_info: SpsInfo,
    /// Raw AVCDecoderConfigurationRecord
    pub raw: Bytes,
}

impl AvcConfig {
    pub fn parse(data: Bytes) -> Self {
        let raw = data.clone();
        let mut data = data;
        let mut byte = || if data.has_remaining() { data.get_u8() } else { 0 };

        let _version = byte();
        let profile = byte();
        let compatibility = byte();
        let level = byte();
        let nalu_length_size = (byte() & 0x03) + 1;
        let num_sps = (byte() & 0x1F) as usize;

        let sps = read_parameter_sets(&mut data, num_sps);
        let num_pps = if data.has_remaining() {
            data.get_u8() as usize
        } else {
            0
        };
        let pps = read_parameter_sets(&mut data, num_pps);

        let sps_info = sps.first().map(|s| SpsInfo::parse(s)).unwrap_or_default();

        AvcConfig {
            profile,
            compatibility,
            level,
            nalu_length_size,
            sps,
            pps,
            sps_info,
            raw,
        }
    }

    pub fn profile_name(&self) -> &'static str {
        profile_name(self.profile as u32)
    }

    /// Level as a decimal (31 -> 3.1)
    pub fn level_number(&self) -> f64 {
        self.level as f64 / 10.0
    }

    pub fn width(&self) -> u32 {
        self.sps_info.width
    }

    pub fn height(&self) -> u32 {
        self.sps_info.height
    }
}

fn read_parameter_sets(data: &mut Bytes, count: usize) -> Vec<Bytes> {
    let mut sets = Vec::with_capacity(count.min(32));
    for _ in 0..count {
        if data.remaining() < 2 {
            break;
        }
        let len = (data.get_u16() as usize).min(data.remaining());
        sets.push(data.split_to(len));
    }
    sets
}

/// Name for an AVC profile_idc
pub fn profile_name(profile: u32) -> &'static str {
    match profile {
        66 => "Baseline",
        77 => "Main",
        88 => "Extended",
        100 => "High",
        110 => "High 10",
        122 => "High 4:2:2",
        244 => "High 4:4:4",
        _ => "",
    }
}

/// Fields of a sequence parameter set relevant for stream info
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile_idc: u32,
    pub level_idc: u32,
    pub ref_frames: u32,
    pub frame_mbs_only: bool,
    pub width: u32,
    pub height: u32,
}

impl SpsInfo {
    /// Parse an SPS NAL unit, header byte included
    pub fn parse(nal: &[u8]) -> Self {
        let rbsp = strip_emulation_prevention(nal.get(1..).unwrap_or_default());
        let mut bits = BitReader::new(&rbsp);

        let profile_idc = bits.read(8);
        let _constraint_flags = bits.read(8);
        let level_idc = bits.read(8);
        let _sps_id = bits.read_golomb();

        if HIGH_PROFILES.contains(&profile_idc) {
            let chroma_format_idc = bits.read_golomb();
            if chroma_format_idc == 3 {
                let _separate_colour_plane = bits.read(1);
            }
            let _bit_depth_luma = bits.read_golomb();
            let _bit_depth_chroma = bits.read_golomb();
            let _qpprime_y_zero_transform_bypass = bits.read(1);
            if bits.read_bool() {
                let lists = if chroma_format_idc != 3 { 8 } else { 12 };
                for i in 0..lists {
                    if bits.read_bool() {
                        skip_scaling_list(&mut bits, if i < 6 { 16 } else { 64 });
                    }
                }
            }
        }

        let _log2_max_frame_num = bits.read_golomb();
        match bits.read_golomb() {
            0 => {
                let _log2_max_poc_lsb = bits.read_golomb();
            }
            1 => {
                let _delta_pic_order_always_zero = bits.read(1);
                let _offset_for_non_ref_pic = bits.read_signed_golomb();
                let _offset_for_top_to_bottom = bits.read_signed_golomb();
                let cycle = bits.read_golomb();
                for _ in 0..cycle {
                    if bits.has_error() {
                        break;
                    }
                    let _offset_for_ref_frame = bits.read_signed_golomb();
                }
            }
            _ => {}
        }

        let ref_frames = bits.read_golomb();
        let _gaps_in_frame_num_allowed = bits.read(1);
        let width_mbs = bits.read_golomb();
        let height_map_units = bits.read_golomb();
        let frame_mbs_only = bits.read(1);
        if frame_mbs_only == 0 {
            let _mb_adaptive_frame_field = bits.read(1);
        }
        let _direct_8x8_inference = bits.read(1);

        let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
        if bits.read_bool() {
            crop_left = bits.read_golomb();
            crop_right = bits.read_golomb();
            crop_top = bits.read_golomb();
            crop_bottom = bits.read_golomb();
        }

        let width = ((width_mbs as u64 + 1) * 16)
            .saturating_sub((crop_left as u64 + crop_right as u64) * 2);
        let height = ((2 - frame_mbs_only as u64) * (height_map_units as u64 + 1) * 16)
            .saturating_sub((crop_top as u64 + crop_bottom as u64) * 2);

        SpsInfo {
            profile_idc,
            level_idc,
            ref_frames,
            frame_mbs_only: frame_mbs_only == 1,
            width: width.min(u32::MAX as u64) as u32,
            height: height.min(u32::MAX as u64) as u32,
        }
    }
}

fn skip_scaling_list(bits: &mut BitReader<'_>, size: usize) {
    let mut last_scale: i64 = 8;
    let mut next_scale: i64 = 8;
    for _ in 0..size {
        if bits.has_error() {
            break;
        }
        if next_scale != 0 {
            let delta = bits.read_signed_golomb() as i64;
            next_scale = (last_scale + delta + 256).rem_euclid(256);
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
}

/// Drop the 0x03 in every 0x00 0x00 0x03 sequence
fn strip_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &b in data {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}
