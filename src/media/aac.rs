//! AAC audio packets
//!
//! RTMP carries AAC without ADTS framing. After the one-byte FLV audio
//! header comes:
//!
//! ```text
//! +----------------+------------------------------------------+
//! | AACPacketType  | 0: AudioSpecificConfig  1: raw AAC frame |
//! | (1 byte)       |                                          |
//! +----------------+------------------------------------------+
//! ```

use bytes::{Buf, Bytes};

use super::bits::BitReader;
use crate::error::{MediaError, Result};

/// Sampling rates selected by `samplingFrequencyIndex`.
///
/// The index is looked up one slot down, so `0x12 0x10` (index 4) reports
/// 48000 Hz.
const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Channel count by `channelConfiguration`
const AAC_CHANNELS: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 8];

/// AAC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacPacketType {
    SequenceHeader = 0,
    Raw = 1,
}

impl AacPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AacPacketType::SequenceHeader),
            1 => Some(AacPacketType::Raw),
            _ => None,
        }
    }
}

/// Parsed AudioSpecificConfig
///
/// Parsing never fails; truncated configs yield zeroed fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    /// Audio object type after SBR/PS unwrapping
    pub object_type: u8,
    pub sample_rate_index: u8,
    pub sample_rate: u32,
    pub channel_config: u8,
    pub channels: u8,
    /// Spectral band replication signalled (object type 5 or 29)
    pub sbr: bool,
    /// Parametric stereo signalled (object type 29)
    pub ps: bool,
    pub raw: Bytes,
}

impl AudioSpecificConfig {
    pub fn parse(data: Bytes) -> Self {
        let mut bits = BitReader::new(&data);

        let mut object_type = read_object_type(&mut bits);
        let (mut sample_rate_index, mut sample_rate) = read_sample_rate(&mut bits);
        let channel_config = bits.read(4) as u8;
        let channels = AAC_CHANNELS
            .get(channel_config as usize)
            .copied()
            .unwrap_or(0);

        let mut sbr = false;
        let mut ps = false;
        if object_type == 5 || object_type == 29 {
            sbr = true;
            ps = object_type == 29;
            (sample_rate_index, sample_rate) = read_sample_rate(&mut bits);
            object_type = read_object_type(&mut bits);
        }

        AudioSpecificConfig {
            object_type,
            sample_rate_index,
            sample_rate,
            channel_config,
            channels,
            sbr,
            ps,
            raw: data,
        }
    }

    /// Short profile name: Main, LC, HE, HEv2, SSR, LTP, SBR
    pub fn profile_name(&self) -> &'static str {
        match self.object_type {
            1 => "Main",
            2 if self.ps => "HEv2",
            2 if self.sbr => "HE",
            2 => "LC",
            3 => "SSR",
            4 => "LTP",
            5 => "SBR",
            _ => "",
        }
    }
}

/// 5-bit object type, escaped to 6 more bits + 32 when it reads 31
fn read_object_type(bits: &mut BitReader<'_>) -> u8 {
    match bits.read(5) {
        31 => (bits.read(6) + 32) as u8,
        object_type => object_type as u8,
    }
}

/// 4-bit index, or an explicit 24-bit rate when the index is 0xF
fn read_sample_rate(bits: &mut BitReader<'_>) -> (u8, u32) {
    let index = bits.read(4) as u8;
    let rate = if bits.has_error() {
        0
    } else if index == 0x0F {
        bits.read(24)
    } else {
        AAC_SAMPLE_RATES
            .get((index as usize).saturating_sub(1))
            .copied()
            .unwrap_or(0)
    };
    (index, rate)
}

/// AAC packet following the FLV audio header byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AacData {
    SequenceHeader(AudioSpecificConfig),
    /// Raw AAC access unit
    Raw(Bytes),
}

impl AacData {
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.is_empty() {
            return Err(MediaError::InvalidAacPacket.into());
        }

        match AacPacketType::from_byte(data.get_u8()) {
            Some(AacPacketType::SequenceHeader) => {
                Ok(AacData::SequenceHeader(AudioSpecificConfig::parse(data)))
            }
            Some(AacPacketType::Raw) => Ok(AacData::Raw(data)),
            None => Err(MediaError::InvalidAacPacket.into()),
        }
    }

    pub fn is_sequence_header(&self) -> bool {
        matches!(self, AacData::SequenceHeader(_))
    }

    pub fn config(&self) -> Option<&AudioSpecificConfig> {
        match self {
            AacData::SequenceHeader(config) => Some(config),
            AacData::Raw(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lc_stereo_config() {
        let config = AudioSpecificConfig::parse(Bytes::from_static(&[0x12, 0x10]));
        assert_eq!(config.object_type, 2);
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.channels, 2);
        assert_eq!(config.profile_name(), "LC");
        assert!(!config.sbr);
    }

    #[test]
    fn test_he_aac_unwraps_object_type() {
        // object type 5, index 6, channels 2, ext index 3, object type 2
        // 00101 0110 0010 0011 00010 -> 0x2B 0x11 0x88 (padded)
        let config = AudioSpecificConfig::parse(Bytes::from_static(&[0x2B, 0x11, 0x88]));
        assert!(config.sbr);
        assert!(!config.ps);
        assert_eq!(config.object_type, 2);
        assert_eq!(config.sample_rate_index, 3);
        assert_eq!(config.channels, 2);
        assert_eq!(config.profile_name(), "HE");
    }

    #[test]
    fn test_ps_reports_hev2() {
        // object type 29 = 11101, index 3, channels 1, ext index 6, object type 2
        // 11101 0011 0001 0110 00010
        let config = AudioSpecificConfig::parse(Bytes::from_static(&[0xE9, 0x8B, 0x08]));
        assert!(config.sbr);
        assert!(config.ps);
        assert_eq!(config.channels, 1);
        assert_eq!(config.profile_name(), "HEv2");
    }

    #[test]
    fn test_explicit_sample_rate() {
        // object type 2, index 0xF, 24-bit rate 44100 (0x00AC44), channels 2
        // 00010 1111 000000001010110001000100 0010
        let config =
            AudioSpecificConfig::parse(Bytes::from_static(&[0x17, 0x80, 0x56, 0x22, 0x10]));
        assert_eq!(config.sample_rate_index, 0x0F);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.channels, 2);
    }

    #[test]
    fn test_escaped_object_type() {
        // 11111 000010 -> 32 + 2 = 34
        let config = AudioSpecificConfig::parse(Bytes::from_static(&[0xF8, 0x40, 0x00]));
        assert_eq!(config.object_type, 34);
        assert_eq!(config.profile_name(), "");
    }

    #[test]
    fn test_truncated_config_degrades() {
        let config = AudioSpecificConfig::parse(Bytes::from_static(&[0x12]));
        assert_eq!(config.object_type, 2);
        assert_eq!(config.channels, 0);
        assert_eq!(config.sample_rate, 0);
    }

    #[test]
    fn test_aac_data_parse() {
        let header = AacData::parse(Bytes::from_static(&[0x00, 0x12, 0x10])).unwrap();
        assert!(header.is_sequence_header());
        assert_eq!(header.config().map(|c| c.channels), Some(2));

        let raw = AacData::parse(Bytes::from_static(&[0x01, 0x21, 0x00])).unwrap();
        assert_eq!(raw, AacData::Raw(Bytes::from_static(&[0x21, 0x00])));

        assert!(AacData::parse(Bytes::new()).is_err());
        assert!(AacData::parse(Bytes::from_static(&[0x02])).is_err());
    }
}
