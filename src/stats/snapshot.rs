//! Per-path introspection snapshot

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::PublishStream;

/// What an operator sees for one live path
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSnapshot {
    /// Publishing session id
    pub id: u64,
    pub start_time: DateTime<Utc>,
    pub path: String,
    pub players: usize,
    pub video_width: u32,
    pub video_height: u32,
    pub video_fps: f64,
    pub video_codec_name: String,
    pub video_profile_name: String,
    pub video_level: f64,
    pub audio_sample_rate: u32,
    pub audio_channels: u8,
    pub audio_codec_name: String,
    pub audio_profile_name: String,
}

impl StreamSnapshot {
    pub fn new(stream: &PublishStream, players: usize) -> Self {
        let info = &stream.info;
        Self {
            id: stream.session_id,
            start_time: stream.start_time,
            path: stream.path.clone(),
            players,
            video_width: info.video_width,
            video_height: info.video_height,
            video_fps: info.video_fps,
            video_codec_name: info.video_codec_name.to_string(),
            video_profile_name: info.video_profile_name.to_string(),
            video_level: info.video_level,
            audio_sample_rate: info.audio_sample_rate,
            audio_channels: info.audio_channels,
            audio_codec_name: info.audio_codec_name.to_string(),
            audio_profile_name: info.audio_profile_name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::{AmfObject, AmfValue};
    use chrono::TimeZone;

    #[test]
    fn test_serializes_camel_case() {
        let mut stream = PublishStream::new(42, "/live/cam", 1);
        stream.start_time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        stream.info.apply_metadata(&AmfValue::Object(
            AmfObject::new()
                .with("width", 640.0)
                .with("height", 360.0)
                .with("framerate", 25.0),
        ));

        let json = serde_json::to_value(StreamSnapshot::new(&stream, 3)).unwrap();
        assert_eq!(json["id"], 42);
        assert_eq!(json["path"], "/live/cam");
        assert_eq!(json["players"], 3);
        assert_eq!(json["videoWidth"], 640);
        assert_eq!(json["videoHeight"], 360);
        assert_eq!(json["videoFps"], 25.0);
        assert_eq!(json["audioCodecName"], "");
        assert_eq!(json["startTime"], "2024-05-01T12:00:00Z");
    }
}
