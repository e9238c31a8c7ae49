//! Relay server with optional FLV recording
//!
//! Run with: cargo run --example relay_server -- [record_dir]
//!
//! Publish with:
//!   ffmpeg -re -i input.mp4 -c copy -f flv rtmp://localhost/live/test
//! Watch with:
//!   ffplay rtmp://localhost/live/test
//!
//! With `record_dir`, every published path is also written to
//! `<record_dir>/<app>_<name>.flv`. Set `RELAY_PUBLISH_KEY` to require
//! `?key=<value>` on publish names.
//!
//! ```text
//!   OBS/ffmpeg ──publish──> RtmpServer ──fan-out──> ffplay, VLC, ...
//!                               │
//!                          FlvRecorder (RelayListener)
//!                               │
//!                               ▼
//!                        live_test.flv
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use bytes::BytesMut;
use rtmp_relay::media::flv::write_file_header;
use rtmp_relay::media::{FlvTag, FlvTagType, FrameKind};
use rtmp_relay::registry::{RelayFrame, RelayListener, SharedRegistry};
use rtmp_relay::session::{AuthAction, AuthDecision, AuthRequest, Authorizer};
use rtmp_relay::{RtmpServer, ServerConfig};

/// One FLV file being written
struct Recording {
    writer: BufWriter<File>,
    output_path: PathBuf,
    first_timestamp: Option<u32>,
    tags: u64,
}

impl Recording {
    fn create(output_dir: &PathBuf, path: &str) -> std::io::Result<Self> {
        let safe_name: String = path
            .trim_start_matches('/')
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let output_path = output_dir.join(format!("{}.flv", safe_name));

        let mut writer = BufWriter::new(File::create(&output_path)?);
        let mut header = BytesMut::new();
        write_file_header(&mut header, true, true);
        writer.write_all(&header)?;

        Ok(Self {
            writer,
            output_path,
            first_timestamp: None,
            tags: 0,
        })
    }

    fn write(&mut self, frame: &RelayFrame<'_>) -> std::io::Result<()> {
        let first = *self.first_timestamp.get_or_insert(frame.timestamp);
        let tag_type = match frame.kind {
            FrameKind::Metadata => FlvTagType::Script,
            FrameKind::Audio => FlvTagType::Audio,
            FrameKind::Video => FlvTagType::Video,
        };
        let tag = FlvTag::new(
            tag_type,
            frame.timestamp.saturating_sub(first),
            frame.payload.clone(),
        );

        let mut buf = BytesMut::with_capacity(tag.encoded_len());
        tag.encode(&mut buf);
        self.writer.write_all(&buf)?;
        self.tags += 1;
        Ok(())
    }
}

/// Records every published path to its own FLV file
struct FlvRecorder {
    output_dir: PathBuf,
    recordings: HashMap<String, Recording>,
}

impl RelayListener for FlvRecorder {
    fn on_publish_ready(&mut self, path: &str) {
        match Recording::create(&self.output_dir, path) {
            Ok(recording) => {
                tracing::info!(path = %path, file = %recording.output_path.display(), "Recording");
                self.recordings.insert(path.to_string(), recording);
            }
            Err(e) => tracing::error!(path = %path, error = %e, "Failed to create recording"),
        }
    }

    fn on_frame(&mut self, frame: &RelayFrame<'_>) {
        let Some(recording) = self.recordings.get_mut(frame.path) else {
            return;
        };
        if let Err(e) = recording.write(frame) {
            tracing::error!(path = %frame.path, error = %e, "Recording write failed");
            self.recordings.remove(frame.path);
        }
    }

    fn on_close(&mut self, path: &str) {
        if let Some(mut recording) = self.recordings.remove(path) {
            match recording.writer.flush() {
                Ok(()) => tracing::info!(
                    path = %path,
                    file = %recording.output_path.display(),
                    tags = recording.tags,
                    "Recording complete"
                ),
                Err(e) => tracing::error!(path = %path, error = %e, "Failed to finish recording"),
            }
        }
    }
}

/// Requires `?key=<key>` on publish; playback is open
struct PublishKey(String);

impl Authorizer for PublishKey {
    fn authorize(&self, request: &AuthRequest<'_>) -> AuthDecision {
        match request.action {
            AuthAction::Play => AuthDecision::Allowed,
            AuthAction::Publish if request.args.get("key") == Some(&self.0) => {
                AuthDecision::Allowed
            }
            AuthAction::Publish => AuthDecision::Denied("bad publish key".into()),
        }
    }
}

async fn log_snapshots(registry: &SharedRegistry) {
    let mut ticker = tokio::time::interval(Duration::from_secs(10));
    loop {
        ticker.tick().await;
        let snapshots = registry.borrow().snapshots();
        for snapshot in snapshots {
            match serde_json::to_string(&snapshot) {
                Ok(json) => tracing::info!(stream = %json, "Stream"),
                Err(e) => tracing::warn!(error = %e, "Snapshot serialization failed"),
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_relay=info".parse()?)
                .add_directive("relay_server=info".parse()?),
        )
        .init();

    let config = ServerConfig::default();
    let mut server = RtmpServer::new(config);

    if let Ok(key) = std::env::var("RELAY_PUBLISH_KEY") {
        server = server.with_authorizer(PublishKey(key));
    }

    if let Some(output_dir) = std::env::args().nth(1).map(PathBuf::from) {
        std::fs::create_dir_all(&output_dir)?;
        server.registry().borrow_mut().set_listener(Box::new(FlvRecorder {
            output_dir,
            recordings: HashMap::new(),
        }));
    }

    tracing::info!(addr = %server.config().bind_addr, "Starting relay");

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Server error");
            }
        }
        _ = log_snapshots(server.registry()) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
