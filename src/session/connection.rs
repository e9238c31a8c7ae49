//! Per-connection RTMP session
//!
//! A [`Session`] is sans-IO: the owner feeds it inbound bytes through
//! [`Session::on_data`] and it answers through its [`Transport`]. Bytes go
//! through the handshake first, then the chunk decoder; every reassembled
//! message is dispatched by type:
//!
//! ```text
//! on_data ──► Handshake ──► ChunkDecoder ──► RtmpMessage
//!                                               │
//!             ┌──────────────┬──────────────┬───┴──────────┐
//!             ▼              ▼              ▼              ▼
//!         control        commands         data       audio/video
//!      (chunk size,   (connect, publish, (@setDataFrame)  │
//!       ack, ping)     play, ...)                        ▼
//!                                               StreamRegistry
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use tokio::sync::oneshot;

use super::auth::{AuthAction, AuthDecision, AuthRequest, Authorizer};
use super::sink::{Outbox, ViewerSink};
use super::state::{SessionConfig, SessionState, StreamRole};
use super::transport::Transport;
use crate::amf::{AmfObject, AmfValue};
use crate::error::{Error, Result};
use crate::media::Frame;
use crate::protocol::constants::*;
use crate::protocol::{
    ChunkDecoder, Command, ConnectParams, DataMessage, Handshake, PlayParams, PublishParams,
    RtmpChunk, RtmpMessage, UserControlEvent,
};
use crate::registry::{PlayStream, PublishStream, SharedRegistry};
use crate::stats::SessionStats;

/// A publish or play command waiting for its authorization decision
struct PendingAuth {
    command: Command,
    receiver: Option<oneshot::Receiver<bool>>,
}

/// Outcome of the authorization gate
enum Gate {
    Allowed,
    Denied,
    Pending,
}

/// One RTMP connection
pub struct Session {
    state: SessionState,
    config: SessionConfig,
    handshake: Handshake,
    decoder: ChunkDecoder,
    /// Bytes received but not yet consumed
    inbound: BytesMut,
    out: Outbox,
    registry: SharedRegistry,
    authorizer: Rc<dyn Authorizer>,
    pending: Option<PendingAuth>,
}

impl Session {
    pub fn new(
        id: u64,
        config: SessionConfig,
        transport: Rc<dyn Transport>,
        registry: SharedRegistry,
        authorizer: Rc<dyn Authorizer>,
    ) -> Self {
        Self {
            state: SessionState::new(id, None),
            config,
            handshake: Handshake::new(),
            decoder: ChunkDecoder::new(),
            inbound: BytesMut::new(),
            out: Outbox::new(transport),
            registry,
            authorizer,
            pending: None,
        }
    }

    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.state.peer_addr = Some(addr);
        self
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            bytes_sent: self.out.bytes_sent(),
            ..self.state.stats
        }
    }

    /// Feed bytes read from the peer
    pub fn on_data(&mut self, data: &[u8]) -> Result<()> {
        if self.state.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        if let Some(sequence) = self.state.add_bytes_received(data.len()) {
            self.out
                .send_control(RtmpMessage::Acknowledgement { sequence });
        }

        self.inbound.extend_from_slice(data);
        self.process()
    }

    /// The receiver of a publish/play decision still outstanding
    ///
    /// Returns it once; inbound bytes are buffered until
    /// [`Session::resolve_auth`] is called.
    pub fn take_pending_auth(&mut self) -> Option<oneshot::Receiver<bool>> {
        self.pending.as_mut().and_then(|p| p.receiver.take())
    }

    pub fn is_auth_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Finish the publish/play command that was waiting on authorization
    pub fn resolve_auth(&mut self, allowed: bool) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };

        tracing::debug!(
            session_id = self.state.id,
            command = %pending.command.name,
            allowed = allowed,
            "Authorization resolved"
        );

        match pending.command.name.as_str() {
            CMD_PUBLISH => self.on_publish(pending.command, Some(allowed))?,
            CMD_PLAY => self.on_play(pending.command, Some(allowed))?,
            _ => {}
        }

        self.process()
    }

    /// The connection is gone; release everything this session registered
    pub fn on_close(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.state.close();
        self.pending = None;

        if let Some(role) = self.state.playing.take() {
            self.registry
                .borrow_mut()
                .remove_player(&role.path, self.state.id);
        }
        if let Some(role) = self.state.publishing.take() {
            self.unpublish(&role);
        }

        tracing::info!(
            session_id = self.state.id,
            bytes_received = self.state.stats.bytes_received,
            bytes_sent = self.out.bytes_sent(),
            "Session closed"
        );
    }

    fn process(&mut self) -> Result<()> {
        if !self.handshake.is_done() {
            if let Some(response) = self.handshake.process(&mut self.inbound) {
                self.out.send_raw(response);
            }
            if !self.handshake.is_done() {
                return Ok(());
            }
            self.state.complete_handshake();
            tracing::debug!(session_id = self.state.id, "Handshake complete");
        }

        while self.pending.is_none() && !self.state.is_closed() {
            let Some(chunk) = self.decoder.decode(&mut self.inbound) else {
                break;
            };
            self.handle_chunk(chunk)?;
        }
        Ok(())
    }

    fn handle_chunk(&mut self, chunk: RtmpChunk) -> Result<()> {
        let message = match RtmpMessage::from_chunk(&chunk) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    session_id = self.state.id,
                    message_type = chunk.message_type,
                    error = %e,
                    "Skipping undecodable message"
                );
                return Ok(());
            }
        };

        match message {
            RtmpMessage::SetChunkSize(size) => {
                self.decoder.set_chunk_size(size)?;
                tracing::debug!(session_id = self.state.id, size = size, "Peer chunk size");
            }
            RtmpMessage::WindowAckSize(size) => {
                self.state.peer_window_ack_size = size;
                tracing::debug!(session_id = self.state.id, size = size, "Peer ack window");
            }
            RtmpMessage::Abort { csid } => {
                tracing::debug!(session_id = self.state.id, csid = csid, "Abort ignored");
            }
            RtmpMessage::Acknowledgement { sequence } => {
                tracing::trace!(session_id = self.state.id, sequence = sequence, "Ack");
            }
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                tracing::debug!(
                    session_id = self.state.id,
                    size = size,
                    limit_type = limit_type,
                    "Peer bandwidth ignored"
                );
            }
            RtmpMessage::UserControl(event) => self.handle_user_control(event),
            RtmpMessage::Audio { timestamp, data } => self.handle_audio(timestamp, data)?,
            RtmpMessage::Video { timestamp, data } => self.handle_video(timestamp, data)?,
            RtmpMessage::Command(cmd) => self.handle_command(cmd)?,
            RtmpMessage::Data(data) => self.handle_data(data)?,
            RtmpMessage::Unknown { type_id, .. } => {
                tracing::warn!(
                    session_id = self.state.id,
                    type_id = type_id,
                    "Unknown message type"
                );
            }
        }
        Ok(())
    }

    fn handle_user_control(&mut self, event: UserControlEvent) {
        match event {
            UserControlEvent::PingRequest(timestamp) => {
                self.out
                    .send_control(RtmpMessage::UserControl(UserControlEvent::PingResponse(
                        timestamp,
                    )));
            }
            other => {
                tracing::debug!(session_id = self.state.id, event = ?other, "User control");
            }
        }
    }

    fn handle_audio(&mut self, timestamp: u32, data: Bytes) -> Result<()> {
        let Some(role) = &self.state.publishing else {
            tracing::debug!(session_id = self.state.id, "Audio from non-publisher dropped");
            return Ok(());
        };

        self.state.stats.on_audio();
        self.registry
            .borrow_mut()
            .publish_frame(&role.path, Frame::audio(timestamp, data))?;
        Ok(())
    }

    fn handle_video(&mut self, timestamp: u32, data: Bytes) -> Result<()> {
        let Some(role) = &self.state.publishing else {
            tracing::debug!(session_id = self.state.id, "Video from non-publisher dropped");
            return Ok(());
        };

        let frame = Frame::video(timestamp, data);
        let keyframe = match &frame {
            Frame::Video(video) => video.header().is_some_and(|h| h.is_keyframe()),
            _ => false,
        };
        self.state.stats.on_video(keyframe);
        self.registry.borrow_mut().publish_frame(&role.path, frame)?;
        Ok(())
    }

    fn handle_data(&mut self, data: DataMessage) -> Result<()> {
        if data.name != CMD_SET_DATA_FRAME {
            tracing::debug!(session_id = self.state.id, name = %data.name, "Data message ignored");
            return Ok(());
        }
        let Some(role) = &self.state.publishing else {
            return Ok(());
        };
        let Some(object) = data.metadata_object() else {
            tracing::warn!(session_id = self.state.id, "@setDataFrame without data object");
            return Ok(());
        };

        let payload = DataMessage::on_metadata(object.clone()).encode();
        let mut registry = self.registry.borrow_mut();
        registry.apply_metadata(&role.path, object)?;
        registry.publish_frame(&role.path, Frame::metadata(0, payload))?;

        tracing::debug!(session_id = self.state.id, path = %role.path, "Metadata updated");
        Ok(())
    }

    fn handle_command(&mut self, cmd: Command) -> Result<()> {
        tracing::debug!(
            session_id = self.state.id,
            command = %cmd.name,
            transaction_id = cmd.transaction_id,
            stream_id = cmd.stream_id,
            "Command"
        );

        match cmd.name.as_str() {
            CMD_CONNECT => self.on_connect(cmd)?,
            CMD_CREATE_STREAM => self.on_create_stream(cmd),
            CMD_PUBLISH => self.on_publish(cmd, None)?,
            CMD_PLAY => self.on_play(cmd, None)?,
            CMD_DELETE_STREAM => self.on_delete_stream(cmd),
            CMD_RECEIVE_AUDIO => self.on_receive_toggle(cmd, true),
            CMD_RECEIVE_VIDEO => self.on_receive_toggle(cmd, false),
            CMD_PAUSE | CMD_CLOSE_STREAM | CMD_FC_PUBLISH | CMD_FC_UNPUBLISH
            | CMD_RELEASE_STREAM => {}
            other => {
                tracing::debug!(session_id = self.state.id, command = %other, "Unknown command");
            }
        }
        Ok(())
    }

    fn on_connect(&mut self, cmd: Command) -> Result<()> {
        let params = ConnectParams::from_amf(&cmd.command_object);
        tracing::info!(
            session_id = self.state.id,
            app = %params.app,
            tc_url = ?params.tc_url,
            "Connect"
        );
        let object_encoding = params.object_encoding;
        self.state.on_connect(params);

        self.out
            .send_control(RtmpMessage::WindowAckSize(self.config.window_ack_size));
        self.out.send_control(RtmpMessage::SetPeerBandwidth {
            size: self.config.peer_bandwidth,
            limit_type: BANDWIDTH_LIMIT_DYNAMIC,
        });
        self.out
            .send_control(RtmpMessage::SetChunkSize(self.config.chunk_size));
        self.out.encoder_mut().set_chunk_size(self.config.chunk_size)?;

        let properties = AmfObject::new()
            .with("fmsVer", FMS_VERSION)
            .with("capabilities", FMS_CAPABILITIES);
        let information = AmfObject::new()
            .with("level", "status")
            .with("code", NC_CONNECT_SUCCESS)
            .with("description", "Connection succeeded.")
            .with("objectEncoding", object_encoding);
        self.out.send_command(Command::result(
            cmd.transaction_id,
            AmfValue::Object(properties),
            AmfValue::Object(information),
        ));
        Ok(())
    }

    fn on_create_stream(&mut self, cmd: Command) {
        let stream_id = self.state.allocate_stream_id();
        self.out.send_command(Command::result(
            cmd.transaction_id,
            AmfValue::Null,
            AmfValue::Number(stream_id as f64),
        ));
    }

    /// Consult the authorizer unless a decision was already made
    fn authorize(
        &mut self,
        action: AuthAction,
        cmd: &Command,
        path: &str,
        args: &HashMap<String, String>,
        resolved: Option<bool>,
    ) -> Gate {
        if let Some(allowed) = resolved {
            return if allowed { Gate::Allowed } else { Gate::Denied };
        }

        let request = AuthRequest {
            action,
            session_id: self.state.id,
            app: self.state.app(),
            path,
            args,
        };
        match self.authorizer.authorize(&request) {
            AuthDecision::Allowed => Gate::Allowed,
            AuthDecision::Denied(reason) => {
                tracing::warn!(
                    session_id = self.state.id,
                    path = %path,
                    action = ?action,
                    reason = %reason,
                    "Authorization denied"
                );
                Gate::Denied
            }
            AuthDecision::Pending(receiver) => {
                self.pending = Some(PendingAuth {
                    command: cmd.clone(),
                    receiver: Some(receiver),
                });
                Gate::Pending
            }
        }
    }

    fn on_publish(&mut self, cmd: Command, resolved: Option<bool>) -> Result<()> {
        let params = PublishParams::from_command(&cmd);
        let path = self.state.stream_path(&params.name);
        let stream_id = cmd.stream_id;

        match self.authorize(AuthAction::Publish, &cmd, &path, &params.args, resolved) {
            Gate::Pending => return Ok(()),
            Gate::Denied => {
                self.out.send_status(
                    stream_id,
                    "error",
                    NS_PUBLISH_UNAUTHORIZED,
                    "Authorization required.",
                );
                return Ok(());
            }
            Gate::Allowed => {}
        }

        if self.registry.borrow().is_live(&path) {
            tracing::warn!(session_id = self.state.id, path = %path, "Path already published");
            self.out.send_status(
                stream_id,
                "error",
                NS_PUBLISH_BAD_NAME,
                "Stream already publishing",
            );
            return Ok(());
        }
        if self.state.publishing.is_some() {
            tracing::warn!(session_id = self.state.id, path = %path, "Connection already publishing");
            self.out.send_status(
                stream_id,
                "error",
                NS_PUBLISH_BAD_CONNECTION,
                "Connection already publishing",
            );
            return Ok(());
        }

        let stream = PublishStream::new(self.state.id, path.as_str(), stream_id)
            .with_args(params.args);
        self.registry.borrow_mut().add_publish(stream)?;
        self.state.publishing = Some(StreamRole {
            path: path.clone(),
            stream_id,
        });

        tracing::info!(
            session_id = self.state.id,
            path = %path,
            publish_type = %params.publish_type,
            "Publish start"
        );
        self.out.send_status(
            stream_id,
            "status",
            NS_PUBLISH_START,
            &format!("{} is now published.", path),
        );

        self.registry.borrow_mut().publish_ready(&path)?;
        Ok(())
    }

    fn on_play(&mut self, cmd: Command, resolved: Option<bool>) -> Result<()> {
        let params = PlayParams::from_command(&cmd);
        let path = self.state.stream_path(&params.name);
        let stream_id = cmd.stream_id;

        match self.authorize(AuthAction::Play, &cmd, &path, &params.args, resolved) {
            Gate::Pending => return Ok(()),
            Gate::Denied => {
                self.out.send_status(
                    stream_id,
                    "error",
                    NS_PLAY_UNAUTHORIZED,
                    "Authorization required.",
                );
                return Ok(());
            }
            Gate::Allowed => {}
        }

        if self.state.playing.is_some() {
            tracing::warn!(session_id = self.state.id, path = %path, "Connection already playing");
            self.out.send_status(
                stream_id,
                "error",
                NS_PLAY_BAD_CONNECTION,
                "Connection already playing",
            );
            return Ok(());
        }

        self.out
            .send_control(RtmpMessage::UserControl(UserControlEvent::StreamBegin(
                stream_id,
            )));
        self.out.send_status(
            stream_id,
            "status",
            NS_PLAY_RESET,
            "Playing and resetting stream.",
        );
        self.out.send_status(
            stream_id,
            "status",
            NS_PLAY_START,
            "Started playing stream.",
        );
        let sample_access = DataMessage {
            name: CMD_SAMPLE_ACCESS.to_string(),
            values: vec![AmfValue::Boolean(false), AmfValue::Boolean(false)],
            stream_id,
        };
        self.out
            .send_message(CSID_DATA, stream_id, 0, &RtmpMessage::Data(sample_access));

        self.state.playing = Some(StreamRole {
            path: path.clone(),
            stream_id,
        });

        let sink = ViewerSink::new(self.out.fork(), stream_id);
        let player = PlayStream::new(self.state.id, path.as_str(), stream_id, Box::new(sink))
            .with_args(params.args);
        let live = self.registry.borrow_mut().add_player(player);

        tracing::info!(
            session_id = self.state.id,
            path = %path,
            live = live,
            "Play start"
        );
        Ok(())
    }

    fn on_delete_stream(&mut self, cmd: Command) {
        let Some(stream_id) = cmd.number_arg(0).map(|id| id as u32) else {
            return;
        };

        if self
            .state
            .playing
            .as_ref()
            .is_some_and(|role| role.stream_id == stream_id)
        {
            if let Some(role) = self.state.playing.take() {
                self.registry
                    .borrow_mut()
                    .remove_player(&role.path, self.state.id);
                self.out.send_status(
                    stream_id,
                    "status",
                    NS_PLAY_STOP,
                    "Stopped playing stream.",
                );
                tracing::info!(session_id = self.state.id, path = %role.path, "Play stop");
            }
        }

        if self
            .state
            .publishing
            .as_ref()
            .is_some_and(|role| role.stream_id == stream_id)
        {
            if let Some(role) = self.state.publishing.take() {
                self.out.send_status(
                    stream_id,
                    "status",
                    NS_UNPUBLISH_SUCCESS,
                    &format!("{} is now unpublished.", role.path),
                );
                self.unpublish(&role);
            }
        }
    }

    fn on_receive_toggle(&mut self, cmd: Command, audio: bool) {
        let (Some(role), Some(enabled)) = (&self.state.playing, cmd.bool_arg(0)) else {
            return;
        };
        let mut registry = self.registry.borrow_mut();
        if audio {
            registry.set_receive_audio(&role.path, self.state.id, enabled);
        } else {
            registry.set_receive_video(&role.path, self.state.id, enabled);
        }
    }

    fn unpublish(&self, role: &StreamRole) {
        match self
            .registry
            .borrow_mut()
            .remove_publish(&role.path, self.state.id)
        {
            Ok(_) => {
                tracing::info!(session_id = self.state.id, path = %role.path, "Publish stop")
            }
            Err(e) => {
                tracing::warn!(session_id = self.state.id, path = %role.path, error = %e, "Unpublish failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChunkEncoder;
    use crate::registry::StreamRegistry;
    use crate::session::auth::AllowAll;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct MockTransport {
        writes: RefCell<Vec<Bytes>>,
        closed: Cell<bool>,
    }

    impl Transport for MockTransport {
        fn write(&self, data: Bytes) {
            self.writes.borrow_mut().push(data);
        }

        fn close(&self) {
            self.closed.set(true);
        }
    }

    /// Test client driving one session
    struct Peer {
        session: Session,
        transport: Rc<MockTransport>,
        encoder: ChunkEncoder,
        decoder: ChunkDecoder,
        received: BytesMut,
        seen: usize,
        fed: u64,
    }

    impl Peer {
        fn new(id: u64, registry: &SharedRegistry) -> Self {
            Self::with_authorizer(id, registry, Rc::new(AllowAll))
        }

        fn with_authorizer(
            id: u64,
            registry: &SharedRegistry,
            authorizer: Rc<dyn Authorizer>,
        ) -> Self {
            let transport = Rc::new(MockTransport::default());
            let session = Session::new(
                id,
                SessionConfig::default(),
                transport.clone(),
                Rc::clone(registry),
                authorizer,
            );
            let mut peer = Self {
                session,
                transport,
                encoder: ChunkEncoder::new(),
                decoder: ChunkDecoder::new(),
                received: BytesMut::new(),
                seen: 0,
                fed: 0,
            };

            let mut hello = vec![RTMP_VERSION];
            hello.extend_from_slice(&[0u8; HANDSHAKE_SIZE * 2]);
            peer.feed(&hello);

            let writes = peer.transport.writes.borrow();
            assert_eq!(writes[0].len(), 1 + HANDSHAKE_SIZE * 2);
            drop(writes);
            peer.seen = 1;
            peer
        }

        fn feed(&mut self, data: &[u8]) {
            self.fed += data.len() as u64;
            self.session.on_data(data).unwrap();
        }

        fn send(&mut self, csid: u32, stream_id: u32, timestamp: u32, message: RtmpMessage) {
            let (message_type, payload) = message.encode();
            let mut buf = BytesMut::new();
            self.encoder.encode(
                &RtmpChunk {
                    csid,
                    timestamp,
                    message_type,
                    stream_id,
                    payload,
                },
                &mut buf,
            );
            self.feed(&buf);
        }

        fn command(&mut self, cmd: Command) {
            let stream_id = cmd.stream_id;
            self.send(CSID_COMMAND, stream_id, 0, RtmpMessage::Command(cmd));
        }

        fn call(&mut self, name: &str, transaction_id: f64, stream_id: u32, args: Vec<AmfValue>) {
            self.command(Command {
                name: name.to_string(),
                transaction_id,
                command_object: AmfValue::Null,
                arguments: args,
                stream_id,
            });
        }

        fn connect(&mut self) {
            self.command(
                ConnectParams {
                    app: "live".into(),
                    ..Default::default()
                }
                .to_command(1.0),
            );
            self.call(CMD_CREATE_STREAM, 2.0, 0, vec![]);
        }

        fn publish(&mut self, name: &str) {
            self.call(CMD_PUBLISH, 0.0, 1, vec![name.into(), "live".into()]);
        }

        fn play(&mut self, name: &str) {
            self.call(CMD_PLAY, 0.0, 1, vec![name.into()]);
        }

        /// Messages written since the last call
        fn drain(&mut self) -> Vec<(RtmpChunk, RtmpMessage)> {
            let writes = self.transport.writes.borrow();
            for write in &writes[self.seen..] {
                self.received.extend_from_slice(write);
            }
            self.seen = writes.len();
            drop(writes);

            let mut messages = Vec::new();
            while let Some(chunk) = self.decoder.decode(&mut self.received) {
                let message = RtmpMessage::from_chunk(&chunk).unwrap();
                if let RtmpMessage::SetChunkSize(size) = message {
                    self.decoder.set_chunk_size(size).unwrap();
                }
                messages.push((chunk, message));
            }
            messages
        }

        /// Status codes of the onStatus commands since the last drain
        fn status_codes(&mut self) -> Vec<String> {
            self.drain()
                .into_iter()
                .filter_map(|(_, message)| match message {
                    RtmpMessage::Command(cmd) if cmd.name == CMD_ON_STATUS => cmd.arguments[0]
                        .get_string("code")
                        .map(str::to_string),
                    _ => None,
                })
                .collect()
        }
    }

    fn registry() -> SharedRegistry {
        StreamRegistry::new().into_shared()
    }

    const AVC_HEADER: &[u8] = &[
        0x17, 0x00, 0x00, 0x00, 0x00, 0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x0A, 0x67,
        0x64, 0x00, 0x1F, 0xAC, 0xD9, 0x40, 0x50, 0x05, 0xBB, 0x01, 0x00, 0x04, 0x68, 0xEE,
        0x3C, 0x80,
    ];

    fn set_data_frame() -> RtmpMessage {
        RtmpMessage::Data(DataMessage {
            name: CMD_SET_DATA_FRAME.to_string(),
            values: vec![
                CMD_ON_METADATA.into(),
                AmfValue::EcmaArray(
                    AmfObject::new()
                        .with("width", 1280.0)
                        .with("height", 720.0)
                        .with("framerate", 30.0),
                ),
            ],
            stream_id: 1,
        })
    }

    #[test]
    fn test_connect_reply_sequence() {
        let registry = registry();
        let mut peer = Peer::new(1, &registry);
        peer.command(
            ConnectParams {
                app: "live".into(),
                object_encoding: 0.0,
                ..Default::default()
            }
            .to_command(1.0),
        );

        let messages: Vec<RtmpMessage> = peer.drain().into_iter().map(|(_, m)| m).collect();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], RtmpMessage::WindowAckSize(5_000_000));
        assert_eq!(
            messages[1],
            RtmpMessage::SetPeerBandwidth {
                size: 5_000_000,
                limit_type: 2
            }
        );
        assert_eq!(messages[2], RtmpMessage::SetChunkSize(60_000));

        let RtmpMessage::Command(result) = &messages[3] else {
            panic!("expected _result, got {:?}", messages[3]);
        };
        assert_eq!(result.name, CMD_RESULT);
        assert_eq!(result.transaction_id, 1.0);
        assert_eq!(result.command_object.get_string("fmsVer"), Some(FMS_VERSION));
        assert_eq!(result.command_object.get_number("capabilities"), Some(31.0));
        assert_eq!(
            result.arguments[0].get_string("code"),
            Some(NC_CONNECT_SUCCESS)
        );
        assert_eq!(peer.session.state().app(), "live");
    }

    #[test]
    fn test_create_stream_counts_up() {
        let registry = registry();
        let mut peer = Peer::new(1, &registry);
        peer.connect();
        peer.call(CMD_CREATE_STREAM, 3.0, 0, vec![]);

        let ids: Vec<(f64, f64)> = peer
            .drain()
            .into_iter()
            .filter_map(|(_, m)| match m {
                RtmpMessage::Command(cmd) if cmd.command_object == AmfValue::Null => {
                    Some((cmd.transaction_id, cmd.number_arg(0)?))
                }
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![(2.0, 1.0), (3.0, 2.0)]);
    }

    #[test]
    fn test_publish_then_late_viewer_gets_cached_state() {
        let registry = registry();
        let mut publisher = Peer::new(1, &registry);
        publisher.connect();
        publisher.publish("cam?token=abc");

        let status = publisher.drain().into_iter().find_map(|(_, m)| match m {
            RtmpMessage::Command(cmd) if cmd.name == CMD_ON_STATUS => Some(cmd),
            _ => None,
        });
        let status = status.unwrap();
        assert_eq!(status.stream_id, 1);
        assert_eq!(status.arguments[0].get_string("code"), Some(NS_PUBLISH_START));
        assert_eq!(
            status.arguments[0].get_string("description"),
            Some("/live/cam is now published.")
        );
        assert_eq!(
            registry.borrow().publisher("/live/cam").unwrap().args.get("token"),
            Some(&"abc".to_string())
        );

        publisher.send(CSID_DATA, 1, 0, set_data_frame());
        publisher.send(
            CSID_VIDEO,
            1,
            0,
            RtmpMessage::Video {
                timestamp: 0,
                data: Bytes::from_static(AVC_HEADER),
            },
        );
        publisher.send(
            CSID_VIDEO,
            1,
            40,
            RtmpMessage::Video {
                timestamp: 40,
                data: Bytes::from_static(&[0x17, 0x01, 0, 0, 0, 0x65, 0x88]),
            },
        );
        assert_eq!(publisher.session.stats().video_frames, 2);
        assert_eq!(publisher.session.stats().keyframes, 2);

        let info = registry.borrow().publisher("/live/cam").unwrap().info.clone();
        assert_eq!((info.video_width, info.video_height), (1280, 720));
        assert_eq!(info.video_fps, 30.0);

        let mut viewer = Peer::new(2, &registry);
        viewer.connect();
        viewer.drain();
        viewer.play("cam");

        let messages = viewer.drain();
        let summary: Vec<String> = messages
            .iter()
            .map(|(chunk, message)| match message {
                RtmpMessage::UserControl(UserControlEvent::StreamBegin(id)) => {
                    format!("begin {id}")
                }
                RtmpMessage::Command(cmd) => {
                    cmd.arguments[0].get_string("code").unwrap_or_default().to_string()
                }
                RtmpMessage::Data(data) => data.name.clone(),
                RtmpMessage::Video { timestamp, .. } => {
                    format!("video {} on {}", timestamp, chunk.stream_id)
                }
                other => format!("{other:?}"),
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                "begin 1",
                NS_PLAY_RESET,
                NS_PLAY_START,
                CMD_SAMPLE_ACCESS,
                CMD_ON_METADATA,
                "video 0 on 1",
                "video 40 on 1",
            ]
        );

        // live frames follow the catch-up
        publisher.send(
            CSID_VIDEO,
            1,
            80,
            RtmpMessage::Video {
                timestamp: 80,
                data: Bytes::from_static(&[0x27, 0x01, 0, 0, 0, 0x41]),
            },
        );
        let live = viewer.drain();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].0.timestamp, 80);
        assert_eq!(live[0].0.csid, CSID_VIDEO);
    }

    #[test]
    fn test_viewer_waiting_for_publisher() {
        let registry = registry();
        let mut viewer = Peer::new(2, &registry);
        viewer.connect();
        viewer.play("cam");
        viewer.drain();
        assert_eq!(registry.borrow().player_count("/live/cam"), 1);

        let mut publisher = Peer::new(1, &registry);
        publisher.connect();
        publisher.publish("cam");
        publisher.send(
            CSID_AUDIO,
            1,
            10,
            RtmpMessage::Audio {
                timestamp: 10,
                data: Bytes::from_static(&[0xAF, 0x01, 0x21]),
            },
        );

        let received = viewer.drain();
        assert_eq!(received.len(), 1);
        assert!(matches!(received[0].1, RtmpMessage::Audio { timestamp: 10, .. }));
    }

    #[test]
    fn test_duplicate_publish_rejected() {
        let registry = registry();
        let mut first = Peer::new(1, &registry);
        first.connect();
        first.publish("cam");
        assert!(first.status_codes().contains(&NS_PUBLISH_START.to_string()));

        let mut second = Peer::new(2, &registry);
        second.connect();
        second.publish("cam");
        assert_eq!(second.status_codes(), vec![NS_PUBLISH_BAD_NAME]);
        assert_eq!(registry.borrow().publisher("/live/cam").unwrap().session_id, 1);

        first.publish("other");
        assert_eq!(first.status_codes(), vec![NS_PUBLISH_BAD_CONNECTION]);
        assert!(!registry.borrow().is_live("/live/other"));
    }

    #[test]
    fn test_second_play_rejected() {
        let registry = registry();
        let mut viewer = Peer::new(1, &registry);
        viewer.connect();
        viewer.play("cam");
        viewer.drain();
        viewer.play("cam");
        assert_eq!(viewer.status_codes(), vec![NS_PLAY_BAD_CONNECTION]);
        assert_eq!(registry.borrow().player_count("/live/cam"), 1);
    }

    #[test]
    fn test_publisher_close_ends_viewers() {
        let registry = registry();
        let mut publisher = Peer::new(1, &registry);
        publisher.connect();
        publisher.publish("cam");

        let mut viewer = Peer::new(2, &registry);
        viewer.connect();
        viewer.play("cam");
        viewer.drain();

        publisher.session.on_close();
        assert!(!registry.borrow().is_live("/live/cam"));
        assert_eq!(registry.borrow().player_count("/live/cam"), 0);

        let messages = viewer.drain();
        assert_eq!(messages.len(), 2);
        let RtmpMessage::Command(cmd) = &messages[0].1 else {
            panic!("expected onStatus");
        };
        assert_eq!(
            cmd.arguments[0].get_string("code"),
            Some(NS_PLAY_UNPUBLISH_NOTIFY)
        );
        assert_eq!(
            messages[1].1,
            RtmpMessage::UserControl(UserControlEvent::StreamEof(1))
        );
        assert!(viewer.transport.closed.get());

        // the viewer's own teardown finds nothing left to remove
        viewer.session.on_close();
        assert!(viewer.session.on_data(&[0]).is_err());
    }

    #[test]
    fn test_delete_stream() {
        let registry = registry();
        let mut publisher = Peer::new(1, &registry);
        publisher.connect();
        publisher.publish("cam");
        publisher.drain();

        let mut viewer = Peer::new(2, &registry);
        viewer.connect();
        viewer.play("cam");
        viewer.drain();

        viewer.call(CMD_DELETE_STREAM, 0.0, 0, vec![AmfValue::Number(1.0)]);
        assert_eq!(viewer.status_codes(), vec![NS_PLAY_STOP]);
        assert_eq!(registry.borrow().player_count("/live/cam"), 0);
        assert!(!viewer.transport.closed.get());

        publisher.call(CMD_DELETE_STREAM, 0.0, 0, vec![AmfValue::Number(1.0)]);
        let status = publisher.drain().into_iter().find_map(|(_, m)| match m {
            RtmpMessage::Command(cmd) => Some(cmd),
            _ => None,
        });
        let status = status.unwrap();
        assert_eq!(status.arguments[0].get_string("code"), Some(NS_UNPUBLISH_SUCCESS));
        assert_eq!(
            status.arguments[0].get_string("description"),
            Some("/live/cam is now unpublished.")
        );
        assert!(!registry.borrow().is_live("/live/cam"));

        // the path is free again
        publisher.publish("cam");
        assert_eq!(publisher.status_codes(), vec![NS_PUBLISH_START]);
    }

    #[test]
    fn test_receive_video_toggle() {
        let registry = registry();
        let mut publisher = Peer::new(1, &registry);
        publisher.connect();
        publisher.publish("cam");

        let mut viewer = Peer::new(2, &registry);
        viewer.connect();
        viewer.play("cam");
        viewer.call(CMD_RECEIVE_VIDEO, 0.0, 1, vec![AmfValue::Boolean(false)]);
        viewer.drain();

        publisher.send(
            CSID_VIDEO,
            1,
            0,
            RtmpMessage::Video {
                timestamp: 0,
                data: Bytes::from_static(&[0x27, 0x01, 0, 0, 0]),
            },
        );
        publisher.send(
            CSID_AUDIO,
            1,
            5,
            RtmpMessage::Audio {
                timestamp: 5,
                data: Bytes::from_static(&[0xAF, 0x01, 0x21]),
            },
        );

        let received = viewer.drain();
        assert_eq!(received.len(), 1);
        assert!(matches!(received[0].1, RtmpMessage::Audio { .. }));
    }

    #[test]
    fn test_peer_chunk_size_applies_to_ingest() {
        let registry = registry();
        let mut publisher = Peer::new(1, &registry);
        publisher.connect();
        publisher.publish("cam");

        let mut viewer = Peer::new(2, &registry);
        viewer.connect();
        viewer.play("cam");
        viewer.drain();

        publisher.send(CSID_PROTOCOL_CONTROL, 0, 0, RtmpMessage::SetChunkSize(4096));
        publisher.encoder.set_chunk_size(4096).unwrap();

        let mut body = vec![0x27, 0x01, 0, 0, 0];
        body.extend((0..3000u32).map(|i| i as u8));
        let body = Bytes::from(body);
        publisher.send(
            CSID_VIDEO,
            1,
            33,
            RtmpMessage::Video {
                timestamp: 33,
                data: body.clone(),
            },
        );

        let received = viewer.drain();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0.payload, body);
    }

    #[test]
    fn test_invalid_peer_chunk_size_fails() {
        let registry = registry();
        let mut peer = Peer::new(1, &registry);
        let (message_type, payload) = RtmpMessage::SetChunkSize(0).encode();
        let mut buf = BytesMut::new();
        peer.encoder.encode(
            &RtmpChunk {
                csid: CSID_PROTOCOL_CONTROL,
                timestamp: 0,
                message_type,
                stream_id: 0,
                payload,
            },
            &mut buf,
        );
        assert!(peer.session.on_data(&buf).is_err());
    }

    #[test]
    fn test_ping_and_acknowledgement() {
        let registry = registry();
        let mut peer = Peer::new(1, &registry);
        peer.send(CSID_PROTOCOL_CONTROL, 0, 0, RtmpMessage::WindowAckSize(16));
        peer.drain();

        peer.send(
            CSID_PROTOCOL_CONTROL,
            0,
            0,
            RtmpMessage::UserControl(UserControlEvent::PingRequest(1234)),
        );
        let messages: Vec<RtmpMessage> = peer.drain().into_iter().map(|(_, m)| m).collect();
        assert_eq!(
            messages,
            vec![
                RtmpMessage::Acknowledgement {
                    sequence: peer.fed as u32
                },
                RtmpMessage::UserControl(UserControlEvent::PingResponse(1234)),
            ]
        );
    }

    #[test]
    fn test_undecodable_command_skipped() {
        let registry = registry();
        let mut peer = Peer::new(1, &registry);
        let mut buf = BytesMut::new();
        peer.encoder.encode(
            &RtmpChunk {
                csid: CSID_COMMAND,
                timestamp: 0,
                message_type: MSG_COMMAND_AMF0,
                stream_id: 0,
                payload: Bytes::from_static(&[0x42, 0x00]),
            },
            &mut buf,
        );
        peer.feed(&buf);
        peer.connect();
        assert!(peer.session.state().is_active());
    }

    struct DenyPublish;

    impl Authorizer for DenyPublish {
        fn authorize(&self, request: &AuthRequest<'_>) -> AuthDecision {
            match request.action {
                AuthAction::Publish => AuthDecision::Denied("no key".into()),
                AuthAction::Play => AuthDecision::Allowed,
            }
        }
    }

    #[test]
    fn test_publish_denied() {
        let registry = registry();
        let mut peer = Peer::with_authorizer(1, &registry, Rc::new(DenyPublish));
        peer.connect();
        peer.publish("cam");
        assert_eq!(peer.status_codes(), vec![NS_PUBLISH_UNAUTHORIZED]);
        assert!(!registry.borrow().is_live("/live/cam"));
        assert!(!peer.transport.closed.get());

        peer.play("cam");
        assert!(peer.status_codes().contains(&NS_PLAY_START.to_string()));
    }

    #[derive(Default)]
    struct Deferred {
        senders: RefCell<Vec<oneshot::Sender<bool>>>,
        seen_args: RefCell<Vec<HashMap<String, String>>>,
    }

    impl Authorizer for Deferred {
        fn authorize(&self, request: &AuthRequest<'_>) -> AuthDecision {
            self.seen_args.borrow_mut().push(request.args.clone());
            let (tx, rx) = oneshot::channel();
            self.senders.borrow_mut().push(tx);
            AuthDecision::Pending(rx)
        }
    }

    #[test]
    fn test_pending_authorization_buffers_input() {
        let registry = registry();
        let authorizer = Rc::new(Deferred::default());
        let mut peer = Peer::with_authorizer(1, &registry, authorizer.clone());
        peer.connect();
        peer.drain();

        peer.publish("cam?key=s3cret");
        assert!(peer.session.is_auth_pending());
        assert_eq!(
            authorizer.seen_args.borrow()[0].get("key"),
            Some(&"s3cret".to_string())
        );

        // held back until the decision lands
        peer.send(
            CSID_PROTOCOL_CONTROL,
            0,
            0,
            RtmpMessage::UserControl(UserControlEvent::PingRequest(7)),
        );
        assert!(peer.drain().is_empty());

        assert!(peer.session.take_pending_auth().is_some());
        assert!(peer.session.take_pending_auth().is_none());

        peer.session.resolve_auth(true).unwrap();
        assert!(!peer.session.is_auth_pending());
        assert!(registry.borrow().is_live("/live/cam"));

        let messages: Vec<RtmpMessage> = peer.drain().into_iter().map(|(_, m)| m).collect();
        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[0], RtmpMessage::Command(cmd) if cmd.name == CMD_ON_STATUS));
        assert_eq!(
            messages[1],
            RtmpMessage::UserControl(UserControlEvent::PingResponse(7))
        );
    }

    #[test]
    fn test_pending_authorization_rejected() {
        let registry = registry();
        let mut peer = Peer::with_authorizer(1, &registry, Rc::new(Deferred::default()));
        peer.connect();
        peer.drain();

        peer.play("cam");
        assert!(peer.drain().is_empty());
        peer.session.resolve_auth(false).unwrap();
        assert_eq!(peer.status_codes(), vec![NS_PLAY_UNAUTHORIZED]);
        assert_eq!(registry.borrow().player_count("/live/cam"), 0);
    }
}
