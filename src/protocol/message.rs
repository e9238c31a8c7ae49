//! RTMP message layer
//!
//! Turns reassembled chunks into typed messages and back. Control messages
//! (types 1-6) carry fixed big-endian fields; commands (20) and data messages
//! (18) carry AMF0 value sequences. The AMF3 variants (17, 15) are an AMF0
//! body behind a single format byte and are parsed the same way.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::amf::{self, AmfObject, AmfValue};
use crate::error::{ProtocolError, Result};
use crate::protocol::chunk::RtmpChunk;
use crate::protocol::constants::*;

/// A parsed RTMP message
#[derive(Debug, Clone, PartialEq)]
pub enum RtmpMessage {
    SetChunkSize(u32),
    Abort { csid: u32 },
    Acknowledgement { sequence: u32 },
    UserControl(UserControlEvent),
    WindowAckSize(u32),
    SetPeerBandwidth { size: u32, limit_type: u8 },
    Audio { timestamp: u32, data: Bytes },
    Video { timestamp: u32, data: Bytes },
    Command(Command),
    Data(DataMessage),
    /// Anything else (shared objects, aggregates) is carried through untouched
    Unknown { type_id: u8, data: Bytes },
}

impl RtmpMessage {
    /// Parse a reassembled chunk into a message
    pub fn from_chunk(chunk: &RtmpChunk) -> Result<Self> {
        let mut payload = chunk.payload.clone();
        let message_type = chunk.message_type;

        let need = |len: usize| -> Result<()> {
            if chunk.payload.len() < len {
                return Err(ProtocolError::ShortMessage {
                    message_type,
                    len: chunk.payload.len(),
                }
                .into());
            }
            Ok(())
        };

        let message = match message_type {
            MSG_SET_CHUNK_SIZE => {
                need(4)?;
                RtmpMessage::SetChunkSize(payload.get_u32() & 0x7FFF_FFFF)
            }
            MSG_ABORT => {
                need(4)?;
                RtmpMessage::Abort {
                    csid: payload.get_u32(),
                }
            }
            MSG_ACKNOWLEDGEMENT => {
                need(4)?;
                RtmpMessage::Acknowledgement {
                    sequence: payload.get_u32(),
                }
            }
            MSG_USER_CONTROL => RtmpMessage::UserControl(UserControlEvent::parse(payload)?),
            MSG_WINDOW_ACK_SIZE => {
                need(4)?;
                RtmpMessage::WindowAckSize(payload.get_u32())
            }
            MSG_SET_PEER_BANDWIDTH => {
                need(5)?;
                RtmpMessage::SetPeerBandwidth {
                    size: payload.get_u32(),
                    limit_type: payload.get_u8(),
                }
            }
            MSG_AUDIO => RtmpMessage::Audio {
                timestamp: chunk.timestamp,
                data: payload,
            },
            MSG_VIDEO => RtmpMessage::Video {
                timestamp: chunk.timestamp,
                data: payload,
            },
            MSG_COMMAND_AMF0 => RtmpMessage::Command(Command::parse(payload, chunk.stream_id)?),
            MSG_COMMAND_AMF3 => {
                need(1)?;
                payload.advance(1);
                RtmpMessage::Command(Command::parse(payload, chunk.stream_id)?)
            }
            MSG_DATA_AMF0 => RtmpMessage::Data(DataMessage::parse(payload, chunk.stream_id)?),
            MSG_DATA_AMF3 => {
                need(1)?;
                payload.advance(1);
                RtmpMessage::Data(DataMessage::parse(payload, chunk.stream_id)?)
            }
            type_id => RtmpMessage::Unknown {
                type_id,
                data: payload,
            },
        };

        Ok(message)
    }

    /// Serialize to (message type, payload)
    pub fn encode(&self) -> (u8, Bytes) {
        let mut buf = BytesMut::with_capacity(16);
        match self {
            RtmpMessage::SetChunkSize(size) => {
                buf.put_u32(*size & 0x7FFF_FFFF);
                (MSG_SET_CHUNK_SIZE, buf.freeze())
            }
            RtmpMessage::Abort { csid } => {
                buf.put_u32(*csid);
                (MSG_ABORT, buf.freeze())
            }
            RtmpMessage::Acknowledgement { sequence } => {
                buf.put_u32(*sequence);
                (MSG_ACKNOWLEDGEMENT, buf.freeze())
            }
            RtmpMessage::UserControl(event) => (MSG_USER_CONTROL, event.encode()),
            RtmpMessage::WindowAckSize(size) => {
                buf.put_u32(*size);
                (MSG_WINDOW_ACK_SIZE, buf.freeze())
            }
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                buf.put_u32(*size);
                buf.put_u8(*limit_type);
                (MSG_SET_PEER_BANDWIDTH, buf.freeze())
            }
            RtmpMessage::Audio { data, .. } => (MSG_AUDIO, data.clone()),
            RtmpMessage::Video { data, .. } => (MSG_VIDEO, data.clone()),
            RtmpMessage::Command(cmd) => (MSG_COMMAND_AMF0, cmd.encode()),
            RtmpMessage::Data(data) => (MSG_DATA_AMF0, data.encode()),
            RtmpMessage::Unknown { type_id, data } => (*type_id, data.clone()),
        }
    }
}

/// User control event (message type 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    StreamIsRecorded(u32),
    PingRequest(u32),
    PingResponse(u32),
}

impl UserControlEvent {
    fn parse(mut payload: Bytes) -> Result<Self> {
        let short = |len| ProtocolError::ShortMessage {
            message_type: MSG_USER_CONTROL,
            len,
        };
        if payload.len() < 6 {
            return Err(short(payload.len()).into());
        }

        let event_type = payload.get_u16();
        let value = payload.get_u32();
        let event = match event_type {
            UC_STREAM_BEGIN => UserControlEvent::StreamBegin(value),
            UC_STREAM_EOF => UserControlEvent::StreamEof(value),
            UC_STREAM_DRY => UserControlEvent::StreamDry(value),
            UC_SET_BUFFER_LENGTH => {
                if payload.len() < 4 {
                    return Err(short(payload.len() + 6).into());
                }
                UserControlEvent::SetBufferLength {
                    stream_id: value,
                    buffer_ms: payload.get_u32(),
                }
            }
            UC_STREAM_IS_RECORDED => UserControlEvent::StreamIsRecorded(value),
            UC_PING_REQUEST => UserControlEvent::PingRequest(value),
            UC_PING_RESPONSE => UserControlEvent::PingResponse(value),
            other => return Err(ProtocolError::UnknownUserControl(other).into()),
        };
        Ok(event)
    }

    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(10);
        match *self {
            UserControlEvent::StreamBegin(id) => {
                buf.put_u16(UC_STREAM_BEGIN);
                buf.put_u32(id);
            }
            UserControlEvent::StreamEof(id) => {
                buf.put_u16(UC_STREAM_EOF);
                buf.put_u32(id);
            }
            UserControlEvent::StreamDry(id) => {
                buf.put_u16(UC_STREAM_DRY);
                buf.put_u32(id);
            }
            UserControlEvent::SetBufferLength {
                stream_id,
                buffer_ms,
            } => {
                buf.put_u16(UC_SET_BUFFER_LENGTH);
                buf.put_u32(stream_id);
                buf.put_u32(buffer_ms);
            }
            UserControlEvent::StreamIsRecorded(id) => {
                buf.put_u16(UC_STREAM_IS_RECORDED);
                buf.put_u32(id);
            }
            UserControlEvent::PingRequest(ts) => {
                buf.put_u16(UC_PING_REQUEST);
                buf.put_u32(ts);
            }
            UserControlEvent::PingResponse(ts) => {
                buf.put_u16(UC_PING_RESPONSE);
                buf.put_u32(ts);
            }
        }
        buf.freeze()
    }
}

/// An AMF0 command: name, transaction id, command object, then arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    pub command_object: AmfValue,
    pub arguments: Vec<AmfValue>,
    /// Message stream id the command arrived on / is sent on
    pub stream_id: u32,
}

impl Command {
    fn parse(payload: Bytes, stream_id: u32) -> Result<Self> {
        let mut values = amf::decode_all(&payload)?.into_iter();

        let name = match values.next() {
            Some(AmfValue::String(name)) => name,
            other => {
                return Err(ProtocolError::MalformedCommand(format!(
                    "expected command name, got {:?}",
                    other
                ))
                .into())
            }
        };
        let transaction_id = values.next().and_then(|v| v.as_number()).unwrap_or(0.0);
        let command_object = values.next().unwrap_or(AmfValue::Null);

        Ok(Command {
            name,
            transaction_id,
            command_object,
            arguments: values.collect(),
            stream_id,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut encoder = amf::Amf0Encoder::new();
        encoder.encode(&AmfValue::String(self.name.clone()));
        encoder.encode(&AmfValue::Number(self.transaction_id));
        encoder.encode(&self.command_object);
        encoder.encode_all(&self.arguments);
        encoder.finish()
    }

    /// `_result` with a command object and one information argument
    pub fn result(transaction_id: f64, command_object: AmfValue, info: AmfValue) -> Self {
        Command {
            name: CMD_RESULT.to_string(),
            transaction_id,
            command_object,
            arguments: vec![info],
            stream_id: 0,
        }
    }

    /// `onStatus` with a {level, code, description} info object
    pub fn on_status(stream_id: u32, level: &str, code: &str, description: &str) -> Self {
        let info = AmfObject::new()
            .with("level", level)
            .with("code", code)
            .with("description", description);
        Command {
            name: CMD_ON_STATUS.to_string(),
            transaction_id: 0.0,
            command_object: AmfValue::Null,
            arguments: vec![AmfValue::Object(info)],
            stream_id,
        }
    }

    /// First argument as a string (stream name for publish/play)
    pub fn string_arg(&self, index: usize) -> Option<&str> {
        self.arguments.get(index)?.as_str()
    }

    pub fn number_arg(&self, index: usize) -> Option<f64> {
        self.arguments.get(index)?.as_number()
    }

    pub fn bool_arg(&self, index: usize) -> Option<bool> {
        self.arguments.get(index)?.as_bool()
    }
}

/// An AMF0 data message: a handler name followed by values
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    pub name: String,
    pub values: Vec<AmfValue>,
    pub stream_id: u32,
}

impl DataMessage {
    fn parse(payload: Bytes, stream_id: u32) -> Result<Self> {
        let mut values = amf::decode_all(&payload)?.into_iter();
        let name = match values.next() {
            Some(AmfValue::String(name)) => name,
            other => {
                return Err(ProtocolError::MalformedCommand(format!(
                    "expected data handler name, got {:?}",
                    other
                ))
                .into())
            }
        };
        Ok(DataMessage {
            name,
            values: values.collect(),
            stream_id,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut encoder = amf::Amf0Encoder::new();
        encoder.encode(&AmfValue::String(self.name.clone()));
        encoder.encode_all(&self.values);
        encoder.finish()
    }

    /// `onMetaData` carrying a single data object
    pub fn on_metadata(data: AmfValue) -> Self {
        DataMessage {
            name: CMD_ON_METADATA.to_string(),
            values: vec![data],
            stream_id: 0,
        }
    }

    /// The data object of `onMetaData` / `@setDataFrame`
    pub fn metadata_object(&self) -> Option<&AmfValue> {
        let object = match self.name.as_str() {
            CMD_ON_METADATA => self.values.first(),
            CMD_SET_DATA_FRAME => self.values.get(1),
            _ => None,
        };
        object.filter(|v| v.as_object().is_some())
    }
}

/// connect parameters from the command object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectParams {
    pub app: String,
    pub flash_ver: Option<String>,
    pub tc_url: Option<String>,
    pub object_encoding: f64,
}

impl ConnectParams {
    pub fn from_amf(object: &AmfValue) -> Self {
        ConnectParams {
            app: object.get_string("app").unwrap_or_default().to_string(),
            flash_ver: object.get_string("flashVer").map(str::to_string),
            tc_url: object.get_string("tcUrl").map(str::to_string),
            object_encoding: object.get_number("objectEncoding").unwrap_or(0.0),
        }
    }

    pub fn to_command(&self, transaction_id: f64) -> Command {
        let mut object = AmfObject::new().with("app", self.app.as_str());
        if let Some(flash_ver) = &self.flash_ver {
            object.insert("flashVer", flash_ver.as_str());
        }
        if let Some(tc_url) = &self.tc_url {
            object.insert("tcUrl", tc_url.as_str());
        }
        object.insert("objectEncoding", self.object_encoding);
        Command {
            name: CMD_CONNECT.to_string(),
            transaction_id,
            command_object: AmfValue::Object(object),
            arguments: Vec::new(),
            stream_id: 0,
        }
    }
}

/// publish{streamName, type}; a query string after `?` becomes `args`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishParams {
    /// Stream name without query
    pub name: String,
    pub publish_type: String,
    pub args: HashMap<String, String>,
}

impl PublishParams {
    pub fn from_command(cmd: &Command) -> Self {
        let (name, args) = split_stream_name(cmd.string_arg(0).unwrap_or_default());
        PublishParams {
            name,
            publish_type: cmd.string_arg(1).unwrap_or("live").to_string(),
            args,
        }
    }

    pub fn to_command(&self, transaction_id: f64, stream_id: u32) -> Command {
        Command {
            name: CMD_PUBLISH.to_string(),
            transaction_id,
            command_object: AmfValue::Null,
            arguments: vec![
                AmfValue::String(join_stream_name(&self.name, &self.args)),
                AmfValue::String(self.publish_type.clone()),
            ],
            stream_id,
        }
    }
}

/// play{streamName, start, duration, reset}
#[derive(Debug, Clone, PartialEq)]
pub struct PlayParams {
    pub name: String,
    pub args: HashMap<String, String>,
    pub start: f64,
    pub duration: f64,
    pub reset: bool,
}

impl PlayParams {
    pub fn from_command(cmd: &Command) -> Self {
        let (name, args) = split_stream_name(cmd.string_arg(0).unwrap_or_default());
        PlayParams {
            name,
            args,
            start: cmd.number_arg(1).unwrap_or(-2.0),
            duration: cmd.number_arg(2).unwrap_or(-1.0),
            reset: cmd.bool_arg(3).unwrap_or(true),
        }
    }

    pub fn to_command(&self, transaction_id: f64, stream_id: u32) -> Command {
        Command {
            name: CMD_PLAY.to_string(),
            transaction_id,
            command_object: AmfValue::Null,
            arguments: vec![
                AmfValue::String(join_stream_name(&self.name, &self.args)),
                AmfValue::Number(self.start),
                AmfValue::Number(self.duration),
                AmfValue::Boolean(self.reset),
            ],
            stream_id,
        }
    }
}

fn split_stream_name(raw: &str) -> (String, HashMap<String, String>) {
    match raw.split_once('?') {
        Some((name, query)) => (
            name.to_string(),
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        ),
        None => (raw.to_string(), HashMap::new()),
    }
}

fn join_stream_name(name: &str, args: &HashMap<String, String>) -> String {
    if args.is_empty() {
        return name.to_string();
    }
    let mut keys: Vec<&String> = args.keys().collect();
    keys.sort();
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for key in keys {
        query.append_pair(key, &args[key]);
    }
    format!("{}?{}", name, query.finish())
}
