//! RTMP protocol constants
//!
//! Wire values are fixed by the Adobe RTMP specification; the defaults at the
//! bottom are what this relay advertises to its peers.

/// RTMP version byte (S0)
pub const RTMP_VERSION: u8 = 3;

/// Default RTMP port
pub const RTMP_PORT: u16 = 1935;

/// Size of C1/C2/S1/S2
pub const HANDSHAKE_SIZE: usize = 1536;

/// Length of the random section of a handshake packet
pub const HANDSHAKE_RANDOM_SIZE: usize = HANDSHAKE_SIZE - 8;

/// Chunk size both sides assume until SET_CHUNK_SIZE arrives
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Largest chunk size a peer may negotiate (31 bits on the wire, capped)
pub const MAX_CHUNK_SIZE: u32 = 0xFFFFFF;

/// 24-bit timestamps at or above this carry a 4-byte extended field
pub const EXTENDED_TIMESTAMP_THRESHOLD: u32 = 0xFFFFFF;

// Chunk stream ids used on egress

pub const CSID_PROTOCOL_CONTROL: u32 = 2;
pub const CSID_COMMAND: u32 = 3;
pub const CSID_AUDIO: u32 = 4;
pub const CSID_DATA: u32 = 5;
pub const CSID_VIDEO: u32 = 6;

// Message type ids

pub const MSG_SET_CHUNK_SIZE: u8 = 1;
pub const MSG_ABORT: u8 = 2;
pub const MSG_ACKNOWLEDGEMENT: u8 = 3;
pub const MSG_USER_CONTROL: u8 = 4;
pub const MSG_WINDOW_ACK_SIZE: u8 = 5;
pub const MSG_SET_PEER_BANDWIDTH: u8 = 6;
pub const MSG_AUDIO: u8 = 8;
pub const MSG_VIDEO: u8 = 9;
pub const MSG_DATA_AMF3: u8 = 15;
pub const MSG_COMMAND_AMF3: u8 = 17;
pub const MSG_DATA_AMF0: u8 = 18;
pub const MSG_COMMAND_AMF0: u8 = 20;

// User control events

pub const UC_STREAM_BEGIN: u16 = 0;
pub const UC_STREAM_EOF: u16 = 1;
pub const UC_STREAM_DRY: u16 = 2;
pub const UC_SET_BUFFER_LENGTH: u16 = 3;
pub const UC_STREAM_IS_RECORDED: u16 = 4;
pub const UC_PING_REQUEST: u16 = 6;
pub const UC_PING_RESPONSE: u16 = 7;

/// SET_PEER_BANDWIDTH limit type sent after connect
pub const BANDWIDTH_LIMIT_DYNAMIC: u8 = 2;

// Command names

pub const CMD_CONNECT: &str = "connect";
pub const CMD_CREATE_STREAM: &str = "createStream";
pub const CMD_DELETE_STREAM: &str = "deleteStream";
pub const CMD_CLOSE_STREAM: &str = "closeStream";
pub const CMD_PLAY: &str = "play";
pub const CMD_PUBLISH: &str = "publish";
pub const CMD_PAUSE: &str = "pause";
pub const CMD_RECEIVE_AUDIO: &str = "receiveAudio";
pub const CMD_RECEIVE_VIDEO: &str = "receiveVideo";
pub const CMD_FC_PUBLISH: &str = "FCPublish";
pub const CMD_FC_UNPUBLISH: &str = "FCUnpublish";
pub const CMD_RELEASE_STREAM: &str = "releaseStream";
pub const CMD_RESULT: &str = "_result";
pub const CMD_ON_STATUS: &str = "onStatus";

pub const CMD_SET_DATA_FRAME: &str = "@setDataFrame";
pub const CMD_ON_METADATA: &str = "onMetaData";
pub const CMD_SAMPLE_ACCESS: &str = "|RtmpSampleAccess";

// Status codes

pub const NC_CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";

pub const NS_PUBLISH_START: &str = "NetStream.Publish.Start";
pub const NS_PUBLISH_BAD_NAME: &str = "NetStream.Publish.BadName";
pub const NS_PUBLISH_BAD_CONNECTION: &str = "NetStream.Publish.BadConnection";
pub const NS_PUBLISH_UNAUTHORIZED: &str = "NetStream.Publish.Unauthorized";
pub const NS_UNPUBLISH_SUCCESS: &str = "NetStream.Unpublish.Success";
pub const NS_PLAY_START: &str = "NetStream.Play.Start";
pub const NS_PLAY_RESET: &str = "NetStream.Play.Reset";
pub const NS_PLAY_BAD_CONNECTION: &str = "NetStream.Play.BadConnection";
pub const NS_PLAY_UNAUTHORIZED: &str = "NetStream.Play.Unauthorized";
pub const NS_PLAY_UNPUBLISH_NOTIFY: &str = "NetStream.Play.UnpublishNotify";
pub const NS_PLAY_STOP: &str = "NetStream.Play.Stop";

// Server identity in the connect `_result`

pub const FMS_VERSION: &str = "FMS/3,0,1,123";
pub const FMS_CAPABILITIES: f64 = 31.0;

// Defaults advertised after connect

pub const DEFAULT_OUT_CHUNK_SIZE: u32 = 60_000;
pub const DEFAULT_WINDOW_ACK_SIZE: u32 = 5_000_000;
pub const DEFAULT_PEER_BANDWIDTH: u32 = 5_000_000;

// Chunk header formats (fmt field)

pub const CHUNK_FMT_0: u8 = 0;
pub const CHUNK_FMT_1: u8 = 1;
pub const CHUNK_FMT_2: u8 = 2;
pub const CHUNK_FMT_3: u8 = 3;

/// Message header sizes indexed by fmt
pub const CHUNK_HEADER_SIZES: [usize; 4] = [11, 7, 3, 0];
