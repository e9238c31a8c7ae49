//! Session state machine
//!
//! Tracks the overall state of an RTMP session from connection to
//! disconnection: lifecycle phase, connect parameters, the publish/play
//! role and acknowledgement bookkeeping.

use std::net::SocketAddr;
use std::time::Instant;

use crate::protocol::constants::*;
use crate::protocol::message::ConnectParams;
use crate::stats::SessionStats;

/// Inbound byte count at which the acknowledgement counters wrap
const ACK_COUNTER_WRAP: u64 = 0xF000_0000;

/// Values a session advertises after connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Outbound chunk size (SET_CHUNK_SIZE)
    pub chunk_size: u32,
    /// WINDOW_ACK_SIZE sent to the peer
    pub window_ack_size: u32,
    /// SET_PEER_BANDWIDTH sent to the peer
    pub peer_bandwidth: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_OUT_CHUNK_SIZE,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            peer_bandwidth: DEFAULT_PEER_BANDWIDTH,
        }
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Handshake in progress
    Handshaking,
    /// Handshake complete, waiting for connect command
    WaitingConnect,
    /// Connect command received and accepted
    Active,
    /// Session closed
    Closed,
}

/// A path this session publishes or plays, with its message stream id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRole {
    pub path: String,
    pub stream_id: u32,
}

/// Complete session state
#[derive(Debug)]
pub struct SessionState {
    /// Unique session ID
    pub id: u64,

    /// Remote peer address, if the transport has one
    pub peer_addr: Option<SocketAddr>,

    pub phase: SessionPhase,

    pub connected_at: Instant,

    /// Connect parameters (after connect command)
    pub connect_params: Option<ConnectParams>,

    /// Last id handed out by createStream
    stream_counter: u32,

    /// Set while publishing
    pub publishing: Option<StreamRole>,

    /// Set while playing (or waiting for the path to go live)
    pub playing: Option<StreamRole>,

    /// Window the peer asked us to acknowledge (0 = never)
    pub peer_window_ack_size: u32,

    /// Inbound bytes counted for acknowledgements
    ack_bytes: u64,

    /// `ack_bytes` at the last acknowledgement sent
    last_ack: u64,

    pub stats: SessionStats,
}

impl SessionState {
    pub fn new(id: u64, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            id,
            peer_addr,
            phase: SessionPhase::Handshaking,
            connected_at: Instant::now(),
            connect_params: None,
            stream_counter: 0,
            publishing: None,
            playing: None,
            peer_window_ack_size: 0,
            ack_bytes: 0,
            last_ack: 0,
            stats: SessionStats::new(),
        }
    }

    pub fn complete_handshake(&mut self) {
        if self.phase == SessionPhase::Handshaking {
            self.phase = SessionPhase::WaitingConnect;
        }
    }

    pub fn on_connect(&mut self, params: ConnectParams) {
        self.connect_params = Some(params);
        self.phase = SessionPhase::Active;
    }

    /// Application name from connect (empty before connect)
    pub fn app(&self) -> &str {
        self.connect_params
            .as_ref()
            .map(|p| p.app.as_str())
            .unwrap_or_default()
    }

    pub fn object_encoding(&self) -> f64 {
        self.connect_params
            .as_ref()
            .map(|p| p.object_encoding)
            .unwrap_or_default()
    }

    /// `/app/name` for a stream name of this session
    pub fn stream_path(&self, name: &str) -> String {
        format!("/{}/{}", self.app(), name)
    }

    /// Allocate a new message stream ID
    pub fn allocate_stream_id(&mut self) -> u32 {
        self.stream_counter += 1;
        self.stream_counter
    }

    /// Count received bytes; returns the sequence number to acknowledge
    /// once the peer's window has been crossed
    pub fn add_bytes_received(&mut self, bytes: usize) -> Option<u32> {
        self.stats.bytes_received += bytes as u64;

        self.ack_bytes += bytes as u64;
        if self.ack_bytes >= ACK_COUNTER_WRAP {
            self.ack_bytes = 0;
            self.last_ack = 0;
        }

        let window = self.peer_window_ack_size as u64;
        if window > 0 && self.ack_bytes - self.last_ack >= window {
            self.last_ack = self.ack_bytes;
            return Some(self.ack_bytes as u32);
        }
        None
    }

    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    pub fn close(&mut self) {
        self.phase = SessionPhase::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }
}
