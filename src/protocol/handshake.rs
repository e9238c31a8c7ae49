//! RTMP handshake (server side)
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (1 byte: version) --------->|   UNINIT -> C0
//!   |------- C1 (1536 bytes) -------------->|   C0 -> C1, reply S0+S1+S2
//!   |<------ S0 + S1 + S2 (3073 bytes) -----|
//!   |------- C2 (1536 bytes) -------------->|   C1 -> C2 (established)
//! ```
//!
//! Only the "simple" handshake is performed: the C0 version byte is ignored,
//! C1 is echoed back verbatim in S2 and C2 is consumed without validation.
//! Bytes may arrive in any fragmentation; the engine consumes exactly what it
//! needs and leaves everything after C2 in the buffer for the chunk layer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

/// Handshake progress, named after the last packet received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing received yet
    Uninit,
    /// C0 consumed, waiting for C1
    C0,
    /// C1 consumed and answered, waiting for C2
    C1,
    /// C2 consumed; the connection speaks chunks from here on
    C2,
}

/// Server handshake state machine
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Uninit,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// True once C2 has been consumed
    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::C2
    }

    /// Consume as much of `buf` as the current state allows.
    ///
    /// Returns S0+S1+S2 when C1 completes during this call. Insufficient
    /// input is not an error: the engine simply waits for the next delivery.
    pub fn process(&mut self, buf: &mut BytesMut) -> Option<Bytes> {
        let mut response = None;

        loop {
            match self.state {
                HandshakeState::Uninit => {
                    if buf.is_empty() {
                        break;
                    }
                    // C0 version is not checked
                    buf.advance(1);
                    self.state = HandshakeState::C0;
                }
                HandshakeState::C0 => {
                    if buf.len() < HANDSHAKE_SIZE {
                        break;
                    }
                    let c1 = buf.split_to(HANDSHAKE_SIZE);
                    response = Some(generate_response(&c1));
                    self.state = HandshakeState::C1;
                }
                HandshakeState::C1 => {
                    if buf.len() < HANDSHAKE_SIZE {
                        break;
                    }
                    buf.advance(HANDSHAKE_SIZE);
                    self.state = HandshakeState::C2;
                }
                HandshakeState::C2 => break,
            }
        }

        response
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Build S0 + S1 + S2 for the given C1
fn generate_response(c1: &[u8]) -> Bytes {
    let mut response = BytesMut::with_capacity(1 + HANDSHAKE_SIZE * 2);
    response.put_u8(RTMP_VERSION);
    response.put_slice(&generate_packet());
    response.put_slice(&generate_echo(c1));
    response.freeze()
}

/// S1: time(4) + zero(4) + random(1528)
fn generate_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    let timestamp = now_millis();

    packet[0..4].copy_from_slice(&timestamp.to_be_bytes());

    // LCG seeded from the clock; the simple handshake needs no real entropy
    let mut seed = (timestamp as u64) | 1;
    for chunk in packet[8..].chunks_mut(8) {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let bytes = seed.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }

    packet
}

/// S2: C1 time(4) + our time(4) + C1 random(1528)
fn generate_echo(c1: &[u8]) -> [u8; HANDSHAKE_SIZE] {
    let mut echo = [0u8; HANDSHAKE_SIZE];
    echo.copy_from_slice(&c1[..HANDSHAKE_SIZE]);
    echo[4..8].copy_from_slice(&now_millis().to_be_bytes());
    echo
}

fn now_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}
