//! Chunk stream (de)multiplexing
//!
//! Every RTMP message is split into chunks of at most the negotiated chunk
//! size, each prefixed by a basic header (fmt + chunk stream id) and a message
//! header whose size depends on fmt:
//!
//! ```text
//! fmt 0: timestamp(3) length(3) type(1) stream_id(4, LE)   11 bytes
//! fmt 1: delta(3)     length(3) type(1)                      7 bytes
//! fmt 2: delta(3)                                            3 bytes
//! fmt 3: -                                                   0 bytes
//! ```
//!
//! A 24-bit timestamp of 0xFFFFFF means a 4-byte extended timestamp follows
//! the message header.
//!
//! The decoder is fully resumable: it consumes bytes from the caller's buffer
//! as far as it can, and when input runs out it keeps its position in the
//! state machine so nothing is ever parsed twice. One [`Packet`] is kept per
//! chunk stream id, which lets interleaved audio, video and command messages
//! reassemble independently.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::{
    CHUNK_FMT_0, CHUNK_FMT_3, CHUNK_HEADER_SIZES, DEFAULT_CHUNK_SIZE,
    EXTENDED_TIMESTAMP_THRESHOLD, MAX_CHUNK_SIZE,
};

/// A complete RTMP message, as delivered by the decoder or handed to the encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpChunk {
    /// Chunk stream id the message travels on
    pub csid: u32,
    /// Absolute timestamp in milliseconds
    pub timestamp: u32,
    pub message_type: u8,
    /// Message stream id
    pub stream_id: u32,
    pub payload: Bytes,
}

/// Connection-level parser position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Expecting a basic header
    Begin,
    /// Basic header read; message header / extended timestamp pending
    HeaderReady,
    /// Headers complete; reading payload for the current chunk
    ChunkReady,
}

/// Per-packet parser position within [`ParseState::HeaderReady`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PacketState {
    MsgHeader,
    ExtTimestamp,
    Payload,
}

/// Message under reassembly on one chunk stream id
#[derive(Debug)]
struct Packet {
    state: PacketState,
    /// fmt of the chunk currently being read
    fmt: u8,
    /// Raw timestamp/delta field from the last fmt 0-2 header
    header_timestamp: u32,
    /// Whether the last fmt 0-2 header carried an extended timestamp
    extended: bool,
    /// Running clock for this chunk stream
    clock: u32,
    length: u32,
    message_type: u8,
    stream_id: u32,
    payload: BytesMut,
}

impl Packet {
    fn new() -> Self {
        Self {
            state: PacketState::MsgHeader,
            fmt: CHUNK_FMT_0,
            header_timestamp: 0,
            extended: false,
            clock: 0,
            length: 0,
            message_type: 0,
            stream_id: 0,
            payload: BytesMut::new(),
        }
    }
}

/// Incremental chunk stream parser
#[derive(Debug)]
pub struct ChunkDecoder {
    chunk_size: u32,
    state: ParseState,
    /// Chunk stream id of the chunk being parsed
    current_csid: u32,
    packets: HashMap<u32, Packet>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            state: ParseState::Begin,
            current_csid: 0,
            packets: HashMap::new(),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Apply a peer SET_CHUNK_SIZE
    pub fn set_chunk_size(&mut self, size: u32) -> Result<()> {
        if size == 0 || size > MAX_CHUNK_SIZE {
            return Err(ProtocolError::InvalidChunkSize(size).into());
        }
        self.chunk_size = size;
        Ok(())
    }

    /// Number of chunk streams seen on this connection
    pub fn active_streams(&self) -> usize {
        self.packets.len()
    }

    /// Decode the next complete message from `buf`.
    ///
    /// Consumes as many bytes as it can. Returns `None` when `buf` holds no
    /// further complete message; partial progress is kept for the next call.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Option<RtmpChunk> {
        loop {
            match self.state {
                ParseState::Begin => {
                    let (fmt, csid) = read_basic_header(buf)?;
                    let packet = self.packets.entry(csid).or_insert_with(Packet::new);
                    packet.fmt = fmt;
                    packet.state = PacketState::MsgHeader;
                    self.current_csid = csid;
                    self.state = ParseState::HeaderReady;
                }
                ParseState::HeaderReady => {
                    let packet = self.packets.get_mut(&self.current_csid)?;
                    if packet.state == PacketState::MsgHeader {
                        if !read_message_header(packet, buf) {
                            return None;
                        }
                        packet.state = PacketState::ExtTimestamp;
                    }
                    if packet.state == PacketState::ExtTimestamp {
                        if !read_extended_timestamp(packet, buf) {
                            return None;
                        }
                        packet.state = PacketState::Payload;
                    }
                    self.state = ParseState::ChunkReady;
                }
                ParseState::ChunkReady => {
                    let chunk_size = self.chunk_size as usize;
                    let csid = self.current_csid;
                    let packet = self.packets.get_mut(&csid)?;

                    let received = packet.payload.len();
                    let length = packet.length as usize;
                    let step = (chunk_size - received % chunk_size).min(length.saturating_sub(received));
                    let take = step.min(buf.len());
                    if take > 0 {
                        packet.payload.put_slice(&buf[..take]);
                        buf.advance(take);
                    }

                    if take < step {
                        return None;
                    }

                    self.state = ParseState::Begin;
                    packet.state = PacketState::MsgHeader;
                    if packet.payload.len() >= length {
                        return Some(RtmpChunk {
                            csid,
                            timestamp: packet.clock,
                            message_type: packet.message_type,
                            stream_id: packet.stream_id,
                            payload: packet.payload.split().freeze(),
                        });
                    }
                    // chunk boundary; a fmt 3 header continues the message
                }
            }
        }
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse fmt + chunk stream id, consuming 1-3 bytes
fn read_basic_header(buf: &mut BytesMut) -> Option<(u8, u32)> {
    let first = *buf.first()?;
    let fmt = first >> 6;
    match first & 0x3F {
        0 => {
            if buf.len() < 2 {
                return None;
            }
            let csid = buf[1] as u32 + 64;
            buf.advance(2);
            Some((fmt, csid))
        }
        1 => {
            if buf.len() < 3 {
                return None;
            }
            let csid = u16::from_le_bytes([buf[1], buf[2]]) as u32 + 64;
            buf.advance(3);
            Some((fmt, csid))
        }
        id => {
            buf.advance(1);
            Some((fmt, id as u32))
        }
    }
}

/// Parse the fmt-dependent message header into `packet`.
///
/// Returns false if `buf` does not yet hold the whole header.
fn read_message_header(packet: &mut Packet, buf: &mut BytesMut) -> bool {
    let size = CHUNK_HEADER_SIZES[packet.fmt as usize];
    if buf.len() < size {
        return false;
    }

    if packet.fmt < CHUNK_FMT_3 {
        let timestamp = buf.get_uint(3) as u32;
        packet.extended = timestamp == EXTENDED_TIMESTAMP_THRESHOLD;
        packet.header_timestamp = timestamp;
    }
    if packet.fmt < 2 {
        packet.length = buf.get_uint(3) as u32;
        packet.message_type = buf.get_u8();
    }
    if packet.fmt == CHUNK_FMT_0 {
        packet.stream_id = buf.get_u32_le();
    }
    true
}

/// Read the extended timestamp if one is due, then advance the clock when
/// this chunk starts a new message.
fn read_extended_timestamp(packet: &mut Packet, buf: &mut BytesMut) -> bool {
    if packet.extended {
        if buf.len() < 4 {
            return false;
        }
        let extended = buf.get_u32();
        // fmt 3 repeats the previous value; only headers with a field update it
        if packet.fmt < CHUNK_FMT_3 {
            packet.header_timestamp = extended;
        }
    }

    if packet.payload.is_empty() {
        if packet.fmt == CHUNK_FMT_0 {
            packet.clock = packet.header_timestamp;
        } else {
            packet.clock = packet.clock.wrapping_add(packet.header_timestamp);
        }
        packet
            .payload
            .reserve((packet.length as usize).min(DEFAULT_CHUNK_SIZE as usize * 32));
    }
    true
}

/// Chunk stream serializer
///
/// Egress always uses fmt 0 for the first chunk of a message and fmt 3 for
/// the rest; no header compression is attempted.
#[derive(Debug)]
pub struct ChunkEncoder {
    chunk_size: u32,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Set the outbound chunk size; announce it with SET_CHUNK_SIZE first
    pub fn set_chunk_size(&mut self, size: u32) -> Result<()> {
        if size == 0 || size > MAX_CHUNK_SIZE {
            return Err(ProtocolError::InvalidChunkSize(size).into());
        }
        self.chunk_size = size;
        Ok(())
    }

    /// Serialize one message into `buf`
    pub fn encode(&self, chunk: &RtmpChunk, buf: &mut BytesMut) {
        let extended = chunk.timestamp >= EXTENDED_TIMESTAMP_THRESHOLD;
        let chunk_size = self.chunk_size as usize;
        let payload = &chunk.payload[..];
        let chunks = payload.len().div_ceil(chunk_size).max(1);
        buf.reserve(payload.len() + 16 + (chunks - 1) * 8);

        write_basic_header(buf, CHUNK_FMT_0, chunk.csid);
        let timestamp = chunk.timestamp.min(EXTENDED_TIMESTAMP_THRESHOLD);
        buf.put_uint(timestamp as u64, 3);
        buf.put_uint(payload.len() as u64, 3);
        buf.put_u8(chunk.message_type);
        buf.put_u32_le(chunk.stream_id);
        if extended {
            buf.put_u32(chunk.timestamp);
        }

        let mut pieces = payload.chunks(chunk_size);
        if let Some(first) = pieces.next() {
            buf.put_slice(first);
        }
        for piece in pieces {
            write_basic_header(buf, CHUNK_FMT_3, chunk.csid);
            if extended {
                buf.put_u32(chunk.timestamp);
            }
            buf.put_slice(piece);
        }
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_basic_header(buf: &mut BytesMut, fmt: u8, csid: u32) {
    match csid {
        0..=63 => buf.put_u8((fmt << 6) | csid as u8),
        64..=319 => {
            buf.put_u8(fmt << 6);
            buf.put_u8((csid - 64) as u8);
        }
        _ => {
            buf.put_u8((fmt << 6) | 1);
            buf.put_u16_le((csid - 64) as u16);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(csid: u32, timestamp: u32, len: usize) -> RtmpChunk {
        RtmpChunk {
            csid,
            timestamp,
            message_type: 9,
            stream_id: 1,
            payload: Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>()),
        }
    }

    fn roundtrip(chunk: &RtmpChunk, chunk_size: u32) -> RtmpChunk {
        let mut encoder = ChunkEncoder::new();
        encoder.set_chunk_size(chunk_size).unwrap();
        let mut decoder = ChunkDecoder::new();
        decoder.set_chunk_size(chunk_size).unwrap();

        let mut buf = BytesMut::new();
        encoder.encode(chunk, &mut buf);
        let decoded = decoder.decode(&mut buf).expect("complete message");
        assert!(buf.is_empty());
        decoded
    }

    #[test]
    fn test_roundtrip_lengths_around_chunk_size() {
        for chunk_size in [128u32, 4096] {
            let c = chunk_size as usize;
            for len in [0, 1, c - 1, c, c + 1, 5 * c + 3] {
                let original = message(6, 1000, len);
                assert_eq!(roundtrip(&original, chunk_size), original, "len {}", len);
            }
        }
    }

    #[test]
    fn test_roundtrip_extended_timestamp() {
        let original = message(4, 0x0100_0000, 300);
        assert_eq!(roundtrip(&original, 128), original);

        let at_threshold = message(4, EXTENDED_TIMESTAMP_THRESHOLD, 10);
        assert_eq!(roundtrip(&at_threshold, 128), at_threshold);
    }

    #[test]
    fn test_encode_extended_on_every_chunk() {
        let encoder = ChunkEncoder::new();
        let mut buf = BytesMut::new();
        encoder.encode(&message(3, 0x0100_0000, 200), &mut buf);

        // 1 + 11 + 4 + 128 for the first chunk, then 1 + 4 + 72
        assert_eq!(buf.len(), 144 + 77);
        assert_eq!(buf[144], 0xC3);
        assert_eq!(&buf[145..149], &0x0100_0000u32.to_be_bytes());
    }

    #[test]
    fn test_csid_encodings() {
        for csid in [2u32, 63, 64, 319, 320, 65599] {
            let original = message(csid, 5, 20);
            assert_eq!(roundtrip(&original, 128), original, "csid {}", csid);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let encoder = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        let original = message(6, 40, 700);
        encoder.encode(&original, &mut wire);

        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        for b in wire.iter() {
            buf.put_u8(*b);
            if let Some(msg) = decoder.decode(&mut buf) {
                out.push(msg);
            }
        }
        assert_eq!(out, vec![original]);
    }

    #[test]
    fn test_interleaved_chunk_streams() {
        // audio on csid 4 and video on csid 6, chunks alternating
        let mut buf = BytesMut::new();
        let audio: Vec<u8> = vec![0xAA; 200];
        let video: Vec<u8> = vec![0xBB; 200];

        buf.put_u8(0x04);
        buf.put_uint(10, 3);
        buf.put_uint(200, 3);
        buf.put_u8(8);
        buf.put_u32_le(1);
        buf.put_slice(&audio[..128]);

        buf.put_u8(0x06);
        buf.put_uint(20, 3);
        buf.put_uint(200, 3);
        buf.put_u8(9);
        buf.put_u32_le(1);
        buf.put_slice(&video[..128]);

        buf.put_u8(0xC6);
        buf.put_slice(&video[128..]);
        buf.put_u8(0xC4);
        buf.put_slice(&audio[128..]);

        let mut decoder = ChunkDecoder::new();
        let first = decoder.decode(&mut buf).unwrap();
        let second = decoder.decode(&mut buf).unwrap();
        assert!(decoder.decode(&mut buf).is_none());

        assert_eq!(first.message_type, 9);
        assert_eq!(first.timestamp, 20);
        assert_eq!(&first.payload[..], &video[..]);
        assert_eq!(second.message_type, 8);
        assert_eq!(second.timestamp, 10);
        assert_eq!(&second.payload[..], &audio[..]);
        assert_eq!(decoder.active_streams(), 2);
    }

    #[test]
    fn test_delta_formats_accumulate_clock() {
        let mut buf = BytesMut::new();
        // fmt 0 at t=100
        buf.put_u8(0x04);
        buf.put_uint(100, 3);
        buf.put_uint(2, 3);
        buf.put_u8(8);
        buf.put_u32_le(1);
        buf.put_slice(&[1, 2]);
        // fmt 1, delta 20, new length
        buf.put_u8(0x44);
        buf.put_uint(20, 3);
        buf.put_uint(3, 3);
        buf.put_u8(8);
        buf.put_slice(&[3, 4, 5]);
        // fmt 2, delta 23
        buf.put_u8(0x84);
        buf.put_uint(23, 3);
        buf.put_slice(&[6, 7, 8]);
        // fmt 3 starting a new message repeats delta 23
        buf.put_u8(0xC4);
        buf.put_slice(&[9, 10, 11]);

        let mut decoder = ChunkDecoder::new();
        let times: Vec<u32> = std::iter::from_fn(|| decoder.decode(&mut buf))
            .map(|m| m.timestamp)
            .collect();
        assert_eq!(times, vec![100, 120, 143, 166]);
    }

    #[test]
    fn test_fmt3_continuation_does_not_advance_clock() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x46);
        buf.put_uint(33, 3);
        buf.put_uint(130, 3);
        buf.put_u8(9);
        buf.put_slice(&[0u8; 128]);
        buf.put_u8(0xC6);
        buf.put_slice(&[0u8; 2]);

        let mut decoder = ChunkDecoder::new();
        let msg = decoder.decode(&mut buf).unwrap();
        assert_eq!(msg.timestamp, 33);
        assert_eq!(msg.payload.len(), 130);
    }

    #[test]
    fn test_chunk_size_change_between_messages() {
        let mut encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::new();

        let small = message(3, 0, 300);
        encoder.encode(&small, &mut buf);
        assert_eq!(decoder.decode(&mut buf).unwrap(), small);

        encoder.set_chunk_size(4096).unwrap();
        decoder.set_chunk_size(4096).unwrap();
        let large = message(3, 0, 5000);
        encoder.encode(&large, &mut buf);
        assert_eq!(decoder.decode(&mut buf).unwrap(), large);
    }

    #[test]
    fn test_invalid_chunk_size() {
        let mut decoder = ChunkDecoder::new();
        assert!(decoder.set_chunk_size(0).is_err());
        assert!(decoder.set_chunk_size(MAX_CHUNK_SIZE + 1).is_err());
        assert_eq!(decoder.chunk_size(), DEFAULT_CHUNK_SIZE);
    }
}
