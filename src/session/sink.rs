//! Outbound message writer and the viewer end of a play session

use std::cell::Cell;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};

use super::transport::Transport;
use crate::media::Frame;
use crate::protocol::constants::*;
use crate::protocol::{ChunkEncoder, Command, RtmpChunk, RtmpMessage, UserControlEvent};
use crate::registry::FrameSink;

/// Chunk encoder bound to a transport
///
/// Every message is encoded and handed to the transport in one write.
pub(crate) struct Outbox {
    encoder: ChunkEncoder,
    transport: Rc<dyn Transport>,
    /// Bytes written, shared with viewer sinks of the same connection
    sent: Rc<Cell<u64>>,
}

impl Outbox {
    pub(crate) fn new(transport: Rc<dyn Transport>) -> Self {
        Self {
            encoder: ChunkEncoder::new(),
            transport,
            sent: Rc::new(Cell::new(0)),
        }
    }

    /// A second writer on the same transport, at the current chunk size
    pub(crate) fn fork(&self) -> Self {
        let mut encoder = ChunkEncoder::new();
        // the size was validated when it was set on this encoder
        let _ = encoder.set_chunk_size(self.encoder.chunk_size());
        Self {
            encoder,
            transport: Rc::clone(&self.transport),
            sent: Rc::clone(&self.sent),
        }
    }

    pub(crate) fn encoder_mut(&mut self) -> &mut ChunkEncoder {
        &mut self.encoder
    }

    pub(crate) fn bytes_sent(&self) -> u64 {
        self.sent.get()
    }

    pub(crate) fn send_raw(&self, data: Bytes) {
        self.sent.set(self.sent.get() + data.len() as u64);
        self.transport.write(data);
    }

    pub(crate) fn send_chunk(&self, chunk: &RtmpChunk) {
        let mut buf = BytesMut::new();
        self.encoder.encode(chunk, &mut buf);
        self.send_raw(buf.freeze());
    }

    pub(crate) fn send_message(
        &self,
        csid: u32,
        stream_id: u32,
        timestamp: u32,
        message: &RtmpMessage,
    ) {
        let (message_type, payload) = message.encode();
        self.send_chunk(&RtmpChunk {
            csid,
            timestamp,
            message_type,
            stream_id,
            payload,
        });
    }

    /// Protocol control and user control messages
    pub(crate) fn send_control(&self, message: RtmpMessage) {
        self.send_message(CSID_PROTOCOL_CONTROL, 0, 0, &message);
    }

    pub(crate) fn send_command(&self, command: Command) {
        let stream_id = command.stream_id;
        self.send_message(CSID_COMMAND, stream_id, 0, &RtmpMessage::Command(command));
    }

    pub(crate) fn send_status(&self, stream_id: u32, level: &str, code: &str, description: &str) {
        self.send_command(Command::on_status(stream_id, level, code, description));
    }

    pub(crate) fn close(&self) {
        self.transport.close();
    }
}

/// Frame sink of one playing connection
pub struct ViewerSink {
    out: Outbox,
    stream_id: u32,
}

impl ViewerSink {
    pub(crate) fn new(out: Outbox, stream_id: u32) -> Self {
        Self { out, stream_id }
    }
}

impl FrameSink for ViewerSink {
    fn send_frame(&mut self, frame: &Frame) {
        let kind = frame.kind();
        self.out.send_chunk(&RtmpChunk {
            csid: kind.csid(),
            timestamp: frame.timestamp(),
            message_type: kind.message_type(),
            stream_id: self.stream_id,
            payload: frame.payload().clone(),
        });
    }

    fn close(&mut self) {
        self.out.send_status(
            self.stream_id,
            "status",
            NS_PLAY_UNPUBLISH_NOTIFY,
            "stream is now unpublished.",
        );
        self.out
            .send_control(RtmpMessage::UserControl(UserControlEvent::StreamEof(
                self.stream_id,
            )));
        self.out.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChunkDecoder;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Captured {
        writes: RefCell<Vec<Bytes>>,
        closed: Cell<bool>,
    }

    impl Transport for Captured {
        fn write(&self, data: Bytes) {
            self.writes.borrow_mut().push(data);
        }

        fn close(&self) {
            self.closed.set(true);
        }
    }

    fn decode_all(transport: &Captured) -> Vec<RtmpChunk> {
        let mut buf = BytesMut::new();
        for write in transport.writes.borrow().iter() {
            buf.extend_from_slice(write);
        }
        let mut decoder = ChunkDecoder::new();
        std::iter::from_fn(|| decoder.decode(&mut buf)).collect()
    }

    #[test]
    fn test_viewer_sink_frames_and_close() {
        let transport = Rc::new(Captured::default());
        let out = Outbox::new(transport.clone());
        let mut sink = ViewerSink::new(out.fork(), 1);

        sink.send_frame(&Frame::video(40, Bytes::from_static(&[0x17, 0x01, 0, 0, 0])));
        sink.send_frame(&Frame::audio(45, Bytes::from_static(&[0xAF, 0x01, 0x21])));
        sink.close();
        assert!(transport.closed.get());

        let chunks = decode_all(&transport);
        assert_eq!(chunks.len(), 4);
        assert_eq!(
            (chunks[0].csid, chunks[0].message_type, chunks[0].stream_id, chunks[0].timestamp),
            (CSID_VIDEO, MSG_VIDEO, 1, 40)
        );
        assert_eq!((chunks[1].csid, chunks[1].message_type), (CSID_AUDIO, MSG_AUDIO));

        let status = RtmpMessage::from_chunk(&chunks[2]).unwrap();
        let RtmpMessage::Command(cmd) = &status else {
            panic!("expected onStatus, got {status:?}");
        };
        assert_eq!(cmd.arguments[0].get_string("code"), Some(NS_PLAY_UNPUBLISH_NOTIFY));
        assert_eq!(
            RtmpMessage::from_chunk(&chunks[3]).unwrap(),
            RtmpMessage::UserControl(UserControlEvent::StreamEof(1))
        );

        // both writers count into the same total
        let total: usize = transport.writes.borrow().iter().map(Bytes::len).sum();
        assert_eq!(out.bytes_sent(), total as u64);
    }
}
