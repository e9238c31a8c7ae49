//! Socket-backed transport
//!
//! Sessions write into an unbounded channel; a writer task owned by the
//! connection drains it into the socket. Writes never wait on a slow peer.

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::session::Transport;

/// What the writer task is asked to do
#[derive(Debug)]
pub enum Outbound {
    Data(Bytes),
    /// Flush and shut the socket down
    Close,
}

/// [`Transport`] over a writer task's channel
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: UnboundedSender<Outbound>,
}

impl ChannelTransport {
    pub fn new() -> (Self, UnboundedReceiver<Outbound>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }

    /// True once the writer task is gone
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Resolves when the writer task is gone
    pub async fn closed(&self) {
        self.sender.closed().await
    }
}

impl Transport for ChannelTransport {
    fn write(&self, data: Bytes) {
        // a gone writer means the connection is already being torn down
        let _ = self.sender.send(Outbound::Data(data));
    }

    fn close(&self) {
        let _ = self.sender.send(Outbound::Close);
    }
}

/// Drain `receiver` into `writer` until closed
///
/// Returns the number of bytes written.
pub async fn write_loop<W>(
    mut writer: W,
    mut receiver: UnboundedReceiver<Outbound>,
) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(outbound) = receiver.recv().await {
        match outbound {
            Outbound::Data(data) => {
                writer.write_all(&data).await?;
                written += data.len() as u64;
            }
            Outbound::Close => break,
        }
    }
    writer.flush().await?;
    writer.shutdown().await?;
    Ok(written)
}
