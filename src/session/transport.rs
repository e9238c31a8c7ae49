//! Byte-stream seam between a session and its socket

use bytes::Bytes;

/// Outbound half of a connection
///
/// Implementations queue and return at once; a session never waits on the
/// peer. Inbound bytes reach the session through `Session::on_data`.
pub trait Transport {
    fn write(&self, data: Bytes);

    /// Flush what is queued, then shut the connection down
    fn close(&self);
}
