//! RTMP server listener
//!
//! Handles the TCP accept loop and runs one task per connection. All tasks
//! live on a single thread inside a [`LocalSet`] and share one registry.

use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::LocalSet;

use crate::error::Result;
use crate::registry::{SharedRegistry, StreamRegistry};
use crate::server::config::ServerConfig;
use crate::server::transport::{write_loop, ChannelTransport};
use crate::session::{AllowAll, Authorizer, Session, Transport};

/// RTMP server
pub struct RtmpServer {
    config: ServerConfig,
    registry: SharedRegistry,
    authorizer: Rc<dyn Authorizer>,
    next_session_id: Cell<u64>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl RtmpServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        let registry = StreamRegistry::with_config(config.registry.clone()).into_shared();
        Self::with_registry(config, registry)
    }

    /// Create a server around an existing registry
    pub fn with_registry(config: ServerConfig, registry: SharedRegistry) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            registry,
            authorizer: Rc::new(AllowAll),
            next_session_id: Cell::new(1),
            connection_semaphore,
        }
    }

    /// Replace the publish/play policy
    pub fn with_authorizer(mut self, authorizer: impl Authorizer + 'static) -> Self {
        self.authorizer = Rc::new(authorizer);
        self
    }

    /// Get a reference to the stream registry
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "RTMP server listening");
        Ok(listener)
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = self.bind().await?;
        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.serve(listener) => result,
        }
    }

    /// Accept connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        LocalSet::new().run_until(self.accept_loop(&listener)).await
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let session_id = self.next_session_id.get();
        self.next_session_id.set(session_id + 1);

        tracing::info!(session_id = session_id, peer = %peer_addr, "New connection");

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let (transport, receiver) = ChannelTransport::new();
        let session = Session::new(
            session_id,
            self.config.session_config(),
            Rc::new(transport.clone()),
            Rc::clone(&self.registry),
            Rc::clone(&self.authorizer),
        )
        .with_peer_addr(peer_addr);
        let read_buffer_size = self.config.read_buffer_size;

        tokio::task::spawn_local(async move {
            let (reader, writer) = socket.into_split();
            let writer_task = tokio::task::spawn_local(write_loop(writer, receiver));

            let connection = Connection {
                session,
                transport,
                _permit: permit,
            };
            connection.run(reader, read_buffer_size).await;

            match writer_task.await {
                Ok(Err(e)) => {
                    tracing::error!(session_id = session_id, error = %e, "Write failed")
                }
                Err(e) => {
                    tracing::error!(session_id = session_id, error = %e, "Writer task failed")
                }
                Ok(Ok(_)) => {}
            }
            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }
}

/// One accepted socket and its session
struct Connection {
    session: Session,
    transport: ChannelTransport,
    /// Held for the connection's lifetime
    _permit: Option<OwnedSemaphorePermit>,
}

impl Connection {
    async fn run(mut self, mut reader: OwnedReadHalf, read_buffer_size: usize) {
        let session_id = self.session.id();
        if let Err(e) = self.read_loop(&mut reader, read_buffer_size).await {
            tracing::debug!(session_id = session_id, error = %e, "Connection error");
        }

        self.session.on_close();
        tracing::info!(
            session_id = session_id,
            stats = ?self.session.stats(),
            "Connection finished"
        );
        self.transport.close();
    }

    async fn read_loop(&mut self, reader: &mut OwnedReadHalf, read_buffer_size: usize) -> Result<()> {
        let mut buf = vec![0u8; read_buffer_size];
        let mut decision: Option<oneshot::Receiver<bool>> = None;

        loop {
            if decision.is_none() {
                decision = self.session.take_pending_auth();
            }

            tokio::select! {
                allowed = wait_decision(&mut decision) => {
                    decision = None;
                    self.session.resolve_auth(allowed)?;
                }
                read = reader.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(());
                    }
                    self.session.on_data(&buf[..n])?;
                }
                _ = self.transport.closed() => {
                    // the registry closed this viewer
                    return Ok(());
                }
            }
        }
    }
}

/// Wait for an authorization decision; never resolves without one
///
/// A dropped sender counts as a denial.
async fn wait_decision(decision: &mut Option<oneshot::Receiver<bool>>) -> bool {
    match decision {
        Some(receiver) => receiver.await.unwrap_or(false),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;
    use crate::protocol::{ChunkDecoder, ChunkEncoder, ConnectParams, RtmpChunk, RtmpMessage};
    use bytes::BytesMut;
    use tokio::io::AsyncWriteExt;

    async fn connect_client(addr: SocketAddr) -> Vec<RtmpMessage> {
        let mut socket = TcpStream::connect(addr).await.unwrap();

        let mut hello = vec![RTMP_VERSION];
        hello.extend_from_slice(&[0u8; HANDSHAKE_SIZE * 2]);
        socket.write_all(&hello).await.unwrap();

        let mut response = vec![0u8; 1 + HANDSHAKE_SIZE * 2];
        socket.read_exact(&mut response).await.unwrap();
        assert_eq!(response[0], RTMP_VERSION);

        let command = ConnectParams {
            app: "live".into(),
            ..Default::default()
        }
        .to_command(1.0);
        let (message_type, payload) = RtmpMessage::Command(command).encode();
        let mut buf = BytesMut::new();
        ChunkEncoder::new().encode(
            &RtmpChunk {
                csid: CSID_COMMAND,
                timestamp: 0,
                message_type,
                stream_id: 0,
                payload,
            },
            &mut buf,
        );
        socket.write_all(&buf).await.unwrap();

        let mut decoder = ChunkDecoder::new();
        let mut inbound = BytesMut::new();
        let mut messages = Vec::new();
        while messages.len() < 4 {
            let mut read = [0u8; 4096];
            let n = socket.read(&mut read).await.unwrap();
            assert!(n > 0, "server closed early");
            inbound.extend_from_slice(&read[..n]);
            while let Some(chunk) = decoder.decode(&mut inbound) {
                let message = RtmpMessage::from_chunk(&chunk).unwrap();
                if let RtmpMessage::SetChunkSize(size) = message {
                    decoder.set_chunk_size(size).unwrap();
                }
                messages.push(message);
            }
        }
        messages
    }

    #[tokio::test]
    async fn test_connect_over_tcp() {
        let config = ServerConfig::default().bind("127.0.0.1:0".parse().unwrap());
        let server = RtmpServer::new(config);
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();

        let messages = tokio::select! {
            result = server.serve(listener) => panic!("server stopped: {result:?}"),
            messages = connect_client(addr) => messages,
        };

        assert_eq!(messages[0], RtmpMessage::WindowAckSize(DEFAULT_WINDOW_ACK_SIZE));
        assert_eq!(messages[2], RtmpMessage::SetChunkSize(DEFAULT_OUT_CHUNK_SIZE));
        let RtmpMessage::Command(result) = &messages[3] else {
            panic!("expected _result, got {:?}", messages[3]);
        };
        assert_eq!(result.name, CMD_RESULT);
        assert_eq!(result.arguments[0].get_string("code"), Some(NC_CONNECT_SUCCESS));
    }

    #[tokio::test]
    async fn test_wait_decision() {
        let (tx, rx) = oneshot::channel();
        tx.send(true).unwrap();
        assert!(wait_decision(&mut Some(rx)).await);

        let (tx, rx) = oneshot::channel::<bool>();
        drop(tx);
        assert!(!wait_decision(&mut Some(rx)).await);
    }
}
