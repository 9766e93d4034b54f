// TCP Transport Implementation
// Newline-delimited JSON envelopes over TCP: one request per connection,
// the reply comes back on the same socket

use crate::peer::{PeerEndpoint, PeerId};
use crate::protocol::{decode, encode, Message, ProtocolError};
use crate::transport::{InboundHandler, TransportAdapter, TransportError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Weak;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

// ============================================================================
// TCP TRANSPORT CONFIG
// ============================================================================

/// Configuration for the TCP adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpTransportConfig {
    /// Where each peer listens
    pub endpoints: BTreeMap<PeerId, PeerEndpoint>,
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// Largest envelope accepted, in bytes
    pub max_frame_bytes: usize,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            endpoints: PeerId::ALL
                .iter()
                .map(|p| (*p, PeerEndpoint::default_for(*p)))
                .collect(),
            nodelay: true,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

impl TcpTransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, peer: PeerId, endpoint: PeerEndpoint) -> Self {
        self.endpoints.insert(peer, endpoint);
        self
    }

    pub fn with_endpoints(mut self, endpoints: BTreeMap<PeerId, PeerEndpoint>) -> Self {
        self.endpoints.extend(endpoints);
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self
    }
}

// ============================================================================
// FRAMING
// ============================================================================

async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<(), TransportError>
where
    W: AsyncWriteExt + Unpin,
{
    let mut frame = encode(message)?;
    frame.push(b'\n');
    writer
        .write_all(&frame)
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))
}

/// Read one line; `Ok(None)` on a clean close
///
/// At most `limit + 1` bytes are pulled off the socket, so an unterminated
/// line is rejected without buffering the rest of it.
async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(limit as u64 + 1)
        .read_until(b'\n', &mut line)
        .await
        .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
    if read == 0 {
        return Ok(None);
    }
    if line.len() > limit {
        return Err(TransportError::ReceiveFailed(format!(
            "frame of {} bytes exceeds limit",
            line.len()
        )));
    }
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    Ok(Some(line))
}

// ============================================================================
// TCP TRANSPORT
// ============================================================================

/// Outbound TCP adapter
#[derive(Debug, Clone)]
pub struct TcpTransport {
    config: TcpTransportConfig,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TcpTransportConfig {
        &self.config
    }

    fn address_of(&self, peer: PeerId) -> Result<String, TransportError> {
        self.config
            .endpoints
            .get(&peer)
            .and_then(PeerEndpoint::socket_addr)
            .ok_or(TransportError::UnsupportedEndpoint(peer))
    }

    async fn exchange(&self, addr: &str, message: &Message) -> Result<Message, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        stream.set_nodelay(self.config.nodelay).ok();

        let (reader, mut writer) = stream.into_split();
        write_frame(&mut writer, message).await?;

        let mut reader = BufReader::new(reader);
        let frame = read_frame(&mut reader, self.config.max_frame_bytes)
            .await?
            .ok_or(TransportError::NoResponse)?;
        Ok(decode(&frame)?)
    }
}

#[async_trait]
impl TransportAdapter for TcpTransport {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn try_send(
        &self,
        peer: PeerId,
        message: &Message,
        limit: Duration,
    ) -> Result<Message, TransportError> {
        let addr = self.address_of(peer)?;
        timeout(limit, self.exchange(&addr, message))
            .await
            .map_err(|_| TransportError::Timeout)?
    }
}

// ============================================================================
// TCP LISTENER
// ============================================================================

/// Accept loop feeding inbound envelopes to a node's handler
///
/// Aborts its task when dropped.
pub struct TcpServer {
    local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TcpServer {
    /// Bind `addr` and start serving
    pub async fn bind(
        addr: &str,
        handler: Weak<dyn InboundHandler>,
        max_frame_bytes: usize,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Self::serve(listener, handler, max_frame_bytes)
    }

    /// Serve an already bound listener
    pub fn serve(
        listener: TcpListener,
        handler: Weak<dyn InboundHandler>,
        max_frame_bytes: usize,
    ) -> Result<Self, TransportError> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "TCP listener started");

        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, handler, max_frame_bytes).await {
                                debug!(remote = %remote, error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed, stopping listener");
                        break;
                    }
                }
            }
        });

        Ok(Self { local_addr, handle })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Endpoint other nodes can use to reach this listener
    pub fn endpoint(&self) -> PeerEndpoint {
        PeerEndpoint::tcp(&self.local_addr.ip().to_string(), self.local_addr.port())
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Answer each line on one connection; closes once a message gets no reply
async fn serve_connection(
    stream: TcpStream,
    handler: Weak<dyn InboundHandler>,
    max_frame_bytes: usize,
) -> Result<(), TransportError> {
    stream.set_nodelay(true).ok();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    while let Some(frame) = read_frame(&mut reader, max_frame_bytes).await? {
        if frame.is_empty() {
            continue;
        }
        let message = match decode(&frame) {
            Ok(message) => message,
            Err(ProtocolError::UnknownKind(kind)) => {
                warn!(kind = %kind, "Ignoring message of unknown kind");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                break;
            }
        };

        let Some(handler) = handler.upgrade() else {
            debug!("Node gone, closing connection");
            break;
        };
        match handler.on_message(message).await {
            Some(reply) => write_frame(&mut writer, &reply).await?,
            None => break,
        }
    }

    Ok(())
}
