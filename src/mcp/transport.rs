//! Frame transports.
//!
//! A [`Connection`] is one full-duplex link carrying opaque frames. The
//! session layer never sees sockets; it only sends and receives frames.
//!
//! - Frames sent by one side arrive at the other in send order
//! - Nothing is guaranteed about ordering between the two directions
//! - Once the peer closes, [`Connection::receive`] yields `None` for good
//!
//! # Stream framing
//!
//! Byte streams (TCP, stdio) carry newline-delimited frames:
//!
//! - Frames must not contain embedded newlines
//! - A trailing `\r` is stripped, so `\r\n` endings are accepted
//! - Blank lines are skipped
//!
//! Reading and writing run as separate tasks so a slow writer never stalls
//! the receive side.
//!
//! HTTP with server-sent events lives in [`sse`](crate::mcp::sse).

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::mcp::error::TransportError;

/// One encoded envelope, without its line terminator.
pub type Frame = Vec<u8>;

/// Frames buffered per direction before senders wait.
pub(crate) const CHANNEL_CAPACITY: usize = 64;

/// The sending half of a connection. Cheap to clone; the link closes for
/// the peer once every clone has been dropped.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Frame>,
}

impl FrameSender {
    /// Queues a frame for delivery.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` if the link is gone.
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }
}

/// The receiving half of a connection.
#[derive(Debug)]
pub struct FrameReceiver {
    rx: mpsc::Receiver<Frame>,
}

impl FrameReceiver {
    /// Waits for the next frame. Returns `None` once the peer has closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

/// A full-duplex frame link.
#[derive(Debug)]
pub struct Connection {
    id: Uuid,
    peer: String,
    sender: FrameSender,
    receiver: FrameReceiver,
}

impl Connection {
    /// Builds a connection from an outgoing and an incoming frame channel.
    pub(crate) fn from_channels(
        peer: impl Into<String>,
        tx: mpsc::Sender<Frame>,
        rx: mpsc::Receiver<Frame>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer: peer.into(),
            sender: FrameSender { tx },
            receiver: FrameReceiver { rx },
        }
    }

    /// Creates two in-memory connections wired to each other.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (b_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self::from_channels("memory", a_tx, a_rx),
            Self::from_channels("memory", b_tx, b_rx),
        )
    }

    /// Wraps a byte stream with newline framing.
    ///
    /// Spawns a reader task and a writer task on the current runtime. The
    /// writer shuts the stream down once every sender has been dropped.
    pub fn from_stream<R, W>(reader: R, writer: W, peer: impl Into<String>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let connection = Self::from_channels(peer, out_tx, in_rx);

        tokio::spawn(read_frames(reader, in_tx, connection.id));
        tokio::spawn(write_frames(writer, out_rx, connection.id));

        tracing::debug!(connection = %connection.id, peer = %connection.peer, "Connection opened");
        connection
    }

    /// Unique id used to correlate log lines.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Human-readable peer label.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Sends a frame.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` if the link is gone.
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.sender.send(frame).await
    }

    /// Waits for the next frame. Returns `None` once the peer has closed.
    pub async fn receive(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    /// Splits the connection into its two halves.
    #[must_use]
    pub fn split(self) -> (FrameSender, FrameReceiver) {
        (self.sender, self.receiver)
    }
}

async fn read_frames<R>(reader: R, frames: mpsc::Sender<Frame>, connection: Uuid)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => {
                tracing::debug!(connection = %connection, "Peer closed the stream");
                break;
            }
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                }
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                if frames.send(line.clone()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(connection = %connection, error = %e, "Read failed");
                break;
            }
        }
    }
}

async fn write_frames<W>(mut writer: W, mut frames: mpsc::Receiver<Frame>, connection: Uuid)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        debug_assert!(
            !frame.contains(&b'\n'),
            "frame must not contain embedded newlines"
        );

        let written = async {
            writer.write_all(&frame).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            tracing::warn!(connection = %connection, error = %e, "Write failed");
            return;
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::debug!(connection = %connection, error = %e, "Shutdown failed");
    }
}

/// Dials a TCP server.
///
/// # Errors
///
/// Returns an error if the address cannot be resolved or reached.
pub async fn connect(addr: impl ToSocketAddrs) -> Result<Connection, TransportError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let peer = stream.peer_addr()?;
    let (reader, writer) = stream.into_split();
    Ok(Connection::from_stream(reader, writer, peer.to_string()))
}

/// A single connection over the process's stdin and stdout.
#[must_use]
pub fn stdio() -> Connection {
    Connection::from_stream(tokio::io::stdin(), tokio::io::stdout(), "stdio")
}

/// A source of incoming connections.
#[async_trait]
pub trait Accept: Send + Sync {
    /// Waits for the next peer.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting fails. The caller may retry.
    async fn accept(&self) -> Result<Connection, TransportError>;
}

/// Accepts TCP connections.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Binds to `addr`. Port `0` picks a free port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        Ok(Self {
            inner: TcpListener::bind(addr).await?,
        })
    }

    /// Returns the address actually bound.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.inner.local_addr()?)
    }
}

#[async_trait]
impl Accept for Listener {
    async fn accept(&self) -> Result<Connection, TransportError> {
        let (stream, peer) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Connection::from_stream(reader, writer, peer.to_string()))
    }
}
