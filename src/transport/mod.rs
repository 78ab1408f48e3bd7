//! Mock Peer Transport
//!
//! Owns the single connection to the client under test. Reads are
//! bounded by a per-step deadline applied to the underlying read itself,
//! so a stuck step suspends on the socket instead of polling and can
//! never outlive its deadline.

use std::fmt;
use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tracing::trace;

/// Transport errors
#[derive(Debug)]
pub enum TransportError {
    /// Deadline passed with fewer than `wanted` bytes buffered
    Timeout { wanted: usize, buffered: usize },
    /// Peer closed the connection
    Closed { buffered: usize },
    Io(io::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout { wanted, buffered } => write!(
                f,
                "timed out waiting for {} bytes ({} buffered)",
                wanted, buffered
            ),
            TransportError::Closed { buffered } => {
                write!(f, "connection closed by peer ({} bytes buffered)", buffered)
            }
            TransportError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e)
    }
}

/// Configure an accepted TCP stream
///
/// Scripted replies are tiny and latency-sensitive, so Nagle is disabled.
pub fn configure_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)
}

/// Buffered, deadline-bounded wrapper around one connection
pub struct PeerTransport<S> {
    stream: S,
    read_buf: BytesMut,
}

impl<S> PeerTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
        }
    }

    /// Bytes received but not yet handed out
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }

    /// Return exactly `n` bytes, or fail once `deadline` passes
    ///
    /// Bytes that arrive early stay buffered for the next call; a partial
    /// read below `n` keeps waiting on the socket until the deadline.
    pub async fn read_exact_or_timeout(
        &mut self,
        n: usize,
        deadline: Instant,
    ) -> Result<Bytes, TransportError> {
        while self.read_buf.len() < n {
            match timeout_at(deadline, self.stream.read_buf(&mut self.read_buf)).await {
                Err(_) => {
                    return Err(TransportError::Timeout {
                        wanted: n,
                        buffered: self.read_buf.len(),
                    })
                }
                Ok(Ok(0)) => {
                    return Err(TransportError::Closed {
                        buffered: self.read_buf.len(),
                    })
                }
                Ok(Ok(read)) => trace!("read {} bytes ({} buffered)", read, self.read_buf.len()),
                Ok(Err(e)) => return Err(TransportError::Io(e)),
            }
        }

        Ok(self.read_buf.split_to(n).freeze())
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Close the connection, consuming the transport
    pub async fn shutdown(mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
