//! Byte-stream connection to a VM.
//!
//! The session core is transport-agnostic: a connection is one readable half,
//! one writable half, and a human-readable description. TCP is the common
//! transport; tests use an in-memory duplex pipe.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

use crate::transport::{FrameReader, FrameWriter};

pub type ConnectionReader = FrameReader<Box<dyn AsyncRead + Send + Unpin>>;
pub type ConnectionWriter = FrameWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// A duplex byte-stream connection to a VM.
pub struct Connection {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    description: String,
}

impl Connection {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        description: impl Into<String>,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            description: description.into(),
        }
    }

    /// Connect to a VM listening on a TCP address.
    pub async fn connect_tcp(addr: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        Ok(Self::from_tcp(stream))
    }

    /// Wrap an established TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        let description = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "tcp".to_string());
        let (read_half, write_half) = stream.into_split();
        Self::new(read_half, write_half, description)
    }

    /// Create an in-memory connection pair: the client side and the raw
    /// stream a fake VM drives.
    pub fn in_memory(max_buf_size: usize) -> (Self, DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(max_buf_size);
        let (read_half, write_half) = tokio::io::split(ours);
        (Self::new(read_half, write_half, "in-memory"), theirs)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Split into framed halves for the session driver.
    pub fn into_parts(self) -> (ConnectionReader, ConnectionWriter, String) {
        (
            FrameReader::new(self.reader),
            FrameWriter::new(self.writer),
            self.description,
        )
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("description", &self.description)
            .finish()
    }
}
