//! Length-prefixed binary frame transport.
//!
//! Every message on the debug connection is a frame: a 4-byte big-endian
//! payload length, a 1-byte opcode, and the payload bytes. The decoder is a
//! restart-free sequence over the inbound stream; it ends on connection
//! close or the first malformed frame.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::WireError;

/// Bytes in a frame header (length + opcode).
pub const HEADER_LEN: usize = 5;

/// Upper bound on a single frame payload. Lengths above this are treated as
/// a corrupted stream rather than an allocation request.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// A decoded wire frame: opcode plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

/// Encode a frame into its wire representation.
pub fn encode_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.push(opcode);
    buf.extend_from_slice(payload);
    buf
}

/// Decode one frame from a byte buffer.
///
/// Returns the frame and the number of bytes consumed, or `None` if the
/// buffer does not yet contain a complete frame.
pub fn decode_frame(data: &[u8]) -> Result<Option<(Frame, usize)>, WireError> {
    if data.len() < HEADER_LEN {
        return Ok(None);
    }
    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if length > MAX_PAYLOAD_LEN {
        return Err(WireError::InvalidPayload(format!(
            "frame length {length} exceeds limit"
        )));
    }
    let total = HEADER_LEN + length;
    if data.len() < total {
        return Ok(None);
    }
    Ok(Some((
        Frame {
            opcode: data[4],
            payload: data[HEADER_LEN..total].to_vec(),
        },
        total,
    )))
}

/// Reads frames from the inbound half of a connection.
///
/// Exactly one reader may consume a connection's inbound stream. Partially
/// received frames are buffered internally, so a `next_frame` future may be
/// dropped (e.g. by a read timeout) without corrupting the stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on a clean end of stream at a frame boundary. A
    /// stream ending mid-frame is `WireError::Closed`.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, WireError> {
        loop {
            if let Some((frame, consumed)) = decode_frame(&self.buf)? {
                self.buf.drain(..consumed);
                return Ok(Some(frame));
            }
            let mut chunk = [0u8; 4096];
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(WireError::Closed);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Writes frames to the outbound half of a connection.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one frame and flush it.
    pub async fn write_frame(&mut self, opcode: u8, payload: &[u8]) -> Result<(), WireError> {
        self.write_encoded(&encode_frame(opcode, payload)).await
    }

    /// Write pre-encoded frame bytes and flush them.
    pub async fn write_encoded(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.inner.write_all(bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the outbound half, signalling end of stream to the peer.
    pub async fn shutdown(&mut self) -> Result<(), WireError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
