//! Wire codecs for the broker families spoken directly over TCP.
//!
//! Each submodule encodes requests into `Bytes` and decodes responses from
//! complete frames. Socket handling lives with the peers; the only I/O here is
//! the length-prefixed frame reader used by NSQ.

pub mod nsq;
pub mod rethinkdb;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest frame accepted from a broker before allocation.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame truncated: needed {needed} bytes, had {available}")]
    Truncated { needed: usize, available: usize },
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("broker error: {0}")]
    Broker(String),
    #[error("connection closed by broker")]
    Closed,
}

/// Read one big-endian `i32` size-prefixed frame, returning the frame body.
pub async fn read_sized_frame<R>(reader: &mut R, scratch: &mut BytesMut) -> Result<Bytes, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::Closed);
        }
        Err(e) => return Err(e.into()),
    }

    let length = i32::from_be_bytes(header);
    let length = usize::try_from(length)
        .map_err(|_| ProtocolError::Malformed(format!("negative frame length {length}")))?;
    if length > MAX_FRAME_BYTES {
        return Err(ProtocolError::Malformed(format!(
            "frame too large: {length} bytes (cap {MAX_FRAME_BYTES})"
        )));
    }

    scratch.clear();
    scratch.resize(length, 0u8);
    reader.read_exact(&mut scratch[..]).await?;
    Ok(scratch.split().freeze())
}

/// Bounds-checked big-endian reader over a received frame.
pub struct FrameReader {
    buf: Bytes,
}

impl FrameReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, needed: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::Truncated {
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn i8(&mut self) -> Result<i8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn i16(&mut self) -> Result<i16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn i32(&mut self) -> Result<i32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn i64(&mut self) -> Result<i64, ProtocolError> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    /// Split off the next `len` bytes without copying.
    pub fn take(&mut self, len: usize) -> Result<Bytes, ProtocolError> {
        self.need(len)?;
        Ok(self.buf.split_to(len))
    }

    /// Whatever has not been read yet.
    pub fn rest(&mut self) -> Bytes {
        std::mem::take(&mut self.buf)
    }
}
