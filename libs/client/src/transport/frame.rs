//! Length-prefixed framing
//!
//! Every frame starts with its size as a MessagePack unsigned integer. We
//! always write the 5-byte `uint32` form and accept any unsigned form on read.

use std::time::Duration;

use rmp::Marker;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result, TimeoutKind};

/// Frames above this size are rejected (100 MiB).
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

fn eof_as_closed(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        e.into()
    }
}

/// Write one frame: size prefix followed by `bytes`.
pub async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = u32::try_from(bytes.len())
        .ok()
        .filter(|&len| len as usize <= MAX_FRAME_SIZE)
        .ok_or_else(|| Error::InvalidFrame(format!("Message too large: {} bytes", bytes.len())))?;

    let mut prefix = [0u8; 5];
    prefix[0] = Marker::U32.to_u8();
    prefix[1..].copy_from_slice(&len.to_be_bytes());

    writer.write_all(&prefix).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and return its body without the size prefix.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let marker = reader.read_u8().await.map_err(eof_as_closed)?;
    let len = match Marker::from_u8(marker) {
        Marker::FixPos(n) => u64::from(n),
        Marker::U8 => u64::from(reader.read_u8().await.map_err(eof_as_closed)?),
        Marker::U16 => u64::from(reader.read_u16().await.map_err(eof_as_closed)?),
        Marker::U32 => u64::from(reader.read_u32().await.map_err(eof_as_closed)?),
        Marker::U64 => reader.read_u64().await.map_err(eof_as_closed)?,
        other => {
            return Err(Error::InvalidFrame(format!(
                "Size prefix has marker {other:?}"
            )))
        }
    };

    // Validate length (max 100MB to prevent DOS)
    if len > MAX_FRAME_SIZE as u64 {
        return Err(Error::InvalidFrame(format!(
            "Message too large: {len} bytes"
        )));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await.map_err(eof_as_closed)?;
    Ok(buf)
}

/// Read half of a connection.
pub struct FrameReader {
    inner: Box<dyn AsyncRead + Send + Sync + Unpin>,
    timeout: Option<Duration>,
}

impl FrameReader {
    pub fn new(inner: Box<dyn AsyncRead + Send + Sync + Unpin>, timeout: Option<Duration>) -> Self {
        Self { inner, timeout }
    }

    /// Drop the read timeout, for a reader that idles between responses
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        let receive_op = read_frame(&mut self.inner);

        if let Some(timeout) = self.timeout {
            tokio::time::timeout(timeout, receive_op)
                .await
                .map_err(|_| Error::Timeout(TimeoutKind::Read))?
        } else {
            receive_op.await
        }
    }

    /// Read exactly `buf.len()` raw bytes, used for the greeting.
    pub(crate) async fn read_raw(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf).await.map_err(eof_as_closed)?;
        Ok(())
    }
}

/// Write half of a connection.
pub struct FrameWriter {
    inner: Box<dyn AsyncWrite + Send + Sync + Unpin>,
    timeout: Option<Duration>,
}

impl FrameWriter {
    pub fn new(inner: Box<dyn AsyncWrite + Send + Sync + Unpin>, timeout: Option<Duration>) -> Self {
        Self { inner, timeout }
    }

    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let send_op = write_frame(&mut self.inner, bytes);

        if let Some(timeout) = self.timeout {
            tokio::time::timeout(timeout, send_op)
                .await
                .map_err(|_| Error::Timeout(TimeoutKind::Write))?
        } else {
            send_op.await
        }
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
