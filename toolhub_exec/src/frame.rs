//! Length-prefixed framing for the worker wire protocol.
//!
//! Each message is a 4-byte big-endian unsigned length followed by exactly
//! that many payload bytes, symmetric for requests and responses. A worker
//! program reads one frame, processes it, and writes one frame back per
//! cycle, persisting between cycles until torn down.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Writes one frame: the payload length as 4 big-endian bytes, then the
/// payload. A zero-length payload is a valid frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = u32::try_from(payload.len()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "payload exceeds the u32 frame length limit",
        )
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    writer.flush().await
}

/// Reads one frame and returns its payload.
///
/// A short read on the length prefix or the payload fails with
/// [`std::io::ErrorKind::UnexpectedEof`]; a truncated frame is never
/// returned as data.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    if len > 0 {
        reader.read_exact(&mut payload).await?;
    }
    Ok(payload)
}
