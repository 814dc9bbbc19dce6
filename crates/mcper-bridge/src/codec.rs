//! Length-prefixed framing.
//!
//! ```text
//! ┌──────────────────────────────┬────────────────────────┐
//! │ 4 bytes: u32 little-endian   │ N bytes: JSON payload  │
//! └──────────────────────────────┴────────────────────────┘
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::error::{BridgeError, BridgeResult};

/// Default upper bound for a single frame (64 MiB).
pub const DEFAULT_MAX_FRAME: usize = 64 * 1024 * 1024;

const LENGTH_PREFIX: usize = 4;

/// Write one frame: length prefix, payload, flush.
///
/// # Errors
///
/// Returns [`BridgeError::FrameTooLarge`] without writing anything if the
/// payload exceeds `max`, or an I/O error.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max: usize) -> BridgeResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let too_large = || BridgeError::FrameTooLarge {
        size: payload.len(),
        max,
    };
    if payload.len() > max {
        return Err(too_large());
    }
    let len = u32::try_from(payload.len()).map_err(|_| too_large())?;

    let mut frame = Vec::with_capacity(payload.len().saturating_add(LENGTH_PREFIX));
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream.
///
/// An oversized declared length is drained from the stream before
/// [`BridgeError::FrameTooLarge`] is returned, so the next read starts at a
/// frame boundary.
///
/// # Errors
///
/// Returns [`BridgeError::FrameTooLarge`], [`BridgeError::TruncatedFrame`]
/// when the stream ends mid-frame, or an I/O error.
pub async fn read_frame<R>(reader: &mut R, max: usize) -> BridgeResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; LENGTH_PREFIX];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let declared = u32::from_le_bytes(len_buf);
    let size = usize::try_from(declared).unwrap_or(usize::MAX);
    if size > max {
        warn!(size, max, "rejecting oversized bridge frame");
        let drained = tokio::io::copy(&mut reader.take(u64::from(declared)), &mut tokio::io::sink())
            .await?;
        if drained < u64::from(declared) {
            return Err(BridgeError::TruncatedFrame);
        }
        return Err(BridgeError::FrameTooLarge { size, max });
    }

    let mut payload = vec![0u8; size];
    match reader.read_exact(&mut payload).await {
        Ok(_) => Ok(Some(payload)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(BridgeError::TruncatedFrame),
        Err(e) => Err(e.into()),
    }
}

/// Serialize `message` as JSON and write it as one frame.
///
/// # Errors
///
/// See [`write_frame`]; also fails if `message` cannot be serialized.
pub async fn write_message<W, T>(writer: &mut W, message: &T, max: usize) -> BridgeResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize + ?Sized,
{
    let payload = serde_json::to_vec(message)?;
    write_frame(writer, &payload, max).await
}

/// Read one frame and deserialize it. Returns `Ok(None)` on a clean end of
/// stream.
///
/// # Errors
///
/// See [`read_frame`]; also fails with [`BridgeError::InvalidMessage`].
pub async fn read_message<R, T>(reader: &mut R, max: usize) -> BridgeResult<Option<T>>
where
    R: AsyncRead + Unpin + ?Sized,
    T: DeserializeOwned,
{
    match read_frame(reader, max).await? {
        Some(payload) => Ok(Some(serde_json::from_slice(&payload)?)),
        None => Ok(None),
    }
}
