//! Length-prefixed JSON framing for the TCP transport.
//!
//! Every message on the wire is a length-prefixed frame:
//!
//! ```text
//! +-------------------+---------------------------+
//! | length (4 bytes)  |   payload                 |
//! | u32 little-endian |   (length bytes, JSON)    |
//! +-------------------+---------------------------+
//! ```
//!
//! The payload is one serialised [`Frame`].  The length does **not** include
//! the 4 prefix bytes themselves.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed payload size in bytes. Default: 1 MB.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1_048_576,
        }
    }
}

/// One unit of traffic on the connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Fire-and-forget message, either direction.
    Msg { name: String, payload: Value },
    /// Request expecting exactly one `Res` with the same `id`.
    Req { id: u64, name: String, payload: Value },
    /// Reply to a `Req`.  Exactly one of `ok` / `err` is set.
    Res {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ok: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        err: Option<String>,
    },
    /// Liveness probe; answered with a `Pong` carrying the same `id`.
    Ping { id: u64 },
    Pong { id: u64 },
}

/// Errors that can occur during framing operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: u32, max: u32 },

    /// The connection was closed before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("malformed frame: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read a single frame from the stream.
///
/// Returns [`FrameError::ConnectionClosed`] if the peer closes the connection
/// before the frame is complete.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Frame, FrameError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }

    let payload_len = u32::from_le_bytes(len_buf);
    if payload_len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: config.max_payload_size,
        });
    }

    let mut payload = vec![0u8; payload_len as usize];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::ConnectionClosed
        } else {
            FrameError::Io(e)
        }
    })?;

    Ok(serde_json::from_slice(&payload)?)
}

/// Write a single frame to the stream and flush it.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    frame: &Frame,
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let payload = serde_json::to_vec(frame)?;
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    if len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: config.max_payload_size,
        });
    }

    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
