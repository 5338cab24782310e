//! Length-prefixed framing over an async byte stream.
//!
//! Wire format:
//!
//! ```text
//! +----------------+---------------------+
//! | Length         | Payload             |
//! | 4 bytes (BE32) | `Length` bytes      |
//! +----------------+---------------------+
//! ```
//!
//! The payload is opaque at this layer. Both directions enforce
//! [`MAX_FRAME_BYTES`](crate::core::MAX_FRAME_BYTES) so a corrupt or
//! malicious length prefix cannot trigger an unbounded allocation.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::{FRAME_HEADER_SIZE, MAX_FRAME_BYTES};

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "frame payload of {} bytes exceeds the {} byte limit",
                payload.len(),
                MAX_FRAME_BYTES
            ),
        ));
    }

    let header = (payload.len() as u32).to_be_bytes();
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Read one complete frame payload.
///
/// Returns `UnexpectedEof` when the stream ends mid-frame; a clean EOF on
/// the frame boundary also surfaces as `UnexpectedEof` from the header read.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    reader.read_exact(&mut header).await?;

    let length = u32::from_be_bytes(header) as usize;
    if length > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {length} exceeds the {MAX_FRAME_BYTES} byte limit"),
        ));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}
