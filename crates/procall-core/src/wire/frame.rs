//! Transport-level framing.
//!
//! Every message is length-prefixed so the receiver knows how many bytes to
//! buffer before decoding:
//!
//! ```text
//! [u32 LE: len][payload of len bytes]
//! ```

use crate::config::WireConfig;
use crate::{ProcallError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed the connection between frames).
/// EOF in the middle of a frame is `Malformed`.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProcallError::malformed("connection closed inside frame header"));
        }
        filled += n;
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > WireConfig::MAX_FRAME_SIZE {
        return Err(ProcallError::FrameTooLarge {
            size: len,
            max: WireConfig::MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload).await {
        Ok(_) => Ok(Some(payload)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ProcallError::malformed(
            format!("connection closed inside {} byte frame", len),
        )),
        Err(e) => Err(e.into()),
    }
}

/// Write a length-prefixed frame to an async writer and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > WireConfig::MAX_FRAME_SIZE {
        return Err(ProcallError::FrameTooLarge {
            size: payload.len(),
            max: WireConfig::MAX_FRAME_SIZE,
        });
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
