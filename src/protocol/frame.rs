use crate::error::BrokerError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size: 10MB
/// This prevents memory exhaustion from malicious or malformed clients.
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Frame format: [4 bytes length (big-endian)][payload bytes]
///
///   Read a complete frame from the stream.
///
///   Returns the payload bytes (without the length prefix).
///
/// # Errors
/// - `ConnectionClosed` if stream ends before complete frame
/// - `FrameTooLarge` if length exceeds MAX_FRAME_SIZE
/// - `InvalidProtocol` on a zero-length frame
/// - `Io` on underlying I/O errors
pub async fn read_frame<S>(stream: &mut S) -> Result<Vec<u8>, BrokerError>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(closed_on_eof)?;

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(BrokerError::FrameTooLarge(len, MAX_FRAME_SIZE));
    }

    if len == 0 {
        return Err(BrokerError::InvalidProtocol("zero-length frame".to_string()));
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.map_err(closed_on_eof)?;

    Ok(payload)
}

/// Write a complete frame to the stream.
///
/// Automatically prepends the 4-byte length prefix.
///
/// # Errors
/// - `FrameTooLarge` if payload exceeds MAX_FRAME_SIZE
/// - `Io` on underlying I/O errors
pub async fn write_frame<S>(stream: &mut S, payload: &[u8]) -> Result<(), BrokerError>
where
    S: AsyncWrite + Unpin,
{
    let len = payload.len();

    if len > MAX_FRAME_SIZE {
        return Err(BrokerError::FrameTooLarge(len, MAX_FRAME_SIZE));
    }

    let mut frame = Vec::with_capacity(4 + len);
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    frame.extend_from_slice(payload);

    // One write so a frame is never split across two partial writes
    stream.write_all(&frame).await?;
    stream.flush().await?;

    Ok(())
}

fn closed_on_eof(e: std::io::Error) -> BrokerError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        BrokerError::ConnectionClosed
    } else {
        BrokerError::Io(e)
    }
}
