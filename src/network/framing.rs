//! Length-prefixed message framing
//!
//! Every frame is a 4-byte big-endian payload length followed by the payload.
//! These functions work on any tokio stream; [`Connection`](super::Connection)
//! adds timeouts, cancellation and state tracking on top.

use crate::error::{NetworkError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix in bytes
pub const FRAME_HEADER_LEN: usize = 4;

/// Write one frame (length prefix + payload) and flush
///
/// Oversized payloads are rejected before anything is written.
pub async fn write_frame<W>(stream: &mut W, payload: &[u8], max_frame_size: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > max_frame_size || payload.len() > u32::MAX as usize {
        return Err(NetworkError::PayloadTooLarge {
            size: payload.len(),
            max: max_frame_size,
        }
        .into());
    }

    let len = payload.len() as u32;
    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| NetworkError::TransportFailure {
            reason: format!("Failed to write length prefix: {}", e),
        })?;

    stream
        .write_all(payload)
        .await
        .map_err(|e| NetworkError::TransportFailure {
            reason: format!("Failed to write payload: {}", e),
        })?;

    stream.flush().await.map_err(|e| NetworkError::TransportFailure {
        reason: format!("Failed to flush: {}", e),
    })?;

    Ok(())
}

/// Read one frame, reassembling it across as many reads as it takes
///
/// End of stream before the first header byte means the peer closed the
/// connection cleanly; end of stream anywhere inside a frame is malformed.
pub async fn read_frame<R>(stream: &mut R, max_frame_size: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        let n = stream
            .read(&mut header[filled..])
            .await
            .map_err(read_failure)?;
        if n == 0 {
            if filled == 0 {
                return Err(NetworkError::ConnectionClosed.into());
            }
            return Err(NetworkError::Malformed {
                reason: format!("stream ended after {} of {} header bytes", filled, FRAME_HEADER_LEN),
            }
            .into());
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_frame_size {
        return Err(NetworkError::FrameTooLarge {
            size: len,
            max: max_frame_size,
        }
        .into());
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            NetworkError::Malformed {
                reason: format!("stream ended inside a {} byte payload", len),
            }
        } else {
            read_failure(e)
        }
    })?;

    Ok(payload)
}

fn read_failure(e: std::io::Error) -> NetworkError {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe => {
            NetworkError::ConnectionClosed
        },
        _ => NetworkError::TransportFailure {
            reason: format!("Failed to read frame: {}", e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BootstrapError;
    use tokio::io::duplex;

    const MAX: usize = 1024 * 1024;

    #[tokio::test]
    async fn test_frame_layout() {
        let message = b"Hello, bootnode!";
        let mut buffer = Vec::new();

        write_frame(&mut buffer, message, MAX).await.unwrap();

        assert_eq!(buffer.len(), FRAME_HEADER_LEN + message.len());
        assert_eq!(&buffer[0..4], &(message.len() as u32).to_be_bytes());
        assert_eq!(&buffer[4..], message);

        let mut cursor = &buffer[..];
        let received = read_frame(&mut cursor, MAX).await.unwrap();
        assert_eq!(received, message);
    }

    #[tokio::test]
    async fn test_round_trip_across_split_reads() {
        // An 8 byte pipe forces every frame to be split into many reads
        let (mut writer, mut reader) = duplex(8);

        let sizes = [0usize, 1, 3, 4, 5, 255, 4096, MAX];
        let payloads: Vec<Vec<u8>> = sizes
            .iter()
            .map(|&size| (0..size).map(|i| (i % 251) as u8).collect())
            .collect();

        let expected = payloads.clone();
        let writer_task = tokio::spawn(async move {
            for payload in &payloads {
                write_frame(&mut writer, payload, MAX).await.unwrap();
            }
        });

        for payload in &expected {
            let received = read_frame(&mut reader, MAX).await.unwrap();
            assert_eq!(received.len(), payload.len());
            assert_eq!(&received, payload);
        }

        writer_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_payload_writes_nothing() {
        let mut buffer = Vec::new();
        let payload = vec![0u8; 17];

        let err = write_frame(&mut buffer, &payload, 16).await.unwrap_err();

        assert!(matches!(
            err,
            BootstrapError::Network(NetworkError::PayloadTooLarge { size: 17, max: 16 })
        ));
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_payload_at_limit_is_accepted() {
        let mut buffer = Vec::new();
        let payload = vec![7u8; 16];

        write_frame(&mut buffer, &payload, 16).await.unwrap();

        let mut cursor = &buffer[..];
        assert_eq!(read_frame(&mut cursor, 16).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_oversized_header_is_rejected() {
        let mut buffer = ((MAX + 1) as u32).to_be_bytes().to_vec();
        buffer.extend_from_slice(&[0u8; 100]);

        let mut cursor = &buffer[..];
        let err = read_frame(&mut cursor, MAX).await.unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Network(NetworkError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_clean_eof_is_connection_closed() {
        let mut cursor: &[u8] = &[];
        let err = read_frame(&mut cursor, MAX).await.unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Network(NetworkError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_truncated_header_is_malformed() {
        let mut cursor: &[u8] = &[0, 0];
        let err = read_frame(&mut cursor, MAX).await.unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Network(NetworkError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_malformed() {
        let mut buffer = 10u32.to_be_bytes().to_vec();
        buffer.extend_from_slice(b"short");

        let mut cursor = &buffer[..];
        let err = read_frame(&mut cursor, MAX).await.unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Network(NetworkError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_frames_do_not_leak_into_each_other() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"first", MAX).await.unwrap();
        write_frame(&mut buffer, b"", MAX).await.unwrap();
        write_frame(&mut buffer, b"third", MAX).await.unwrap();

        let mut cursor = &buffer[..];
        assert_eq!(read_frame(&mut cursor, MAX).await.unwrap(), b"first");
        assert_eq!(read_frame(&mut cursor, MAX).await.unwrap(), b"");
        assert_eq!(read_frame(&mut cursor, MAX).await.unwrap(), b"third");
        assert!(read_frame(&mut cursor, MAX).await.is_err());
    }
}
