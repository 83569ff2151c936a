// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefixed framing over TCP streams.
//!
//! Every datagram of the engine travels as a 4-byte big-endian length
//! followed by the encoded envelope.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one frame into `buffer`, returning its length.
///
/// Returns `Ok(None)` if the connection is closed gracefully.
pub async fn read_frame<R>(
    stream: &mut R,
    max_message_size: usize,
    buffer: &mut Vec<u8>,
) -> Result<Option<usize>, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Ok(None);
        }
        Err(e) => return Err(ConnectionError::Io(e.to_string())),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(ConnectionError::Protocol("Empty message".into()));
    }
    if len > max_message_size {
        return Err(ConnectionError::Protocol(format!(
            "Message too large: {} > {}",
            len, max_message_size
        )));
    }

    buffer.clear();
    buffer.resize(len, 0);
    stream
        .read_exact(buffer)
        .await
        .map_err(|e| ConnectionError::Io(e.to_string()))?;
    Ok(Some(len))
}

/// Write one frame.
pub async fn write_frame<W>(stream: &mut W, bytes: &[u8]) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(bytes.len())
        .map_err(|_| ConnectionError::Protocol(format!("Message too large: {}", bytes.len())))?;
    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| ConnectionError::Io(e.to_string()))?;
    stream
        .write_all(bytes)
        .await
        .map_err(|e| ConnectionError::Io(e.to_string()))?;
    stream
        .flush()
        .await
        .map_err(|e| ConnectionError::Io(e.to_string()))
}

/// Connection error types.
#[derive(Debug)]
pub enum ConnectionError {
    Io(String),
    Protocol(String),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(s) => write!(f, "I/O error: {}", s),
            Self::Protocol(s) => write!(f, "Protocol error: {}", s),
        }
    }
}

impl std::error::Error for ConnectionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, b"hello").await.unwrap();
        drop(client);

        let mut buffer = Vec::new();
        assert!(read_frame(&mut server, 64, &mut buffer).await.unwrap().is_some());
        assert_eq!(buffer, b"hello");
        assert!(read_frame(&mut server, 64, &mut buffer).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversize_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, &[7u8; 100]).await.unwrap();

        let mut buffer = Vec::new();
        let result = read_frame(&mut server, 64, &mut buffer).await;
        assert!(matches!(result, Err(ConnectionError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_empty_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut client, &0u32.to_be_bytes())
            .await
            .unwrap();

        let mut buffer = Vec::new();
        let result = read_frame(&mut server, 64, &mut buffer).await;
        assert!(matches!(result, Err(ConnectionError::Protocol(_))));
    }
}
