//! Frame transport — handshake and length-prefixed framing over a stream.
//!
//! A connection opens with the server sending the 4-byte protocol tag. The
//! client answers with the session ID it wants (0 for a fresh session) and
//! the server replies with the ID it assigned, both as u64 little-endian.
//! After that every frame is a u32 little-endian length followed by exactly
//! that many payload bytes.

use crate::error::{WireError, WireResult};
use crate::SessionId;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Greeting sent by the server when a connection opens.
pub const PROTOCOL_TAG: [u8; 4] = *b"ROC1";

/// Default cap on an incoming frame's payload (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// A bidirectional byte stream a session can run over.
pub trait Duplex: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Duplex for T {}

/// Map EOF to `ConnectionClosed`, keeping other I/O errors as they are.
fn read_error(e: std::io::Error) -> WireError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        WireError::ConnectionClosed
    } else {
        WireError::Io(e)
    }
}

/// Client side of the handshake. Returns the session ID the server assigned.
///
/// If the greeting is not [`PROTOCOL_TAG`] nothing is written back.
pub async fn client_handshake<S>(stream: &mut S, current_id: SessionId) -> WireResult<SessionId>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut tag = [0u8; 4];
    stream.read_exact(&mut tag).await.map_err(read_error)?;
    if tag != PROTOCOL_TAG {
        return Err(WireError::ProtocolMismatch {
            expected: PROTOCOL_TAG,
            received: tag,
        });
    }

    stream.write_all(&current_id.to_le_bytes()).await?;
    stream.flush().await?;

    let assigned = stream.read_u64_le().await.map_err(read_error)?;
    debug!("RPC: handshake complete, session {}", assigned);
    Ok(assigned)
}

/// Server side of the handshake. Sends the greeting, reads the requested
/// session ID, and answers with `assigned`. Returns the requested ID.
pub async fn server_handshake<S>(stream: &mut S, assigned: SessionId) -> WireResult<SessionId>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&PROTOCOL_TAG).await?;
    stream.flush().await?;

    let requested = stream.read_u64_le().await.map_err(read_error)?;

    stream.write_all(&assigned.to_le_bytes()).await?;
    stream.flush().await?;
    Ok(requested)
}

/// Write one frame: length prefix and payload in a single buffer.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> WireResult<()>
where
    W: AsyncWrite + Unpin,
{
    let len =
        u32::try_from(payload.len()).map_err(|_| WireError::ValueTooLarge(payload.len()))?;
    let mut bytes = Vec::with_capacity(4 + payload.len());
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes.extend_from_slice(payload);
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one complete frame payload.
///
/// EOF anywhere inside the frame is `ConnectionClosed`; a declared length
/// above `max_frame_size` is `FrameTooLarge` and nothing more is read.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: u32) -> WireResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await.map_err(read_error)?;

    let len = u32::from_le_bytes(header);
    if len > max_frame_size {
        return Err(WireError::FrameTooLarge {
            size: len,
            max: max_frame_size,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await.map_err(read_error)?;
    Ok(body)
}

/// A framed stream owned by a session.
pub struct FrameTransport {
    stream: Box<dyn Duplex>,
    max_frame_size: u32,
}

impl FrameTransport {
    /// Wrap a stream that has completed its handshake.
    pub fn new(stream: Box<dyn Duplex>, max_frame_size: u32) -> Self {
        Self {
            stream,
            max_frame_size,
        }
    }

    /// Current cap on incoming frames.
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    pub fn set_max_frame_size(&mut self, max: u32) {
        self.max_frame_size = max;
    }

    pub async fn write_frame(&mut self, payload: &[u8]) -> WireResult<()> {
        write_frame(&mut self.stream, payload).await
    }

    /// Read the next frame, enforcing the size cap.
    pub async fn read_frame(&mut self) -> WireResult<Vec<u8>> {
        read_frame(&mut self.stream, self.max_frame_size).await
    }

    /// Shut down the write half.
    pub async fn shutdown(&mut self) -> WireResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

impl std::fmt::Debug for FrameTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameTransport")
            .field("max_frame_size", &self.max_frame_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_client_handshake() {
        let mut mock = Builder::new()
            .read(b"ROC1")
            .write(&0u64.to_le_bytes())
            .read(&42u64.to_le_bytes())
            .build();
        assert_eq!(client_handshake(&mut mock, 0).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_handshake_mismatch_sends_nothing() {
        // With its script exhausted the mock fails any further write.
        let mut mock = Builder::new().read(b"HTTP").build();
        let err = client_handshake(&mut mock, 0).await.unwrap_err();
        match err {
            WireError::ProtocolMismatch { expected, received } => {
                assert_eq!(&expected, b"ROC1");
                assert_eq!(&received, b"HTTP");
            }
            other => panic!("Expected ProtocolMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handshake_short_greeting() {
        let mut mock = Builder::new().read(b"RO").build();
        assert!(matches!(
            client_handshake(&mut mock, 0).await,
            Err(WireError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_server_handshake() {
        let mut mock = Builder::new()
            .write(b"ROC1")
            .read(&5u64.to_le_bytes())
            .write(&9u64.to_le_bytes())
            .build();
        assert_eq!(server_handshake(&mut mock, 9).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_write_frame_single_buffer() {
        let mut mock = Builder::new().write(&[3, 0, 0, 0, 1, 2, 3]).build();
        write_frame(&mut mock, &[1, 2, 3]).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_frame_across_partial_reads() {
        let mut mock = Builder::new()
            .read(&[5, 0])
            .read(&[0, 0, b'h', b'e'])
            .read(b"llo")
            .build();
        let frame = read_frame(&mut mock, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(frame, b"hello");
    }

    #[tokio::test]
    async fn test_partial_frame_is_connection_closed() {
        // Length says 10, only 3 bytes arrive before EOF.
        let mut mock = Builder::new().read(&[10, 0, 0, 0, 1, 2, 3]).build();
        assert!(matches!(
            read_frame(&mut mock, DEFAULT_MAX_FRAME_SIZE).await,
            Err(WireError::ConnectionClosed)
        ));

        let mut mock = Builder::new().read(&[1, 0]).build();
        assert!(matches!(
            read_frame(&mut mock, DEFAULT_MAX_FRAME_SIZE).await,
            Err(WireError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut mock = Builder::new().read(&17u32.to_le_bytes()).build();
        match read_frame(&mut mock, 16).await {
            Err(WireError::FrameTooLarge { size, max }) => {
                assert_eq!(size, 17);
                assert_eq!(max, 16);
            }
            other => panic!("Expected FrameTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_round_trip() {
        let (a, b) = tokio::io::duplex(64);
        let mut left = FrameTransport::new(Box::new(a), DEFAULT_MAX_FRAME_SIZE);
        let mut right = FrameTransport::new(Box::new(b), DEFAULT_MAX_FRAME_SIZE);

        left.write_frame(b"first").await.unwrap();
        left.write_frame(b"").await.unwrap();
        assert_eq!(right.read_frame().await.unwrap(), b"first");
        assert_eq!(right.read_frame().await.unwrap(), b"");

        drop(left);
        assert!(matches!(
            right.read_frame().await,
            Err(WireError::ConnectionClosed)
        ));
    }
}
