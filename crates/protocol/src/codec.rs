//! Message serialization and framing
//!
//! Message bodies are JSON so that method arguments and results can carry
//! arbitrary named values. Over a byte stream (stdin/stdout for the bridge
//! binary) each message is length-prefixed:
//!
//! ```text
//! [Length: u32 (big-endian)][Message bytes (JSON)]
//! ```

use crate::{CURRENT_VERSION, Message, ProtocolVersion, error::ProtocolError, error::Result};
use std::io::{Read, Write};

#[cfg(feature = "async")]
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Maximum allowed frame size (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Encode a message to JSON bytes
///
/// # Example
/// ```
/// use protocol::{Message, MessagePayload, CURRENT_VERSION, encode_message};
///
/// let msg = Message {
///     version: CURRENT_VERSION,
///     payload: MessagePayload::Listen,
/// };
/// let bytes = encode_message(&msg).unwrap();
/// assert!(!bytes.is_empty());
/// ```
pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
    serde_json::to_vec(message).map_err(ProtocolError::from)
}

/// Decode a message from JSON bytes
pub fn decode_message(bytes: &[u8]) -> Result<Message> {
    serde_json::from_slice(bytes).map_err(ProtocolError::from)
}

/// Validate protocol version compatibility
///
/// Compatible if major versions match. Minor version differences are allowed.
pub fn validate_version(message_version: &ProtocolVersion) -> Result<()> {
    if message_version.major != CURRENT_VERSION.major {
        return Err(ProtocolError::IncompatibleVersion {
            major: message_version.major,
            minor: message_version.minor,
            expected_major: CURRENT_VERSION.major,
            expected_minor: CURRENT_VERSION.minor,
        });
    }
    Ok(())
}

/// Encode a message with length prefix for framing
///
/// # Example
/// ```
/// use protocol::{Message, MessagePayload, CURRENT_VERSION, encode_framed, decode_framed};
///
/// let msg = Message {
///     version: CURRENT_VERSION,
///     payload: MessagePayload::Cancel,
/// };
/// let framed = encode_framed(&msg).unwrap();
/// let decoded = decode_framed(&framed).unwrap();
/// assert_eq!(decoded, msg);
/// ```
pub fn encode_framed(message: &Message) -> Result<Vec<u8>> {
    let message_bytes = encode_message(message)?;
    let message_len = message_bytes.len();

    if message_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: message_len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(4 + message_len);
    frame.extend_from_slice(&(message_len as u32).to_be_bytes());
    frame.extend_from_slice(&message_bytes);

    Ok(frame)
}

/// Read and bounds-check the length prefix of a frame
fn frame_length(len_bytes: [u8; 4]) -> Result<usize> {
    let length = u32::from_be_bytes(len_bytes) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(length)
}

/// Decode a framed message
pub fn decode_framed(frame: &[u8]) -> Result<Message> {
    if frame.len() < 4 {
        return Err(ProtocolError::IncompleteFrame {
            expected: 4,
            actual: frame.len(),
        });
    }

    let length = frame_length([frame[0], frame[1], frame[2], frame[3]])?;

    if frame.len() < 4 + length {
        return Err(ProtocolError::IncompleteFrame {
            expected: 4 + length,
            actual: frame.len(),
        });
    }

    decode_message(&frame[4..4 + length])
}

/// Write a framed message to a writer
pub fn write_framed<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
    let framed = encode_framed(message)?;
    writer.write_all(&framed)?;
    writer.flush()?;
    Ok(())
}

/// Read a framed message from a reader
pub fn read_framed<R: Read>(reader: &mut R) -> Result<Message> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let length = frame_length(len_bytes)?;

    let mut message_bytes = vec![0u8; length];
    reader.read_exact(&mut message_bytes)?;

    decode_message(&message_bytes)
}

/// Async: write a framed message and flush
#[cfg(feature = "async")]
pub async fn write_framed_async<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let framed = encode_framed(message)?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Async: read a framed message
///
/// Returns `Ok(None)` on a clean end of stream before a new frame starts.
/// A stream ending inside the length prefix is an incomplete frame.
#[cfg(feature = "async")]
pub async fn read_framed_async<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncReadExt + Unpin,
{
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        let n = reader.read(&mut len_bytes[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::IncompleteFrame {
                expected: len_bytes.len(),
                actual: filled,
            });
        }
        filled += n;
    }
    let length = frame_length(len_bytes)?;

    let mut message_bytes = vec![0u8; length];
    reader.read_exact(&mut message_bytes).await?;

    decode_message(&message_bytes).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CURRENT_VERSION, MessagePayload};
    use std::io::Cursor;

    fn listen() -> Message {
        Message {
            version: CURRENT_VERSION,
            payload: MessagePayload::Listen,
        }
    }

    #[test]
    fn test_framed_length_prefix() {
        let framed = encode_framed(&listen()).unwrap();
        let len = u32::from_be_bytes([framed[0], framed[1], framed[2], framed[3]]) as usize;
        assert_eq!(len, framed.len() - 4);
    }

    #[test]
    fn test_framed_incomplete_frame() {
        let framed = encode_framed(&listen()).unwrap();
        let result = decode_framed(&framed[..framed.len() - 1]);
        assert!(matches!(
            result,
            Err(ProtocolError::IncompleteFrame { .. })
        ));
    }

    #[test]
    fn test_framed_too_large() {
        let mut frame = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(b"{}");
        assert!(matches!(
            decode_framed(&frame),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_partial_length_prefix() {
        assert!(matches!(
            decode_framed(&[0, 0]),
            Err(ProtocolError::IncompleteFrame {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_write_read_framed() {
        let mut buffer = Vec::new();
        write_framed(&mut buffer, &listen()).unwrap();
        let decoded = read_framed(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(decoded, listen());
    }

    #[test]
    fn test_malformed_body() {
        let mut frame = 3u32.to_be_bytes().to_vec();
        frame.extend_from_slice(b"{{{");
        assert!(matches!(
            decode_framed(&frame),
            Err(ProtocolError::Serialization(_))
        ));
    }

    #[test]
    fn test_validate_version_incompatible_major() {
        let v2 = ProtocolVersion {
            major: 2,
            minor: 0,
            patch: 0,
        };
        assert!(validate_version(&v2).is_err());

        let newer_minor = ProtocolVersion {
            major: CURRENT_VERSION.major,
            minor: CURRENT_VERSION.minor + 1,
            patch: 0,
        };
        assert!(validate_version(&newer_minor).is_ok());
    }

    #[tokio::test]
    async fn test_async_read_clean_eof() {
        let mut empty: &[u8] = &[];
        assert!(read_framed_async(&mut empty).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_async_read_truncated_length_prefix() {
        for cut in 1..4 {
            let prefix = [0u8, 0, 0, 2];
            let mut reader: &[u8] = &prefix[..cut];
            assert!(matches!(
                read_framed_async(&mut reader).await,
                Err(ProtocolError::IncompleteFrame { expected: 4, actual }) if actual == cut
            ));
        }
    }

    #[tokio::test]
    async fn test_async_write_then_read() {
        let mut buffer = Vec::new();
        write_framed_async(&mut buffer, &listen()).await.unwrap();

        let mut reader: &[u8] = &buffer;
        let decoded = read_framed_async(&mut reader).await.unwrap();
        assert_eq!(decoded, Some(listen()));
    }
}
