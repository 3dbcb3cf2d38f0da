// Envelope codec — bincode records behind a 4-byte length prefix

use super::types::Envelope;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum encoded envelope size: 256 KB.
/// A larger declared frame length means the stream is garbage or hostile.
pub const MAX_FRAME_SIZE: usize = 256 * 1024;

/// Maximum chat body: 64 KB
pub const MAX_BODY_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Body too large: {0} bytes (max {max})", max = MAX_BODY_SIZE)]
    BodyTooLarge(usize),
    #[error("Frame too large: {0} bytes (max {max})", max = MAX_FRAME_SIZE)]
    FrameTooLarge(usize),
    #[error("Empty frame")]
    EmptyFrame,
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialize an envelope to bytes (bincode)
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    if let Some(line) = envelope.as_chat_line() {
        if line.body.len() > MAX_BODY_SIZE {
            return Err(CodecError::BodyTooLarge(line.body.len()));
        }
    }

    let bytes =
        bincode::serialize(envelope).map_err(|e| CodecError::Serialization(e.to_string()))?;

    if bytes.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(bytes.len()));
    }

    Ok(bytes)
}

/// Deserialize bytes to an envelope
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, CodecError> {
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(bytes.len()));
    }

    let envelope: Envelope =
        bincode::deserialize(bytes).map_err(|e| CodecError::Deserialization(e.to_string()))?;

    if let Some(line) = envelope.as_chat_line() {
        if line.body.len() > MAX_BODY_SIZE {
            return Err(CodecError::BodyTooLarge(line.body.len()));
        }
    }

    Ok(envelope)
}

/// Write one length-prefixed frame and flush
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    if payload.is_empty() {
        return Err(CodecError::EmptyFrame);
    }
    if payload.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(payload.len()));
    }

    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// The frame boundary is checked before anything is allocated.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len == 0 {
        return Err(CodecError::EmptyFrame);
    }
    if len > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::types::{ChatLine, Notification, Presence};

    #[test]
    fn test_payload_roundtrip() {
        let env = Envelope::from(ChatLine::new(
            "alice",
            "hello world",
            "10.0.0.2",
            Some(Presence::Working),
        ));
        let bytes = encode_envelope(&env).unwrap();
        assert_eq!(decode_envelope(&bytes).unwrap(), env);
    }

    #[test]
    fn test_auth_roundtrip_keeps_credential() {
        let env = Envelope::auth("alice", "secret");
        let restored = decode_envelope(&encode_envelope(&env).unwrap()).unwrap();
        match restored {
            Envelope::Notification(Notification::Auth { name, credential }) => {
                assert_eq!(name, "alice");
                assert_eq!(credential, "secret");
            }
            other => panic!("Wrong envelope: {:?}", other),
        }
    }

    #[test]
    fn test_reject_oversized_body() {
        let body = "x".repeat(MAX_BODY_SIZE + 1);
        let env = Envelope::from(ChatLine::new("a", body, "", None));
        assert!(matches!(
            encode_envelope(&env),
            Err(CodecError::BodyTooLarge(_))
        ));
    }

    #[test]
    fn test_reject_oversized_decode() {
        let big = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(matches!(
            decode_envelope(&big),
            Err(CodecError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_body() {
        let body = "x".repeat(MAX_BODY_SIZE + 1);
        let env = Envelope::from(ChatLine::new("a", body, "", None));
        let bytes = bincode::serialize(&env).unwrap();
        assert!(matches!(
            decode_envelope(&bytes),
            Err(CodecError::BodyTooLarge(_))
        ));
    }

    #[test]
    fn test_invalid_bytes() {
        assert!(decode_envelope(&[255, 254, 253]).is_err());
    }

    #[tokio::test]
    async fn test_frames_preserve_boundaries() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let first = encode_envelope(&Envelope::keep_alive()).unwrap();
        let second = encode_envelope(&Envelope::from(ChatLine::new("a", "b", "", None))).unwrap();

        write_frame(&mut a, &first).await.unwrap();
        write_frame(&mut a, &second).await.unwrap();

        assert_eq!(read_frame(&mut b).await.unwrap(), first);
        assert_eq!(read_frame(&mut b).await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_length_prefix() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32((MAX_FRAME_SIZE + 1) as u32).await.unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(CodecError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_read_eof_is_io_error() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(matches!(read_frame(&mut b).await, Err(CodecError::Io(_))));
    }
}
