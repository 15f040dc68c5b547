//! Length-prefixed frame codec.
//!
//! Layout on the wire:
//! - 4 bytes: payload length (u32, big-endian)
//! - N bytes: postcard-encoded payload
//!
//! Readers pass a `max_frame` bound so a corrupt or hostile peer cannot make
//! them allocate unbounded buffers. Game-mode packages travel inside frames,
//! so the default bound is well above typical message sizes.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default maximum accepted frame size (4 MiB).
pub const DEFAULT_MAX_FRAME: usize = 4 * 1024 * 1024;

/// Frame-level failure.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(postcard::Error),
    #[error("decode error: {0}")]
    Decode(postcard::Error),
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
}

/// Encode `value` with postcard and write it as one frame.
///
/// Returns once every byte has been flushed to the writer.
pub async fn write_frame<W, T>(writer: &mut W, value: &T, max_frame: usize) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = postcard::to_allocvec(value).map_err(CodecError::Encode)?;
    write_frame_bytes(writer, &payload, max_frame).await
}

/// Read one frame and decode its payload with postcard.
pub async fn read_frame<R, T>(reader: &mut R, max_frame: usize) -> Result<T, CodecError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let payload = read_frame_bytes(reader, max_frame).await?;
    postcard::from_bytes(&payload).map_err(CodecError::Decode)
}

/// Write a raw length-prefixed frame.
pub async fn write_frame_bytes<W>(
    writer: &mut W,
    payload: &[u8],
    max_frame: usize,
) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > max_frame || u32::try_from(payload.len()).is_err() {
        return Err(CodecError::FrameTooLarge {
            len: payload.len(),
            max: max_frame,
        });
    }
    #[allow(clippy::cast_possible_truncation)]
    let len = (payload.len() as u32).to_be_bytes();
    writer.write_all(&len).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a raw length-prefixed frame, rejecting oversized lengths before
/// allocating.
pub async fn read_frame_bytes<R>(reader: &mut R, max_frame: usize) -> Result<Vec<u8>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame {
        return Err(CodecError::FrameTooLarge {
            len,
            max: max_frame,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;
    use crate::message::{PushBody, WireMessage};

    #[tokio::test]
    async fn test_round_trip_wire_message() {
        let (mut client, mut server) = duplex(64 * 1024);

        let msg = WireMessage::Ping { nonce: 7 };
        let sent = msg.clone();

        let send_task = tokio::spawn(async move {
            write_frame(&mut client, &sent, DEFAULT_MAX_FRAME).await.unwrap();
        });
        let recv_task = tokio::spawn(async move {
            read_frame::<_, WireMessage>(&mut server, DEFAULT_MAX_FRAME)
                .await
                .unwrap()
        });

        send_task.await.unwrap();
        assert_eq!(recv_task.await.unwrap(), msg);
    }

    #[tokio::test]
    async fn test_multiple_frames_in_sequence() {
        let (mut client, mut server) = duplex(64 * 1024);

        let first = WireMessage::Ping { nonce: 1 };
        let second = WireMessage::Push(PushBody::CountdownStarted {
            seconds: 5,
            grace_secs: 2,
        });

        let a = first.clone();
        let b = second.clone();
        let send_task = tokio::spawn(async move {
            write_frame(&mut client, &a, DEFAULT_MAX_FRAME).await.unwrap();
            write_frame(&mut client, &b, DEFAULT_MAX_FRAME).await.unwrap();
        });

        let got_first: WireMessage = read_frame(&mut server, DEFAULT_MAX_FRAME).await.unwrap();
        let got_second: WireMessage = read_frame(&mut server, DEFAULT_MAX_FRAME).await.unwrap();
        send_task.await.unwrap();

        assert_eq!(got_first, first);
        assert_eq!(got_second, second);
    }

    #[tokio::test]
    async fn test_rejects_oversized_frame() {
        let (mut client, mut server) = duplex(64 * 1024);

        let limit = 1024;
        let big = vec![0u8; limit + 1];
        let send_task = tokio::spawn(async move {
            // Sender uses a laxer limit so the bytes actually go out.
            write_frame_bytes(&mut client, &big, DEFAULT_MAX_FRAME)
                .await
                .unwrap();
        });

        let res = read_frame_bytes(&mut server, limit).await;
        send_task.await.unwrap();
        assert!(matches!(
            res,
            Err(CodecError::FrameTooLarge { len, max }) if len == limit + 1 && max == limit
        ));
    }

    #[tokio::test]
    async fn test_sender_refuses_frame_over_limit() {
        let (mut client, _server) = duplex(64);
        let big = vec![0u8; 32];
        let res = write_frame_bytes(&mut client, &big, 16).await;
        assert!(matches!(res, Err(CodecError::FrameTooLarge { .. })));
    }
}
