//! Length-prefixed frame I/O over async streams.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::frame::{Frame, FrameError};

/// Error from reading or writing a frame on a socket.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Read one frame, rejecting it before buffering if the declared length
/// exceeds `max_frame_size`.
///
/// Returns `Ok(None)` on a clean EOF between frames. EOF inside the
/// length prefix is an I/O error.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Frame>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    if reader.read(&mut len_bytes[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_bytes[1..]).await?;

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > max_frame_size {
        return Err(FrameError::TooLarge {
            size: len,
            max: max_frame_size,
        }
        .into());
    }

    let mut body = BytesMut::zeroed(len);
    reader.read_exact(&mut body).await?;

    Ok(Some(Frame::decode_body(body.freeze())?))
}

/// Encode and write one frame, then flush.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(256);
    frame.encode(&mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{KvList, Message};
    use crate::protocol::DisconnectStatus;

    #[tokio::test]
    async fn frames_cross_a_duplex_pipe() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let notify = Frame::notify(3, 1, vec![Message::new("m", KvList::new().with("a", "b"))]);
        write_frame(&mut client, &notify).await.unwrap();
        write_frame(&mut client, &Frame::agent_disconnect(DisconnectStatus::Normal, "x"))
            .await
            .unwrap();
        drop(client);

        assert_eq!(read_frame(&mut server, 1024).await.unwrap(), Some(notify));
        assert!(read_frame(&mut server, 1024).await.unwrap().is_some());
        assert_eq!(read_frame(&mut server, 1024).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_frame_is_refused() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&5000u32.to_be_bytes()).await.unwrap();

        let err = read_frame(&mut server, 1024).await.unwrap_err();
        assert!(matches!(err, CodecError::Frame(FrameError::TooLarge { size: 5000, .. })));
    }

    #[tokio::test]
    async fn eof_inside_length_prefix_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&[0x00, 0x00]).await.unwrap();
        drop(client);

        let err = read_frame(&mut server, 1024).await.unwrap_err();
        assert!(matches!(err, CodecError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
    }
}
