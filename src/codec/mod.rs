//! Wire codec: `<length:4><type:1><payload>` framing over TCP.
//!
//! Pure byte-in / message-out transformer. The Codec only knows about
//! frame boundaries and the one-byte message-type tag; it is unaware of
//! session/transaction semantics. `payload` is itself a protobuf-encoded
//! [`message::Envelope`] carrying the session id the frame belongs to —
//! [`crate::transport`] decodes just that envelope to demultiplex, and
//! leaves decoding `Envelope::body` to whichever layer understands the
//! tag (Session, ResultStream, Pool).

pub mod message;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;

/// Maximum allowed frame length (including the 1-byte type), guards
/// against a corrupt/hostile length field forcing an unbounded read.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Single-byte message-type tag carried right after the length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageTag {
    SessionOpen = 0x01,
    SessionOpenAck = 0x02,
    SessionClose = 0x03,
    SessionReset = 0x04,
    ExecSql = 0x05,
    GalaxyPrepare = 0x06,
    FetchMore = 0x07,
    Cancel = 0x08,
    Notice = 0x09,
    ColumnMetadata = 0x0a,
    Row = 0x0b,
    Terminal = 0x0c,
    Tso = 0x0d,
    Ping = 0x0e,
    Pong = 0x0f,
}

impl MessageTag {
    fn from_u8(b: u8) -> Result<Self, FrameError> {
        Ok(match b {
            0x01 => Self::SessionOpen,
            0x02 => Self::SessionOpenAck,
            0x03 => Self::SessionClose,
            0x04 => Self::SessionReset,
            0x05 => Self::ExecSql,
            0x06 => Self::GalaxyPrepare,
            0x07 => Self::FetchMore,
            0x08 => Self::Cancel,
            0x09 => Self::Notice,
            0x0a => Self::ColumnMetadata,
            0x0b => Self::Row,
            0x0c => Self::Terminal,
            0x0d => Self::Tso,
            0x0e => Self::Ping,
            0x0f => Self::Pong,
            other => return Err(FrameError::UnknownTag(other)),
        })
    }
}

/// A single decoded frame: a message-type tag plus its raw payload.
///
/// The payload is the still-encoded [`message::Envelope`]; the caller
/// decodes it once it knows, from `tag`, which body type to expect.
#[derive(Debug, Clone)]
pub struct Frame {
    pub tag: MessageTag,
    pub payload: Bytes,
}

/// Read one frame from an async reader. Returns `Ok(None)` on a clean
/// EOF between frames (the socket was closed, not mid-frame).
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>, FrameError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(_) => return Err(FrameError::Truncated { expected: 4 }),
    }
    let total_len = u32::from_be_bytes(len_buf);
    if total_len == 0 || total_len > MAX_FRAME_LEN {
        return Err(FrameError::LengthOutOfBounds(total_len));
    }

    let mut body = vec![0u8; total_len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|_| FrameError::Truncated {
            expected: total_len as usize,
        })?;

    let mut body = Bytes::from(body);
    let tag = MessageTag::from_u8(body.get_u8())?;
    Ok(Some(Frame { tag, payload: body }))
}

/// Write one frame to an async writer. Does not flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    tag: MessageTag,
    payload: &[u8],
) -> Result<(), FrameError> {
    let total_len = payload.len() + 1;
    if total_len > MAX_FRAME_LEN as usize {
        return Err(FrameError::LengthOutOfBounds(total_len as u32));
    }

    let mut buf = BytesMut::with_capacity(4 + total_len);
    buf.put_u32(total_len as u32);
    buf.put_u8(tag as u8);
    buf.put_slice(payload);

    writer
        .write_all(&buf)
        .await
        .map_err(|_| FrameError::Truncated { expected: total_len })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_frame() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        write_frame(&mut client, MessageTag::Ping, b"abc")
            .await
            .unwrap();

        let frame = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(frame.tag, MessageTag::Ping);
        assert_eq!(&frame.payload[..], b"abc");
    }

    #[tokio::test]
    async fn clean_eof_between_frames() {
        let (client, mut server) = tokio::io::duplex(4096);
        drop(client);
        let frame = read_frame(&mut server).await.unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn rejects_oversized_length() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_all(&(MAX_FRAME_LEN + 1).to_be_bytes()).await.unwrap();
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, FrameError::LengthOutOfBounds(_)));
    }

    #[test]
    fn unknown_tag_rejected() {
        assert!(matches!(
            MessageTag::from_u8(0xff),
            Err(FrameError::UnknownTag(0xff))
        ));
    }
}
