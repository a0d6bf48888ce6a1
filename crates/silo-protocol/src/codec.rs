use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::Message;

/// Maximum payload size of a single frame (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

const HEADER_LEN: usize = 4;
const TYPE_LEN: usize = 2;

/// Framing for multiplexed peer messages.
///
/// `[4 bytes len][2 bytes type][payload]`, big-endian, where `len`
/// counts the type field and the payload. The type is the global
/// message type assigned by the multiplexer.
pub struct FrameCodec;

impl FrameCodec {
    pub fn encode(msg: &Message) -> ProtocolResult<Vec<u8>> {
        if msg.payload.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: msg.payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let len = (TYPE_LEN + msg.payload.len()) as u32;
        let mut buf = Vec::with_capacity(HEADER_LEN + len as usize);
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&msg.message_type.to_be_bytes());
        buf.extend_from_slice(&msg.payload);
        Ok(buf)
    }

    /// Decode one frame from the front of `data`. Returns (message, bytes_consumed).
    pub fn decode(data: &[u8]) -> ProtocolResult<(Message, usize)> {
        if data.len() < HEADER_LEN + TYPE_LEN {
            return Err(ProtocolError::FramingError("too short".into()));
        }
        let len = check_len(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))?;
        let total = HEADER_LEN + len;
        if data.len() < total {
            return Err(ProtocolError::FramingError(format!(
                "incomplete: have {}, need {}",
                data.len(),
                total
            )));
        }
        let message_type = u16::from_be_bytes([data[4], data[5]]);
        let payload = data[HEADER_LEN + TYPE_LEN..total].to_vec();
        Ok((Message::new(message_type, payload), total))
    }
}

fn check_len(len: u32) -> ProtocolResult<usize> {
    let len = len as usize;
    if len < TYPE_LEN {
        return Err(ProtocolError::FramingError(format!("frame length {len} below header size")));
    }
    if len - TYPE_LEN > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge { size: len - TYPE_LEN, max: MAX_MESSAGE_SIZE });
    }
    Ok(len)
}

/// Write one frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Message) -> ProtocolResult<()> {
    let bytes = FrameCodec::encode(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `Ok(None)` if the stream ends cleanly between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> ProtocolResult<Option<Message>> {
    let mut header = [0u8; HEADER_LEN];
    let n = reader.read(&mut header).await?;
    if n == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut header[n..]).await?;
    let len = check_len(u32::from_be_bytes(header))?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    let message_type = u16::from_be_bytes([body[0], body[1]]);
    body.drain(..TYPE_LEN);
    Ok(Some(Message::new(message_type, body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout() {
        let bytes = FrameCodec::encode(&Message::new(14, vec![1, 2, 3])).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 5, 0, 14, 1, 2, 3]);
        let (msg, consumed) = FrameCodec::decode(&bytes).unwrap();
        assert_eq!(consumed, 9);
        assert_eq!(msg, Message::new(14, vec![1, 2, 3]));
    }

    #[test]
    fn decode_leaves_trailing_frames() {
        let mut bytes = FrameCodec::encode(&Message::new(1, vec![9])).unwrap();
        bytes.extend(FrameCodec::encode(&Message::new(2, vec![])).unwrap());
        let (first, used) = FrameCodec::decode(&bytes).unwrap();
        assert_eq!(first.message_type, 1);
        let (second, _) = FrameCodec::decode(&bytes[used..]).unwrap();
        assert_eq!(second, Message::new(2, vec![]));
    }

    #[test]
    fn decode_truncated() {
        let err = FrameCodec::decode(&[0, 0, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::FramingError(_)));
        let err = FrameCodec::decode(&[0, 0, 0, 9, 0, 1, 5]).unwrap_err();
        assert!(matches!(err, ProtocolError::FramingError(_)));
    }

    #[test]
    fn decode_length_below_type_field() {
        let err = FrameCodec::decode(&[0, 0, 0, 1, 0, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::FramingError(_)));
    }

    #[test]
    fn oversized_rejected_both_ways() {
        let big = Message::new(0, vec![0; MAX_MESSAGE_SIZE + 1]);
        assert!(matches!(FrameCodec::encode(&big), Err(ProtocolError::MessageTooLarge { .. })));

        let header = ((MAX_MESSAGE_SIZE + 3) as u32).to_be_bytes();
        let data = [&header[..], &[0, 0]].concat();
        assert!(matches!(FrameCodec::decode(&data), Err(ProtocolError::MessageTooLarge { .. })));
    }

    #[tokio::test]
    async fn frames_over_async_stream() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let sent = vec![Message::new(0, vec![7; 100]), Message::new(13, vec![])];

        let writer = {
            let sent = sent.clone();
            tokio::spawn(async move {
                for msg in &sent {
                    write_frame(&mut client, msg).await.unwrap();
                }
            })
        };

        let mut received = Vec::new();
        while let Some(msg) = read_frame(&mut server).await.unwrap() {
            received.push(msg);
        }
        writer.await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn eof_mid_frame_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 0, 10, 0, 1, 2]).await.unwrap();
        drop(client);
        assert!(matches!(read_frame(&mut server).await, Err(ProtocolError::Io(_))));
    }
}
