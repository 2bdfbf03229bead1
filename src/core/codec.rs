//! Length-prefixed framing.
//!
//! Every frame is a 4-byte big-endian body length followed by the body. The
//! length is validated before any body bytes are buffered, and buffer space
//! for a body grows as its bytes arrive: a peer that announces a large frame
//! and then stalls pins at most [`RESERVE_CHUNK`] extra bytes.

use crate::core::serialization::{Codec, Message};
use crate::error::{ProtocolError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the length prefix
pub const HEADER_SIZE: usize = 4;

/// Bodies must be strictly shorter than this (2^24 bytes)
pub const PACKET_SIZE_LIMIT: usize = 1 << 24;

/// Most the decoder reserves ahead of bytes actually received
pub const RESERVE_CHUNK: usize = 64 * 1024;

#[inline]
fn check_length(len: usize) -> Result<()> {
    if len >= PACKET_SIZE_LIMIT {
        return Err(ProtocolError::OversizedPacket(len));
    }
    Ok(())
}

/// Prefix an already encoded body with its length.
pub fn frame_body(body: &[u8]) -> Result<Bytes> {
    check_length(body.len())?;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Encode `msg` and frame it; the result can be written to any number of peers.
pub fn pack_frame<T>(codec: &Codec, msg: &T) -> Result<Bytes>
where
    T: Serialize + ?Sized,
{
    let body = codec.encode(msg)?;
    frame_body(&body)
}

/// Read one frame body from `reader`.
///
/// Fails with `ConnectionClosed` if the source ends before the header or the
/// full body has arrived, and with `OversizedPacket` if the header announces
/// a body at or above the limit.
pub async fn read_frame_body<R>(reader: &mut R) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    read_exact_or_closed(reader, &mut header).await?;

    let len = u32::from_be_bytes(header) as usize;
    check_length(len)?;

    let mut body = Vec::with_capacity(len.min(RESERVE_CHUNK));
    let read = reader.take(len as u64).read_to_end(&mut body).await?;
    if read < len {
        return Err(ProtocolError::ConnectionClosed);
    }
    Ok(Bytes::from(body))
}

/// Read one frame from `reader` and decode its body.
pub async fn read_frame<R>(reader: &mut R, codec: &Codec) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let body = read_frame_body(reader).await?;
    codec.decode(&body)
}

async fn read_exact_or_closed<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => Err(ProtocolError::Io(e)),
    }
}

/// Tokio codec yielding raw frame bodies.
///
/// Decoding is left to the caller so a body that fails to decode can be
/// reported separately from a broken frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_SIZE {
            src.reserve(HEADER_SIZE - src.len());
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        check_length(len)?;

        let total = HEADER_SIZE + len;
        if src.len() < total {
            src.reserve((total - src.len()).min(RESERVE_CHUNK));
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        Ok(Some(src.split_to(len).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<()> {
        check_length(body.len())?;
        dst.reserve(HEADER_SIZE + body.len());
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_layout() {
        let frame = frame_body(b"abc").unwrap();
        assert_eq!(&frame[..], &[0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_empty_body_frame() {
        let frame = frame_body(&[]).unwrap();
        assert_eq!(&frame[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_largest_body_accepted() {
        let body = vec![0u8; PACKET_SIZE_LIMIT - 1];
        let frame = frame_body(&body).unwrap();
        assert_eq!(frame.len(), HEADER_SIZE + PACKET_SIZE_LIMIT - 1);
        assert_eq!(&frame[..HEADER_SIZE], &[0x00, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_limit_body_rejected() {
        let body = vec![0u8; PACKET_SIZE_LIMIT];
        assert!(matches!(
            frame_body(&body),
            Err(ProtocolError::OversizedPacket(n)) if n == PACKET_SIZE_LIMIT
        ));
    }

    #[test]
    fn test_decoder_waits_for_full_frame() {
        let frame = pack_frame(&Codec::default(), &json!({"cmd": "updates"})).unwrap();
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&frame[..2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&frame[2..frame.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&frame[frame.len() - 1..]);

        let body = codec.decode(&mut buf).unwrap().expect("complete frame");
        assert_eq!(body, frame.slice(HEADER_SIZE..));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_rejects_oversize_header_early() {
        let mut buf = BytesMut::new();
        buf.put_u32(PACKET_SIZE_LIMIT as u32);
        assert!(matches!(
            FrameCodec.decode(&mut buf),
            Err(ProtocolError::OversizedPacket(_))
        ));
    }

    #[test]
    fn test_decoder_reserves_incrementally() {
        let announced = 8 * 1024 * 1024;
        let mut buf = BytesMut::new();
        buf.put_u32(announced as u32);
        assert!(FrameCodec.decode(&mut buf).unwrap().is_none());
        assert!(buf.capacity() < announced / 4);

        // the body still assembles once it has all arrived
        let chunk = vec![0xabu8; 1024 * 1024];
        for _ in 0..8 {
            assert!(FrameCodec.decode(&mut buf).unwrap().is_none());
            buf.extend_from_slice(&chunk);
        }
        let body = FrameCodec.decode(&mut buf).unwrap().expect("complete frame");
        assert_eq!(body.len(), announced);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_eof_mid_frame_is_closed() {
        let mut buf = BytesMut::from(&[0u8, 0, 0, 9, 1, 2][..]);
        assert!(matches!(
            FrameCodec.decode_eof(&mut buf),
            Err(ProtocolError::ConnectionClosed)
        ));
        let mut empty = BytesMut::new();
        assert!(FrameCodec.decode_eof(&mut empty).unwrap().is_none());
    }

    #[test]
    fn test_encoder_matches_frame_body() {
        let mut dst = BytesMut::new();
        FrameCodec
            .encode(Bytes::from_static(b"hello"), &mut dst)
            .unwrap();
        assert_eq!(dst.freeze(), frame_body(b"hello").unwrap());
    }

    #[tokio::test]
    async fn test_read_frame_sequence() {
        let codec = Codec::default();
        let mut wire = Vec::new();
        wire.extend_from_slice(&pack_frame(&codec, &json!({"n": 1})).unwrap());
        wire.extend_from_slice(&pack_frame(&codec, &json!({"n": 2})).unwrap());

        let mut reader = &wire[..];
        assert_eq!(read_frame(&mut reader, &codec).await.unwrap(), json!({"n": 1}));
        assert_eq!(read_frame(&mut reader, &codec).await.unwrap(), json!({"n": 2}));
        assert!(matches!(
            read_frame(&mut reader, &codec).await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_frame_truncated_header() {
        let mut reader = &[0u8, 0][..];
        assert!(matches!(
            read_frame_body(&mut reader).await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_frame_truncated_body() {
        let mut reader = &[0u8, 0, 0, 5, 1, 2][..];
        assert!(matches!(
            read_frame_body(&mut reader).await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_frame_large_body_across_writes() {
        let (mut tx, mut rx) = tokio::io::duplex(64 * 1024);
        let frame = frame_body(&vec![7u8; 3 * RESERVE_CHUNK + 5]).unwrap();
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            tx.write_all(&frame).await.unwrap();
        });
        let body = read_frame_body(&mut rx).await.unwrap();
        writer.await.unwrap();
        assert_eq!(body.len(), 3 * RESERVE_CHUNK + 5);
        assert!(body.iter().all(|&b| b == 7));
    }

    #[tokio::test]
    async fn test_read_frame_oversize_header() {
        let mut reader = &[0x01u8, 0, 0, 0][..];
        assert!(matches!(
            read_frame_body(&mut reader).await,
            Err(ProtocolError::OversizedPacket(n)) if n == PACKET_SIZE_LIMIT
        ));
    }

    #[tokio::test]
    async fn test_read_frame_undecodable_body() {
        let frame = frame_body(&[0xc1]).unwrap();
        let mut reader = &frame[..];
        assert!(matches!(
            read_frame(&mut reader, &Codec::default()).await,
            Err(ProtocolError::DeserializeError(_))
        ));
    }
}
