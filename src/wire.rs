//! The riv wire codec: handshake, the request line, framed messages, and
//! the image blob envelope.
//!
//! Each unit on this wire (the handshake, the request line, a framed
//! message) has a different fixed or length-prefixed shape, so each gets
//! its own read/write pair rather than a single generic frame reader.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, RivError};

/// Reserved message id: query the data channels a provider exposes.
pub const MSG_QUERY_DATA_CHANNELS: u32 = 100;
/// Reserved message id: the reply to `query_data_channels`.
pub const MSG_DATA_CHANNELS: u32 = 101;
/// Reserved message id: a delivered, encoded image frame.
pub const MSG_IMAGE_DATA_BLOB: u32 = 200;
/// Ids below this are reserved for library control messages.
pub const USERMSG_THRESHOLD: u32 = 1000;

/// The 16-byte handshake the server sends immediately on accept.
///
/// Bytes 0..8 are the magic `R I V 0x13 0x57 0x9B 0xDF 0x00`. Bytes 8..12
/// are the test dword `0x12345678`. Bytes 12..16 are the test float
/// `2.71828175`. All multi-byte fields are little-endian; a client that
/// reads the test dword back as `0x78563412` knows it is talking to a
/// big-endian peer and must reject the connection.
pub const HANDSHAKE_LEN: usize = 16;
const MAGIC: [u8; 8] = [b'R', b'I', b'V', 0x13, 0x57, 0x9B, 0xDF, 0x00];
/// Also the value an image-stream restart request must echo back in its
/// `arg` field; the session layer checks it against this same constant.
pub const TEST_DWORD: u32 = 0x1234_5678;
/// A restart `arg` equal to this is the same "wrong endianness" signal
/// the handshake's test dword carries, just observed on a different
/// message.
pub const TEST_DWORD_SWAPPED: u32 = 0x7856_3412;
const TEST_FLOAT: f32 = 2.71828175;

/// Encodes the 16-byte handshake.
pub fn encode_handshake() -> [u8; HANDSHAKE_LEN] {
    let mut buf = [0u8; HANDSHAKE_LEN];
    buf[0..8].copy_from_slice(&MAGIC);
    buf[8..12].copy_from_slice(&TEST_DWORD.to_le_bytes());
    buf[12..16].copy_from_slice(&TEST_FLOAT.to_le_bytes());
    buf
}

/// Validates a handshake a peer sent us, distinguishing a clean mismatch
/// from an explicit "wrong endianness" signal.
pub fn check_handshake(buf: &[u8; HANDSHAKE_LEN]) -> Result<()> {
    if buf[0..8] != MAGIC {
        return Err(RivError::ProtocolViolation(
            "handshake magic mismatch".into(),
        ));
    }
    let dword = u32::from_le_bytes(buf[8..12].try_into().unwrap());
    if dword == TEST_DWORD_SWAPPED {
        return Err(RivError::ProtocolViolation(
            "handshake byte order mismatch".into(),
        ));
    }
    if dword != TEST_DWORD {
        return Err(RivError::ProtocolViolation(
            "handshake test dword mismatch".into(),
        ));
    }
    Ok(())
}

/// Maps an EOF or reset hit while reading to `PeerDisconnected`, which
/// the session layer treats as benign outside an in-progress read; any
/// other I/O failure keeps its `SocketError` shape.
fn classify_io_error(err: std::io::Error) -> RivError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
            RivError::PeerDisconnected
        }
        _ => RivError::SocketError(err),
    }
}

/// Reads and validates the handshake from a freshly accepted socket.
pub async fn read_and_check_handshake<R: AsyncRead + Unpin>(stream: &mut R) -> Result<()> {
    let mut buf = [0u8; HANDSHAKE_LEN];
    stream.read_exact(&mut buf).await.map_err(classify_io_error)?;
    check_handshake(&buf)
}

/// Sends the handshake on a freshly accepted socket.
pub async fn write_handshake<W: AsyncWrite + Unpin>(stream: &mut W) -> Result<()> {
    stream.write_all(&encode_handshake()).await?;
    Ok(())
}

/// Reads the client's request line: a 32-bit length followed by that many
/// bytes of URL-decoded-on-the-wire path/query/fragment text.
pub async fn read_request<R: AsyncRead + Unpin>(stream: &mut R) -> Result<String> {
    let len = stream.read_u32_le().await.map_err(classify_io_error)? as usize;
    if len == 0 {
        return Ok(String::new());
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await.map_err(classify_io_error)?;
    String::from_utf8(buf)
        .map_err(|_| RivError::ProtocolViolation("request is not valid utf-8".into()))
}

/// Writes the client's request line (used by test clients and by the
/// bundled demo client code paths).
pub async fn write_request<W: AsyncWrite + Unpin>(stream: &mut W, request: &str) -> Result<()> {
    stream.write_u32_le(request.len() as u32).await?;
    stream.write_all(request.as_bytes()).await?;
    Ok(())
}

/// Sends the 16-bit status code that answers a request line.
pub async fn write_status<W: AsyncWrite + Unpin>(stream: &mut W, status: u16) -> Result<()> {
    stream.write_u16_le(status).await?;
    Ok(())
}

/// Reads the 16-bit status code that answers a request line.
pub async fn read_status<R: AsyncRead + Unpin>(stream: &mut R) -> Result<u16> {
    stream.read_u16_le().await.map_err(classify_io_error)
}

/// A framed message: `u32 id, u32 body size, body`.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: u32,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(id: u32, body: Vec<u8>) -> Self {
        Message { id, body }
    }

    /// Is this a library control message (id < 1000)?
    pub fn is_control(&self) -> bool {
        self.id < USERMSG_THRESHOLD
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(8 + self.body.len());
        buf.put_u32_le(self.id);
        buf.put_u32_le(self.body.len() as u32);
        buf.put_slice(&self.body);
        buf
    }
}

/// Maximum body size accepted for a framed message, guarding against a
/// malicious or corrupt length field forcing an unbounded allocation.
pub const MAX_MESSAGE_BODY: u32 = 64 * 1024 * 1024;

/// Reads one framed message from the stream.
pub async fn read_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Message> {
    let id = stream.read_u32_le().await.map_err(classify_io_error)?;
    let body_len = stream.read_u32_le().await.map_err(classify_io_error)?;
    if body_len > MAX_MESSAGE_BODY {
        return Err(RivError::ProtocolViolation(format!(
            "message body too large: {body_len}"
        )));
    }
    let mut body = vec![0u8; body_len as usize];
    if body_len > 0 {
        stream.read_exact(&mut body).await.map_err(classify_io_error)?;
    }
    Ok(Message { id, body })
}

/// Writes one framed message to the stream.
pub async fn write_message<W: AsyncWrite + Unpin>(stream: &mut W, msg: &Message) -> Result<()> {
    let encoded = msg.encode();
    stream.write_all(&encoded).await?;
    Ok(())
}

/// One record in the `data_channels` reply: a named, typed data channel.
#[derive(Debug, Clone)]
pub struct DataChannelRecord {
    pub name: String,
    pub channel_type: u16,
    pub subtype: u16,
    pub quality: u8,
}

/// Encodes the body of a `data_channels` reply (`u32 count` then records).
pub fn encode_data_channels(records: &[DataChannelRecord]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u32_le(records.len() as u32);
    for rec in records {
        let name_bytes = rec.name.as_bytes();
        let name_len = name_bytes.len().min(u16::MAX as usize) as u16;
        buf.put_u16_le(name_len);
        buf.put_slice(&name_bytes[..name_len as usize]);
        buf.put_u16_le(rec.channel_type);
        buf.put_u16_le(rec.subtype);
        buf.put_u8(rec.quality);
    }
    buf.to_vec()
}

/// Decodes the body of a `data_channels` reply. Used by test clients and
/// by embedders writing their own viewer against this protocol.
pub fn decode_data_channels(mut body: &[u8]) -> Result<Vec<DataChannelRecord>> {
    if body.len() < 4 {
        return Err(RivError::ProtocolViolation("truncated data_channels".into()));
    }
    let count = body.get_u32_le();
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if body.len() < 2 {
            return Err(RivError::ProtocolViolation("truncated data_channels".into()));
        }
        let name_len = body.get_u16_le() as usize;
        if body.len() < name_len + 2 + 2 + 1 {
            return Err(RivError::ProtocolViolation("truncated data_channels".into()));
        }
        let name = String::from_utf8_lossy(&body[..name_len]).into_owned();
        body.advance(name_len);
        let channel_type = body.get_u16_le();
        let subtype = body.get_u16_le();
        let quality = body.get_u8();
        out.push(DataChannelRecord {
            name,
            channel_type,
            subtype,
            quality,
        });
    }
    Ok(out)
}

/// Encodes the body of an `image_data_blob` message:
/// `u32 subtype, u32 time_code, metadata blob, payload blob`.
pub fn encode_image_data_blob(subtype: u32, time_code: u32, metadata: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(8 + metadata.len() + payload.len());
    buf.put_u32_le(subtype);
    buf.put_u32_le(time_code);
    buf.put_slice(metadata);
    buf.put_slice(payload);
    buf.to_vec()
}

/// Image-stream request op codes, sent client -> server as 5 bytes:
/// `u8 op, u32 arg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStreamOp {
    /// Close the stream gracefully.
    Close,
    /// Restart the stream; `arg` must echo `0x12345678`.
    Restart(u32),
    /// Deliver the next frame, echoing `arg` as its time-code.
    NextFrame(u32),
}

/// Parses a 5-byte image-stream request.
pub fn decode_image_stream_request(bytes: [u8; 5]) -> Result<ImageStreamOp> {
    let op = bytes[0];
    let arg = u32::from_le_bytes(bytes[1..5].try_into().unwrap());
    match op {
        0 => Ok(ImageStreamOp::Close),
        1 => Ok(ImageStreamOp::Restart(arg)),
        2 => Ok(ImageStreamOp::NextFrame(arg)),
        other => Err(RivError::ProtocolViolation(format!(
            "invalid image request code received: {other}"
        ))),
    }
}

/// Reads one 5-byte image-stream request from the stream.
pub async fn read_image_stream_request<R: AsyncRead + Unpin>(stream: &mut R) -> Result<ImageStreamOp> {
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).await.map_err(classify_io_error)?;
    decode_image_stream_request(buf)
}

/// Encodes a 5-byte image-stream request (used by test/demo clients).
pub fn encode_image_stream_request(op: ImageStreamOp) -> [u8; 5] {
    let (code, arg): (u8, u32) = match op {
        ImageStreamOp::Close => (0, 0),
        ImageStreamOp::Restart(a) => (1, a),
        ImageStreamOp::NextFrame(a) => (2, a),
    };
    let mut buf = [0u8; 5];
    buf[0] = code;
    buf[1..5].copy_from_slice(&arg.to_le_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_round_trips() {
        let hs = encode_handshake();
        assert!(check_handshake(&hs).is_ok());
        assert_eq!(
            hs,
            [0x52, 0x49, 0x56, 0x13, 0x57, 0x9B, 0xDF, 0x00, 0x78, 0x56, 0x34, 0x12, 0x4D, 0xF8, 0x2D, 0x40]
        );
    }

    #[test]
    fn handshake_rejects_swapped_dword() {
        let mut hs = encode_handshake();
        hs[8..12].copy_from_slice(&TEST_DWORD_SWAPPED.to_le_bytes());
        assert!(matches!(
            check_handshake(&hs),
            Err(RivError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn data_channels_round_trip() {
        let records = vec![DataChannelRecord {
            name: "rgb_raw".into(),
            channel_type: 1,
            subtype: 1,
            quality: 100,
        }];
        let body = encode_data_channels(&records);
        let decoded = decode_data_channels(&body).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].name, "rgb_raw");
        assert_eq!(decoded[0].channel_type, 1);
        assert_eq!(decoded[0].subtype, 1);
        assert_eq!(decoded[0].quality, 100);
    }

    #[test]
    fn image_stream_request_round_trip() {
        for op in [
            ImageStreamOp::Close,
            ImageStreamOp::Restart(0x1234_5678),
            ImageStreamOp::NextFrame(77),
        ] {
            let bytes = encode_image_stream_request(op);
            assert_eq!(decode_image_stream_request(bytes).unwrap(), op);
        }
    }

    #[test]
    fn restart_rejects_swapped_arg() {
        let bytes = encode_image_stream_request(ImageStreamOp::Restart(TEST_DWORD_SWAPPED));
        let op = decode_image_stream_request(bytes).unwrap();
        // decoding succeeds at the wire level; the session layer is the
        // one that checks the echoed value against TEST_DWORD and
        // distinguishes the swapped-bytes case from a plain bad value.
        assert_eq!(op, ImageStreamOp::Restart(TEST_DWORD_SWAPPED));
    }

    #[test]
    fn message_encode_decode_shape() {
        let msg = Message::new(100, vec![]);
        let encoded = msg.encode();
        assert_eq!(&encoded[0..4], &100u32.to_le_bytes());
        assert_eq!(&encoded[4..8], &0u32.to_le_bytes());
    }
}
