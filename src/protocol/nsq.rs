//! NSQ TCP protocol (V2).
//!
//! Commands are newline terminated text, optionally followed by a size
//! prefixed body. Every server frame is `[size][frame type][data]`.

use super::{FrameReader, ProtocolError};
use bytes::{BufMut, Bytes, BytesMut};

/// Sent once by the client right after connecting.
pub const MAGIC_V2: &[u8] = b"  V2";

pub const FRAME_TYPE_RESPONSE: i32 = 0;
pub const FRAME_TYPE_ERROR: i32 = 1;
pub const FRAME_TYPE_MESSAGE: i32 = 2;

pub const RESPONSE_OK: &[u8] = b"OK";
pub const HEARTBEAT: &[u8] = b"_heartbeat_";

pub const MESSAGE_ID_LEN: usize = 16;

const MAX_NAME_LEN: usize = 64;
const EPHEMERAL_SUFFIX: &str = "#ephemeral";

pub type MessageId = [u8; MESSAGE_ID_LEN];

/// Check a topic or channel name against the characters nsqd accepts.
pub fn validate_name(name: &str) -> Result<(), ProtocolError> {
    let base = name.strip_suffix(EPHEMERAL_SUFFIX).unwrap_or(name);
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !base.is_empty()
        && base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ProtocolError::Malformed(format!("invalid nsq name '{name}'")))
    }
}

pub fn encode_pub(topic: &str, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(10 + topic.len() + body.len());
    buf.put_slice(b"PUB ");
    buf.put_slice(topic.as_bytes());
    buf.put_u8(b'\n');
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
    buf.freeze()
}

pub fn encode_sub(topic: &str, channel: &str) -> Bytes {
    Bytes::from(format!("SUB {topic} {channel}\n"))
}

pub fn encode_rdy(count: u32) -> Bytes {
    Bytes::from(format!("RDY {count}\n"))
}

pub fn encode_fin(id: &MessageId) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + MESSAGE_ID_LEN);
    buf.put_slice(b"FIN ");
    buf.put_slice(id);
    buf.put_u8(b'\n');
    buf.freeze()
}

pub fn encode_nop() -> Bytes {
    Bytes::from_static(b"NOP\n")
}

pub fn encode_cls() -> Bytes {
    Bytes::from_static(b"CLS\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub timestamp: i64,
    pub attempts: u16,
    pub id: MessageId,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Response(Bytes),
    Error(String),
    Message(Message),
}

impl Frame {
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Frame::Response(data) if data.as_ref() == HEARTBEAT)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Frame::Response(data) if data.as_ref() == RESPONSE_OK)
    }
}

/// Decode a frame body (everything after the size prefix).
pub fn decode_frame(frame: Bytes) -> Result<Frame, ProtocolError> {
    let mut reader = FrameReader::new(frame);
    match reader.i32()? {
        FRAME_TYPE_RESPONSE => Ok(Frame::Response(reader.rest())),
        FRAME_TYPE_ERROR => Ok(Frame::Error(
            String::from_utf8_lossy(&reader.rest()).into_owned(),
        )),
        FRAME_TYPE_MESSAGE => {
            let timestamp = reader.i64()?;
            let attempts = reader.u16()?;
            let mut id = [0u8; MESSAGE_ID_LEN];
            id.copy_from_slice(&reader.take(MESSAGE_ID_LEN)?);
            Ok(Frame::Message(Message {
                timestamp,
                attempts,
                id,
                body: reader.rest(),
            }))
        }
        other => Err(ProtocolError::Malformed(format!(
            "unknown nsq frame type {other}"
        ))),
    }
}
