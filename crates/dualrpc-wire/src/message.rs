//! Wire protocol message types.
//!
//! A frame payload starts with a one-byte message type. Calls and returns
//! carry little-endian request IDs and a variant-encoded body:
//!
//! ```text
//! CALL_PROC / CALL_FUNC  [type][u32 request][u32 object][u8 n][name; n][args]
//! RETURN                 [type][u32 request][result]
//! ```
//!
//! PING, PONG and DELOBJ are reserved: they are recognised but carry no
//! behaviour.

use crate::error::{WireError, WireResult};
use crate::registry::ObjectRegistry;
use crate::variant::{self, truncate_utf8, Variant};
use crate::{ObjectId, RequestId, SessionId};
use bytes::{Buf, BufMut};

/// Longest method name a call can carry.
pub const MAX_METHOD_NAME_LEN: usize = 255;

/// Message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Ping = 0,
    Pong = 1,
    /// Call without a reply.
    CallProc = 10,
    /// Call expecting a RETURN.
    CallFunc = 11,
    Return = 20,
    DelObj = 30,
}

impl MessageType {
    /// Map a wire tag to its message type.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => MessageType::Ping,
            1 => MessageType::Pong,
            10 => MessageType::CallProc,
            11 => MessageType::CallFunc,
            20 => MessageType::Return,
            30 => MessageType::DelObj,
            _ => return None,
        })
    }
}

/// A decoded frame payload.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Call(CallMessage),
    Return(ReturnMessage),
    /// A reserved message type; its body is ignored.
    Reserved(MessageType),
}

/// An inbound or outbound method call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallMessage {
    /// CALL_PROC when true: the caller does not wait for a result.
    pub oneway: bool,
    pub request_id: RequestId,
    /// Target in the receiver's registry.
    pub object_id: ObjectId,
    /// Empty for the object's default call.
    pub method: String,
    /// Packed call arguments.
    pub args: Variant,
}

/// The result of a CALL_FUNC.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnMessage {
    pub request_id: RequestId,
    pub value: Variant,
}

impl WireMessage {
    /// Wire tag this message encodes with.
    pub fn message_type(&self) -> MessageType {
        match self {
            WireMessage::Call(call) if call.oneway => MessageType::CallProc,
            WireMessage::Call(_) => MessageType::CallFunc,
            WireMessage::Return(_) => MessageType::Return,
            WireMessage::Reserved(kind) => *kind,
        }
    }
}

/// Encode a message into a frame payload.
///
/// Objects inside the arguments or the result are registered in `registry`.
pub fn encode_message(msg: &WireMessage, registry: &mut ObjectRegistry) -> WireResult<Vec<u8>> {
    let mut out = Vec::new();
    out.put_u8(msg.message_type() as u8);
    match msg {
        WireMessage::Call(call) => {
            out.put_u32_le(call.request_id);
            out.put_u32_le(call.object_id);
            let name = truncate_utf8(&call.method, MAX_METHOD_NAME_LEN);
            out.put_u8(name.len() as u8);
            out.put_slice(name.as_bytes());
            variant::encode(&call.args, registry, &mut out)?;
        }
        WireMessage::Return(ret) => {
            out.put_u32_le(ret.request_id);
            variant::encode(&ret.value, registry, &mut out)?;
        }
        WireMessage::Reserved(_) => {}
    }
    Ok(out)
}

/// Decode a frame payload. Object references become remote references bound
/// to `session_id`.
pub fn decode_message(payload: &[u8], session_id: SessionId) -> WireResult<WireMessage> {
    let mut buf = payload;
    if !buf.has_remaining() {
        return Err(WireError::InvalidEncoding("empty frame".to_string()));
    }
    let tag = buf.get_u8();
    let kind = MessageType::from_tag(tag)
        .ok_or_else(|| WireError::InvalidEncoding(format!("unknown message type {tag}")))?;

    match kind {
        MessageType::CallProc | MessageType::CallFunc => {
            if buf.remaining() < 9 {
                return Err(WireError::InvalidEncoding("truncated call header".to_string()));
            }
            let request_id = buf.get_u32_le();
            let object_id = buf.get_u32_le();
            let name_len = buf.get_u8() as usize;
            if buf.remaining() < name_len {
                return Err(WireError::InvalidEncoding("truncated method name".to_string()));
            }
            let method = String::from_utf8_lossy(&buf[..name_len]).into_owned();
            buf.advance(name_len);
            let (args, _) = variant::decode(buf, session_id)?;
            Ok(WireMessage::Call(CallMessage {
                oneway: kind == MessageType::CallProc,
                request_id,
                object_id,
                method,
                args,
            }))
        }
        MessageType::Return => {
            if buf.remaining() < 4 {
                return Err(WireError::InvalidEncoding("truncated return header".to_string()));
            }
            let request_id = buf.get_u32_le();
            let (value, _) = variant::decode(buf, session_id)?;
            Ok(WireMessage::Return(ReturnMessage { request_id, value }))
        }
        reserved => Ok(WireMessage::Reserved(reserved)),
    }
}
