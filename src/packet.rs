//! The packet module, containing the logical packet model and the wire codec.
//! packet 模块，包含逻辑包模型与线路编解码器。

use bytes::{Buf, BufMut, Bytes};

use crate::error::{Error, Result};

pub mod codec;

#[cfg(test)]
mod tests;

/// The size of the big-endian length prefix on every frame.
/// 每个帧的大端长度前缀的大小。
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// The payload length that marks a heartbeat frame.
/// 标记心跳帧的载荷长度。
pub const HEARTBEAT_PAYLOAD_SIZE: usize = 4;

/// The fixed header of an envelope payload: kind, flow, flags, id length.
/// Always larger than a heartbeat payload, so the two frame shapes can
/// never be confused.
///
/// 信封载荷的固定头：kind、flow、flags、id长度。
/// 恒大于心跳载荷，因此两种帧形态不会混淆。
pub const ENVELOPE_HEADER_SIZE: usize = 5;

const KIND_COMMAND: u8 = 2;
const KIND_MESSAGE: u8 = 3;

const FLAG_NEED_ACK: u8 = 0b0000_0001;

/// The direction of a command or message.
/// 指令或消息的方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Initiated by the sender, may require acknowledgment.
    /// 由发送方发起，可能需要确认。
    Request,
    /// Correlates back to a request by id; acknowledges it.
    /// 通过id关联回请求；对其进行确认。
    Response,
}

impl Flow {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Flow::Request),
            1 => Some(Flow::Response),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Flow::Request => 0,
            Flow::Response => 1,
        }
    }
}

/// The common body of commands and messages: a stable correlation id,
/// a flow direction, an acknowledgment requirement, and an opaque body.
///
/// 指令与消息的公共结构：稳定的关联id、方向、确认要求与不透明的消息体。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Correlates retries with acknowledgments. Never empty on the wire.
    /// 用于将重试与确认相关联。在线路上永不为空。
    pub id: String,
    pub flow: Flow,
    pub need_ack: bool,
    pub body: Bytes,
}

/// A complete logical packet exchanged with clients.
/// 与客户端交换的完整逻辑包。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A liveness probe carrying an opaque value which is echoed back.
    /// 携带一个会被原样回显的不透明值的存活探测。
    Heartbeat { value: i32 },
    /// A control instruction (login, kick, subscribe, ...).
    /// 控制指令（登录、踢出、订阅等）。
    Command(Envelope),
    /// An application chat message.
    /// 应用层聊天消息。
    Message(Envelope),
}

impl Packet {
    // --- Smart constructors ---
    // 智能构造函数

    /// Creates a heartbeat packet.
    /// 创建心跳包。
    pub fn new_heartbeat(value: i32) -> Self {
        Packet::Heartbeat { value }
    }

    /// Creates a command packet.
    /// 创建指令包。
    pub fn new_command(id: impl Into<String>, flow: Flow, need_ack: bool, body: Bytes) -> Self {
        Packet::Command(Envelope {
            id: id.into(),
            flow,
            need_ack,
            body,
        })
    }

    /// Creates a message packet.
    /// 创建消息包。
    pub fn new_message(id: impl Into<String>, flow: Flow, need_ack: bool, body: Bytes) -> Self {
        Packet::Message(Envelope {
            id: id.into(),
            flow,
            need_ack,
            body,
        })
    }

    /// The stable identifier used to correlate retries with
    /// acknowledgments. Heartbeats have none.
    ///
    /// 用于将重试与确认相关联的稳定标识。心跳没有该标识。
    pub fn id(&self) -> Option<&str> {
        match self {
            Packet::Heartbeat { .. } => None,
            Packet::Command(envelope) | Packet::Message(envelope) => Some(&envelope.id),
        }
    }

    /// Whether the sender expects an acknowledgment.
    /// 发送方是否期待确认。
    pub fn need_ack(&self) -> bool {
        match self {
            Packet::Heartbeat { .. } => false,
            Packet::Command(envelope) | Packet::Message(envelope) => envelope.need_ack,
        }
    }

    /// The flow direction, if the packet carries one.
    /// 包携带的方向（如有）。
    pub fn flow(&self) -> Option<Flow> {
        match self {
            Packet::Heartbeat { .. } => None,
            Packet::Command(envelope) | Packet::Message(envelope) => Some(envelope.flow),
        }
    }

    /// The envelope, for command and message packets.
    /// 指令与消息包的信封。
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Packet::Heartbeat { .. } => None,
            Packet::Command(envelope) | Packet::Message(envelope) => Some(envelope),
        }
    }

    /// The encoded payload length, excluding the length prefix.
    /// 编码后的载荷长度，不含长度前缀。
    pub(crate) fn payload_len(&self) -> usize {
        match self {
            Packet::Heartbeat { .. } => HEARTBEAT_PAYLOAD_SIZE,
            Packet::Command(envelope) | Packet::Message(envelope) => {
                ENVELOPE_HEADER_SIZE + envelope.id.len() + envelope.body.len()
            }
        }
    }

    /// Encodes the payload (everything after the length prefix).
    /// 编码载荷（长度前缀之后的全部内容）。
    pub(crate) fn encode_payload<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        match self {
            Packet::Heartbeat { value } => {
                buf.put_i32(*value);
                Ok(())
            }
            Packet::Command(envelope) | Packet::Message(envelope) => {
                if envelope.id.is_empty() || envelope.id.len() > u16::MAX as usize {
                    return Err(Error::InvalidPacket);
                }
                let kind = match self {
                    Packet::Command(_) => KIND_COMMAND,
                    _ => KIND_MESSAGE,
                };
                let mut flags = 0u8;
                if envelope.need_ack {
                    flags |= FLAG_NEED_ACK;
                }
                buf.put_u8(kind);
                buf.put_u8(envelope.flow.as_u8());
                buf.put_u8(flags);
                buf.put_u16(envelope.id.len() as u16);
                buf.put_slice(envelope.id.as_bytes());
                buf.put_slice(&envelope.body);
                Ok(())
            }
        }
    }

    /// Decodes an envelope payload (the `length > 4` frame shape).
    /// 解码信封载荷（`length > 4` 的帧形态）。
    pub(crate) fn decode_payload(mut payload: &[u8]) -> Result<Self> {
        if payload.len() < ENVELOPE_HEADER_SIZE {
            return Err(Error::InvalidFrame);
        }

        let kind = payload.get_u8();
        let flow = Flow::from_u8(payload.get_u8()).ok_or(Error::InvalidFrame)?;
        let flags = payload.get_u8();
        let id_len = payload.get_u16() as usize;

        if id_len == 0 || payload.remaining() < id_len {
            return Err(Error::InvalidFrame);
        }
        let id = std::str::from_utf8(&payload[..id_len])
            .map_err(|_| Error::InvalidFrame)?
            .to_owned();
        payload.advance(id_len);

        let envelope = Envelope {
            id,
            flow,
            need_ack: flags & FLAG_NEED_ACK != 0,
            body: Bytes::copy_from_slice(payload),
        };

        match kind {
            KIND_COMMAND => Ok(Packet::Command(envelope)),
            KIND_MESSAGE => Ok(Packet::Message(envelope)),
            _ => Err(Error::InvalidFrame),
        }
    }
}
