//! 长度前缀帧的编解码器，支持跨读取边界的部分帧。
//! Codec for length-prefixed frames, tolerant of frames straddling reads.
//!
//! 线路格式（大端）：
//! Wire format (big-endian):
//!
//! ```text
//! Frame := Length(u32) Payload(bytes[Length])
//!   Length == 4 -> Payload is a 4-byte heartbeat value (i32)
//!   Length >  4 -> Payload is an encoded envelope
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::config::CodecConfig;
use crate::error::{Error, Result};
use crate::packet::{HEARTBEAT_PAYLOAD_SIZE, LENGTH_PREFIX_SIZE, Packet};

/// Stateless frame encoder plus a factory for per-connection decoders.
/// 无状态的帧编码器，同时是每连接解码器的工厂。
#[derive(Debug, Clone)]
pub struct Codec {
    max_frame_size: usize,
}

impl Codec {
    /// Creates a codec from configuration.
    /// 根据配置创建编解码器。
    pub fn new(config: &CodecConfig) -> Self {
        Self {
            max_frame_size: config.max_frame_size.max(HEARTBEAT_PAYLOAD_SIZE),
        }
    }

    /// Encodes one packet into a complete frame.
    ///
    /// Heartbeats produce the fixed 8-byte frame; everything else is
    /// framed as a 4-byte length followed by the envelope payload.
    ///
    /// 将一个包编码为完整的帧。
    ///
    /// 心跳产生固定的8字节帧；其余内容被编码为4字节长度加信封载荷。
    pub fn encode(&self, packet: &Packet) -> Result<Bytes> {
        let payload_len = packet.payload_len();
        if payload_len > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                len: payload_len,
                max: self.max_frame_size,
            });
        }

        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload_len);
        buf.put_u32(payload_len as u32);
        packet.encode_payload(&mut buf)?;
        debug_assert_eq!(buf.len(), LENGTH_PREFIX_SIZE + payload_len);
        Ok(buf.freeze())
    }

    /// Creates a fresh decoder holding one connection's read buffer.
    /// 创建一个持有单个连接读缓冲的新解码器。
    pub fn decoder(&self) -> Decoder {
        Decoder {
            buf: BytesMut::new(),
            max_frame_size: self.max_frame_size,
        }
    }
}

/// Per-connection incremental frame decoder.
///
/// Frames may straddle network reads: the decoder consumes only
/// complete frames and resumes from wherever it left off on the next
/// chunk.
///
/// 每连接的增量帧解码器。
///
/// 帧可能跨越多次网络读取：解码器只消费完整的帧，
/// 并在下一块数据到来时从上次停下的位置继续。
#[derive(Debug)]
pub struct Decoder {
    buf: BytesMut,
    max_frame_size: usize,
}

impl Decoder {
    /// Appends freshly read bytes and drains every complete frame.
    ///
    /// A malformed or oversized frame is a decode error, fatal to the
    /// connection; an incomplete frame simply stays buffered.
    ///
    /// 追加新读取的字节并排空所有完整的帧。
    ///
    /// 格式错误或超大的帧是解码错误，对连接是致命的；
    /// 不完整的帧只会留在缓冲中。
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Packet>> {
        self.buf.extend_from_slice(chunk);

        let mut packets = Vec::new();
        while let Some(packet) = self.next_packet()? {
            packets.push(packet);
        }
        if !packets.is_empty() {
            trace!(
                count = packets.len(),
                buffered = self.buf.len(),
                "Decoded frames"
            );
        }
        Ok(packets)
    }

    /// Called at end of stream: leftover buffered bytes mean the peer
    /// died mid-frame.
    ///
    /// 在流结束时调用：缓冲中残留的字节意味着对端死在了帧中间。
    pub fn finish(&self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidFrame)
        }
    }

    /// The number of bytes currently buffered.
    /// 当前缓冲的字节数。
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Tries to take one complete frame off the front of the buffer.
    /// 尝试从缓冲前端取走一个完整的帧。
    fn next_packet(&mut self) -> Result<Option<Packet>> {
        if self.buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        // Peek the prefix without consuming it, in case the payload has
        // not fully arrived yet.
        //
        // 只窥视前缀而不消费它，以防载荷尚未完全到达。
        let declared = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        let declared = declared as usize;

        if declared < HEARTBEAT_PAYLOAD_SIZE {
            return Err(Error::InvalidFrame);
        }
        if declared > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                len: declared,
                max: self.max_frame_size,
            });
        }
        if self.buf.len() < LENGTH_PREFIX_SIZE + declared {
            return Ok(None);
        }

        self.buf.advance(LENGTH_PREFIX_SIZE);
        let payload = self.buf.split_to(declared);

        if declared == HEARTBEAT_PAYLOAD_SIZE {
            let value = i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            return Ok(Some(Packet::Heartbeat { value }));
        }

        Packet::decode_payload(&payload).map(Some)
    }
}
