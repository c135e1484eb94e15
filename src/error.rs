//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use std::time::Duration;
use thiserror::Error;

/// The primary error type for the broker reliability core.
/// broker可靠性核心的主要错误类型。
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying I/O error occurred.
    /// 发生了底层的I/O错误。
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A time-wheel slot rejected a new task because it is at capacity.
    /// Surfaced to the submitter; the wheel never retries internally.
    ///
    /// 时间轮槽位已满，拒绝了新任务。
    /// 该错误直接返回给提交方，时间轮内部不会重试。
    #[error("Scheduler slot is full")]
    QueueFull,

    /// A submitted delay exceeds the schedulable span of the wheel.
    /// 提交的延迟超出了时间轮的可调度范围。
    #[error("Invalid delay {delay:?}, schedulable span is {max:?}")]
    InvalidDelay { delay: Duration, max: Duration },

    /// A received frame was malformed and could not be decoded.
    /// 接收到的帧格式错误，无法解码。
    #[error("Invalid frame received")]
    InvalidFrame,

    /// A frame declared a length beyond the configured maximum.
    /// 帧声明的长度超过了配置的最大值。
    #[error("Frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// A packet is not valid for the requested operation, e.g. a message
    /// without an id submitted for acknowledged delivery.
    ///
    /// 包对于请求的操作无效，例如将没有id的消息提交给确认投递。
    #[error("Invalid packet")]
    InvalidPacket,

    /// The connection is closed or closing.
    /// 连接已关闭或正在关闭。
    #[error("Connection is closed")]
    ConnectionClosed,

    /// The time wheel has been stopped and accepts no further tasks.
    /// 时间轮已停止，不再接受任务。
    #[error("Time wheel is stopped")]
    WheelStopped,
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;
        match err {
            Error::Io(e) => e,
            Error::QueueFull => ErrorKind::WouldBlock.into(),
            Error::InvalidDelay { .. } => ErrorKind::InvalidInput.into(),
            Error::InvalidFrame => ErrorKind::InvalidData.into(),
            Error::FrameTooLarge { .. } => ErrorKind::InvalidData.into(),
            Error::InvalidPacket => ErrorKind::InvalidInput.into(),
            Error::ConnectionClosed => ErrorKind::ConnectionReset.into(),
            Error::WheelStopped => ErrorKind::NotConnected.into(),
        }
    }
}
