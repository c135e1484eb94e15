//! 定义了broker可靠性核心的可配置参数。
//! Defines configurable parameters for the broker reliability core.

use std::time::Duration;

/// A structure containing all configurable parameters for the core.
///
/// 包含核心所有可配置参数的结构体。
#[derive(Debug, Clone)]
pub struct Config {
    /// Time-wheel scheduling parameters.
    /// 时间轮调度相关参数。
    pub wheel: WheelConfig,

    /// Wire-format parameters.
    /// 线路格式相关参数。
    pub codec: CodecConfig,

    /// Heartbeat supervision parameters.
    /// 心跳监护相关参数。
    pub heartbeat: HeartbeatConfig,

    /// Message retry parameters.
    /// 消息重试相关参数。
    pub retry: RetryConfig,
}

/// Time-wheel scheduling parameters.
///
/// 时间轮调度相关参数。
#[derive(Debug, Clone)]
pub struct WheelConfig {
    /// The duration of a single tick. Also the scheduling granularity:
    /// a task fires at the first tick boundary at or after its deadline.
    ///
    /// 单个tick的时长。同时是调度粒度：
    /// 任务在其截止时间之后的第一个tick边界触发。
    pub tick: Duration,

    /// The number of slots in the wheel ring.
    /// 时间轮环上的槽位数量。
    pub slot_count: usize,

    /// The maximum number of tasks a single slot will hold. Submissions
    /// to a full slot fail fast with `Error::QueueFull`.
    ///
    /// 单个槽位可容纳的最大任务数。
    /// 向已满槽位提交会立即以 `Error::QueueFull` 失败。
    pub max_tasks_per_slot: usize,

    /// The maximum delay accepted by `submit`. Must not exceed
    /// `tick * slot_count`, the span of one full wheel rotation.
    ///
    /// `submit` 接受的最大延迟。不得超过时间轮一整圈的跨度
    /// `tick * slot_count`。
    pub max_submit_delay: Duration,

    /// The number of tasks allowed to execute concurrently on the
    /// worker pool. A slow task occupies one worker, never the driver.
    ///
    /// 工作池上允许并发执行的任务数量。
    /// 慢任务只会占用一个worker，绝不会占用驱动线程。
    pub max_workers: usize,
}

/// Wire-format parameters.
///
/// 线路格式相关参数。
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// The maximum payload length a frame may declare. Frames beyond
    /// this are treated as malformed and the connection is torn down.
    ///
    /// 帧可声明的最大载荷长度。
    /// 超过此值的帧被视为格式错误，连接将被关闭。
    pub max_frame_size: usize,
}

/// Heartbeat supervision parameters.
///
/// 心跳监护相关参数。
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// The interval at which each connection's heartbeat task re-checks
    /// the last observed heartbeat.
    ///
    /// 每个连接的心跳任务复查最近心跳时间的间隔。
    pub interval: Duration,

    /// The silence threshold: a connection with no inbound heartbeat for
    /// this long is closed.
    ///
    /// 静默阈值：超过此时长未收到心跳的连接会被关闭。
    pub timeout: Duration,
}

/// Message retry parameters.
///
/// The retry cadence is a fixed interval; the implicit attempt cap is
/// `ceil(timeout / interval)`, after which the message is resaved to
/// offline storage.
///
/// 消息重试相关参数。
///
/// 重试节奏为固定间隔；隐含的尝试上限为 `ceil(timeout / interval)`，
/// 超过后消息会被转存到离线存储。
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// The fixed interval between resend attempts.
    /// 两次重发尝试之间的固定间隔。
    pub interval: Duration,

    /// The total time after the first send before the server gives up
    /// and resaves the message.
    ///
    /// 从首次发送起，服务器放弃并转存消息之前的总时长。
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wheel: WheelConfig::default(),
            codec: CodecConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            slot_count: 512,
            max_tasks_per_slot: 4096,
            // One full rotation at the default tick/slot sizing: 51.2s
            // 默认tick/槽位配置下的一整圈：51.2秒
            max_submit_delay: Duration::from_millis(100) * 512,
            max_workers: 64,
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 64 * 1024,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            // Six attempts at the default interval before resaving
            // 默认间隔下重试六次后转存
            timeout: Duration::from_secs(60),
        }
    }
}
