//! 定义了单个客户端连接的状态与传输抽象。
//! Defines per-client connection state and the transport abstraction.

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// The stable identifier of one accepted connection.
/// 一个已接受连接的稳定标识。
pub type ConnectionId = u64;

/// Generates a fresh random connection id.
/// 生成一个新的随机连接id。
pub fn generate_connection_id() -> ConnectionId {
    rand::random()
}

/// The write/close side of a transport, as seen by the reliability core.
///
/// The gateway owns the read side; tasks executing on the worker pool
/// only ever write and close.
///
/// 可靠性核心所见的传输写入/关闭侧。
///
/// 网关持有读取侧；在工作池上执行的任务只会写入和关闭。
#[async_trait]
pub trait Link: Send + Sync {
    /// Writes one complete frame to the peer.
    /// 向对端写入一个完整的帧。
    async fn write(&self, frame: Bytes) -> std::io::Result<()>;

    /// Shuts the transport down. Must tolerate repeated calls.
    /// 关闭传输。必须容忍重复调用。
    async fn close(&self);

    /// The peer's address, when the transport has one.
    /// 对端地址（如传输具备）。
    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// Per-socket record shared between the gateway and scheduled tasks.
///
/// Every field mutated from more than one context is atomic; the
/// heartbeat timestamp in particular is written by the read loop and
/// read by the heartbeat task concurrently.
///
/// 网关与调度任务之间共享的每套接字记录。
///
/// 所有被多个上下文修改的字段都是原子的；
/// 心跳时间戳尤其会被读循环写入、被心跳任务并发读取。
pub struct Connection {
    id: ConnectionId,
    link: Box<dyn Link>,
    /// All heartbeat arithmetic is an offset in ms from this instant.
    /// 所有心跳运算都是相对该时刻的毫秒偏移。
    created: Instant,
    last_heartbeat_ms: AtomicU64,
    app_id: AtomicU64,
    user_id: AtomicU64,
    device_id: AtomicU64,
    logged_in: AtomicBool,
    closed: AtomicBool,
}

impl Connection {
    /// Creates the record for a freshly accepted socket.
    /// 为新接受的套接字创建记录。
    pub fn new(id: ConnectionId, link: Box<dyn Link>) -> Arc<Self> {
        Arc::new(Self {
            id,
            link,
            created: Instant::now(),
            last_heartbeat_ms: AtomicU64::new(0),
            app_id: AtomicU64::new(0),
            user_id: AtomicU64::new(0),
            device_id: AtomicU64::new(0),
            logged_in: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.link.remote_addr()
    }

    /// Records a successful login with the peer's identity.
    /// 记录一次成功登录及对端身份。
    pub fn mark_logged_in(&self, app_id: u64, user_id: u64, device_id: u64) {
        self.app_id.store(app_id, Ordering::Relaxed);
        self.user_id.store(user_id, Ordering::Relaxed);
        self.device_id.store(device_id, Ordering::Relaxed);
        self.logged_in.store(true, Ordering::Release);
        debug!(
            connection_id = self.id,
            app_id, user_id, device_id, "Connection logged in"
        );
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::Acquire)
    }

    pub fn app_id(&self) -> u64 {
        self.app_id.load(Ordering::Relaxed)
    }

    pub fn user_id(&self) -> u64 {
        self.user_id.load(Ordering::Relaxed)
    }

    pub fn device_id(&self) -> u64 {
        self.device_id.load(Ordering::Relaxed)
    }

    /// Updates the last-observed-heartbeat timestamp.
    /// 更新最近一次观测到心跳的时间戳。
    pub fn touch_heartbeat(&self, now: Instant) {
        let offset = now.saturating_duration_since(self.created).as_millis() as u64;
        self.last_heartbeat_ms.store(offset, Ordering::Release);
        trace!(connection_id = self.id, offset_ms = offset, "Heartbeat observed");
    }

    /// Time elapsed since the last observed heartbeat (or since accept,
    /// when none has arrived yet).
    ///
    /// 自最近一次观测到心跳以来的时长（尚未收到任何心跳时，自接受起算）。
    pub fn heartbeat_elapsed(&self, now: Instant) -> std::time::Duration {
        let now_ms = now.saturating_duration_since(self.created).as_millis() as u64;
        let last_ms = self.last_heartbeat_ms.load(Ordering::Acquire);
        std::time::Duration::from_millis(now_ms.saturating_sub(last_ms))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Writes one encoded frame, rejecting closed connections.
    /// 写入一个已编码的帧，拒绝已关闭的连接。
    pub async fn write(&self, frame: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        // Link implementations serialize their own writes, so frames
        // never interleave.
        // Link 实现自行串行化写入，帧不会交错。
        self.link.write(frame).await.map_err(Error::Io)
    }

    /// Closes the connection. Safe to call repeatedly and concurrently
    /// with in-flight task executions.
    ///
    /// 关闭连接。可重复调用，并可与执行中的任务安全并发。
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.link.close().await;
        debug!(connection_id = self.id, "Connection closed");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr())
            .field("logged_in", &self.is_logged_in())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A `Link` over the write half of a TCP stream.
/// 基于TCP流写半部的 `Link`。
pub struct TcpLink {
    writer: Mutex<OwnedWriteHalf>,
    remote_addr: Option<SocketAddr>,
}

impl TcpLink {
    pub fn new(writer: OwnedWriteHalf, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            writer: Mutex::new(writer),
            remote_addr,
        }
    }
}

#[async_trait]
impl Link for TcpLink {
    async fn write(&self, frame: Bytes) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await
    }

    async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            warn!(error = %e, "TCP shutdown failed");
        }
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}
