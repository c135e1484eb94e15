//! 消息重试：带上限的固定间隔重发，放弃时转存离线。
//! Message retry: bounded fixed-interval resending, with offline resave
//! on give-up.
//!
//! 每个未确认的出站消息对应一个调度任务。确认与重发之间的竞争以
//! 确认为准：任务在动作前检查原子的acked标志。
//!
//! One scheduled task per unacknowledged outbound message. In the race
//! between an acknowledgment and a concurrently-firing resend, the
//! acknowledgment wins: the task checks the atomic acked flag before
//! acting.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::RetryConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::packet::codec::Codec;
use crate::wheel::{Task, TaskDecision, TimeWheel};

/// Collaborator that takes custody of messages the retry server gives
/// up on, so they are resaved for offline delivery rather than dropped.
///
/// 接管重试服务器放弃的消息的协作方，将其转存用于离线投递而非丢弃。
#[async_trait]
pub trait OfflineStore: Send + Sync {
    async fn resave(&self, packet: &Packet, connection: &Connection);
}

/// Tracks every outbound message awaiting acknowledgment and resends
/// it on a fixed interval until acked or timed out.
///
/// 跟踪每个等待确认的出站消息，按固定间隔重发，直至确认或超时。
pub struct MessageRetryServer {
    wheel: Arc<TimeWheel>,
    codec: Codec,
    config: RetryConfig,
    store: Arc<dyn OfflineStore>,
    tasks: Arc<DashMap<String, Arc<RetryTask>>>,
}

impl MessageRetryServer {
    /// Creates a retry server scheduling on the given wheel.
    /// 创建一个在给定时间轮上调度的重试服务器。
    pub fn new(
        wheel: Arc<TimeWheel>,
        codec: Codec,
        config: RetryConfig,
        store: Arc<dyn OfflineStore>,
    ) -> Self {
        Self {
            wheel,
            codec,
            config,
            store,
            tasks: Arc::new(DashMap::new()),
        }
    }

    /// Registers an already-sent message for acknowledged delivery.
    ///
    /// Rejects packets without an id and closed connections. Idempotent
    /// per message id: the first registration stays authoritative.
    ///
    /// 将一条已发送的消息登记为需确认投递。
    ///
    /// 拒绝无id的包与已关闭的连接。按消息id幂等：首次登记保持权威。
    pub fn submit(
        &self,
        packet: Packet,
        connection: Arc<Connection>,
        first_send: Instant,
    ) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        let Some(id) = packet.id().map(str::to_owned) else {
            return Err(Error::InvalidPacket);
        };
        if connection.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let task = match self.tasks.entry(id.clone()) {
            Entry::Occupied(_) => {
                trace!(message_id = %id, "Message already tracked for retry");
                return Ok(());
            }
            Entry::Vacant(vacant) => {
                let task = Arc::new(RetryTask {
                    packet,
                    connection,
                    first_send,
                    interval: self.config.interval,
                    timeout: self.config.timeout,
                    acked: AtomicBool::new(false),
                    codec: self.codec.clone(),
                    store: self.store.clone(),
                    registry: self.tasks.clone(),
                });
                vacant.insert(task.clone());
                task
            }
        };

        match self.wheel.submit(task, self.config.interval) {
            Ok(slot) => {
                trace!(message_id = %id, slot, "Message registered for retry");
                Ok(())
            }
            Err(e) => {
                self.tasks.remove(&id);
                Err(e)
            }
        }
    }

    /// Marks a message acknowledged and removes it from tracking.
    ///
    /// A retry task executing concurrently observes the flag and breaks
    /// without resending.
    ///
    /// 将消息标记为已确认并移出跟踪。
    ///
    /// 并发执行中的重试任务会观测到该标志并直接退出，不再重发。
    pub fn ack(&self, message_id: &str) {
        if let Some((_, task)) = self.tasks.remove(message_id) {
            task.acked.store(true, Ordering::Release);
            debug!(message_id, "Message acknowledged");
        } else {
            trace!(message_id, "Ack for unknown message");
        }
    }

    /// Whether a message is still awaiting acknowledgment.
    /// 消息是否仍在等待确认。
    pub fn is_tracked(&self, message_id: &str) -> bool {
        self.tasks.contains_key(message_id)
    }

    /// The number of messages currently awaiting acknowledgment.
    /// 当前等待确认的消息数。
    pub fn tracked_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stops the wheel and resaves every still-unacknowledged message,
    /// so nothing in flight is silently lost on process stop.
    ///
    /// 停止时间轮并转存所有尚未确认的消息，
    /// 进程停止时在途消息不会被悄悄丢失。
    pub async fn shutdown(&self) {
        self.wheel.stop();

        let drained: Vec<_> = self
            .tasks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.tasks.clear();

        let mut resaved = 0usize;
        for task in drained {
            if !task.acked.load(Ordering::Acquire) {
                self.store.resave(&task.packet, &task.connection).await;
                resaved += 1;
            }
        }
        info!(resaved, "Message retry server shut down");
    }
}

/// The per-message resend loop.
/// 每消息的重发循环。
struct RetryTask {
    packet: Packet,
    connection: Arc<Connection>,
    first_send: Instant,
    interval: Duration,
    timeout: Duration,
    acked: AtomicBool,
    codec: Codec,
    store: Arc<dyn OfflineStore>,
    registry: Arc<DashMap<String, Arc<RetryTask>>>,
}

impl RetryTask {
    fn message_id(&self) -> &str {
        self.packet.id().unwrap_or_default()
    }

    /// Hands the message to the offline store and leaves the wheel.
    /// 将消息交给离线存储并离开时间轮。
    async fn give_up(&self, reason: &'static str) -> TaskDecision {
        warn!(
            message_id = %self.message_id(),
            connection_id = self.connection.id(),
            reason,
            "Giving up on delivery, resaving message"
        );
        self.registry.remove(self.message_id());
        self.store.resave(&self.packet, &self.connection).await;
        TaskDecision::Break
    }
}

#[async_trait]
impl Task for RetryTask {
    async fn execute(&self, now: Instant) -> TaskDecision {
        // Acknowledgment wins any race with this execution.
        // 确认在与本次执行的竞争中总是获胜。
        if self.acked.load(Ordering::Acquire) {
            trace!(message_id = %self.message_id(), "Message acked, retry task leaving");
            return TaskDecision::Break;
        }

        if now.saturating_duration_since(self.first_send) >= self.timeout {
            return self.give_up("timeout").await;
        }

        let frame = match self.codec.encode(&self.packet) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(message_id = %self.message_id(), error = %e, "Encode failed");
                return self.give_up("encode failure").await;
            }
        };

        match self.connection.write(frame).await {
            Ok(()) => {
                debug!(
                    message_id = %self.message_id(),
                    connection_id = self.connection.id(),
                    "Message resent"
                );
                TaskDecision::Retry(self.interval)
            }
            Err(e) => {
                warn!(
                    message_id = %self.message_id(),
                    connection_id = self.connection.id(),
                    error = %e,
                    "Resend failed, tearing connection down"
                );
                let decision = self.give_up("write failure").await;
                self.connection.close().await;
                decision
            }
        }
    }

    fn kind(&self) -> &'static str {
        "retry"
    }
}
