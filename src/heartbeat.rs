//! 心跳监护：检测错过心跳的连接并将其关闭。
//! Heartbeat supervision: detects connections that miss heartbeats and
//! closes them.
//!
//! 每个存活连接对应一个调度任务。收到心跳只更新连接上的原子时间戳；
//! 任务通过 Retry 自行重新武装，并在每次执行时用真实流逝时间复核。
//!
//! One scheduled task per live connection. An inbound heartbeat only
//! updates an atomic timestamp on the connection; the task re-arms
//! itself via Retry and re-validates real elapsed time on every
//! execution.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::HeartbeatConfig;
use crate::connection::{Connection, ConnectionId};
use crate::error::Result;
use crate::wheel::{Task, TaskDecision, TimeWheel};

/// Watches every registered connection for heartbeat silence.
/// 监视每个已注册连接的心跳静默。
pub struct HeartbeatSupervisor {
    wheel: Arc<TimeWheel>,
    config: HeartbeatConfig,
    tasks: Arc<DashMap<ConnectionId, Arc<HeartbeatTask>>>,
}

impl HeartbeatSupervisor {
    /// Creates a supervisor scheduling on the given wheel.
    /// 创建一个在给定时间轮上调度的监护器。
    pub fn new(wheel: Arc<TimeWheel>, config: HeartbeatConfig) -> Self {
        Self {
            wheel,
            config,
            tasks: Arc::new(DashMap::new()),
        }
    }

    /// Starts supervising a connection. Idempotent: a connection that
    /// already has a task keeps it unchanged.
    ///
    /// 开始监护一个连接。幂等：已有任务的连接保持不变。
    pub fn submit(&self, connection: Arc<Connection>) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        let id = connection.id();
        let task = match self.tasks.entry(id) {
            Entry::Occupied(_) => {
                trace!(connection_id = id, "Heartbeat task already registered");
                return Ok(());
            }
            Entry::Vacant(vacant) => {
                // The first check runs one interval from now; the
                // connection's accept time seeds the timestamp.
                // 第一次检查在一个间隔之后；接受时刻作为时间戳的起点。
                connection.touch_heartbeat(Instant::now());
                let task = Arc::new(HeartbeatTask {
                    connection,
                    interval: self.config.interval,
                    timeout: self.config.timeout,
                    cancelled: AtomicBool::new(false),
                    registry: self.tasks.clone(),
                });
                vacant.insert(task.clone());
                task
            }
        };

        match self.wheel.submit(task, self.config.interval) {
            Ok(slot) => {
                debug!(connection_id = id, slot, "Heartbeat supervision started");
                Ok(())
            }
            Err(e) => {
                self.tasks.remove(&id);
                Err(e)
            }
        }
    }

    /// Records an inbound heartbeat. The task is not rescheduled; it
    /// re-arms itself and will observe the new timestamp.
    ///
    /// 记录一次入站心跳。任务不会被重新调度；
    /// 它会自行重新武装并观测到新的时间戳。
    pub fn on_heartbeat_received(&self, connection: &Connection) {
        connection.touch_heartbeat(Instant::now());
    }

    /// Cancels supervision for a connection. Safe to call repeatedly
    /// and concurrently with an in-flight execution.
    ///
    /// 取消对一个连接的监护。可重复调用，并可与执行中的任务安全并发。
    pub fn stop(&self, id: ConnectionId) {
        if let Some((_, task)) = self.tasks.remove(&id) {
            task.cancelled.store(true, Ordering::Release);
            trace!(connection_id = id, "Heartbeat supervision stopped");
        }
    }

    /// The number of currently supervised connections.
    /// 当前被监护的连接数。
    pub fn supervised_count(&self) -> usize {
        self.tasks.len()
    }
}

/// The per-connection liveness check.
/// 每连接的存活检查。
struct HeartbeatTask {
    connection: Arc<Connection>,
    interval: Duration,
    timeout: Duration,
    cancelled: AtomicBool,
    registry: Arc<DashMap<ConnectionId, Arc<HeartbeatTask>>>,
}

#[async_trait]
impl Task for HeartbeatTask {
    async fn execute(&self, now: Instant) -> TaskDecision {
        // Cancellation is checked before acting so a concurrent `stop`
        // or close always wins.
        // 先检查取消标志，确保并发的 `stop` 或关闭总是生效。
        if self.cancelled.load(Ordering::Acquire) || self.connection.is_closed() {
            self.registry.remove(&self.connection.id());
            return TaskDecision::Break;
        }

        let silence = self.connection.heartbeat_elapsed(now);
        if silence > self.timeout {
            warn!(
                connection_id = self.connection.id(),
                silence_ms = silence.as_millis() as u64,
                timeout_ms = self.timeout.as_millis() as u64,
                "Heartbeat timeout, closing connection"
            );
            self.registry.remove(&self.connection.id());
            self.connection.close().await;
            return TaskDecision::Break;
        }

        trace!(
            connection_id = self.connection.id(),
            silence_ms = silence.as_millis() as u64,
            "Heartbeat within bounds"
        );
        TaskDecision::Retry(self.interval)
    }

    fn kind(&self) -> &'static str {
        "heartbeat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WheelConfig;
    use crate::testing::{MockLink, mock_connection};
    use std::sync::atomic::Ordering;
    use tokio::time::sleep;

    fn test_wheel() -> Arc<TimeWheel> {
        let wheel = Arc::new(TimeWheel::new(&WheelConfig {
            tick: Duration::from_millis(10),
            slot_count: 64,
            max_tasks_per_slot: 64,
            max_submit_delay: Duration::from_millis(640),
            max_workers: 8,
        }));
        wheel.start();
        wheel
    }

    fn supervisor(wheel: Arc<TimeWheel>, interval_ms: u64, timeout_ms: u64) -> HeartbeatSupervisor {
        HeartbeatSupervisor::new(
            wheel,
            HeartbeatConfig {
                interval: Duration::from_millis(interval_ms),
                timeout: Duration::from_millis(timeout_ms),
            },
        )
    }

    #[tokio::test]
    async fn silent_connection_is_closed_after_timeout() {
        let wheel = test_wheel();
        let supervisor = supervisor(wheel.clone(), 50, 100);
        let link = MockLink::new();
        let conn = mock_connection(1, link.clone());

        supervisor.submit(conn.clone()).expect("submit");
        sleep(Duration::from_millis(400)).await;

        assert!(conn.is_closed());
        assert!(link.closed.load(Ordering::SeqCst));
        assert_eq!(supervisor.supervised_count(), 0);
        wheel.stop();
    }

    #[tokio::test]
    async fn heartbeating_connection_stays_open() {
        let wheel = test_wheel();
        let supervisor = Arc::new(supervisor(wheel.clone(), 50, 100));
        let conn = mock_connection(2, MockLink::new());

        supervisor.submit(conn.clone()).expect("submit");

        let beat_conn = conn.clone();
        let beat_supervisor = supervisor.clone();
        let beater = tokio::spawn(async move {
            loop {
                sleep(Duration::from_millis(30)).await;
                beat_supervisor.on_heartbeat_received(&beat_conn);
            }
        });

        sleep(Duration::from_millis(500)).await;
        assert!(!conn.is_closed());
        assert_eq!(supervisor.supervised_count(), 1);

        beater.abort();
        wheel.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn regular_heartbeats_survive_a_five_minute_run() {
        let wheel = Arc::new(TimeWheel::new(&WheelConfig {
            tick: Duration::from_millis(100),
            slot_count: 1024,
            max_tasks_per_slot: 64,
            max_submit_delay: Duration::from_secs(100),
            max_workers: 8,
        }));
        wheel.start();
        let supervisor = Arc::new(supervisor(wheel.clone(), 30_000, 60_000));
        let conn = mock_connection(3, MockLink::new());

        supervisor.submit(conn.clone()).expect("submit");

        let beat_conn = conn.clone();
        let beat_supervisor = supervisor.clone();
        let beater = tokio::spawn(async move {
            loop {
                sleep(Duration::from_secs(10)).await;
                beat_supervisor.on_heartbeat_received(&beat_conn);
            }
        });

        // Five minutes of virtual time, a heartbeat every ten seconds.
        // 五分钟虚拟时间，每十秒一次心跳。
        sleep(Duration::from_secs(300)).await;
        assert!(!conn.is_closed());

        beater.abort();
        wheel.stop();
    }

    #[tokio::test]
    async fn submit_is_idempotent_per_connection() {
        let wheel = test_wheel();
        let supervisor = supervisor(wheel.clone(), 50, 100);
        let conn = mock_connection(4, MockLink::new());

        supervisor.submit(conn.clone()).expect("first submit");
        supervisor.submit(conn).expect("second submit is a no-op");
        assert_eq!(supervisor.supervised_count(), 1);
        wheel.stop();
    }

    #[tokio::test]
    async fn stop_cancels_without_closing() {
        let wheel = test_wheel();
        let supervisor = supervisor(wheel.clone(), 50, 100);
        let conn = mock_connection(5, MockLink::new());

        supervisor.submit(conn.clone()).expect("submit");
        supervisor.stop(conn.id());
        supervisor.stop(conn.id());

        sleep(Duration::from_millis(300)).await;
        assert!(!conn.is_closed());
        assert_eq!(supervisor.supervised_count(), 0);
        wheel.stop();
    }
}
