//! 时间轮核心实现
//! Timing wheel core implementation

use crate::config::WheelConfig;
use crate::error::{Error, Result};
use crate::queue::LockFreeQueue;
use crate::wheel::task::{Task, TaskDecision};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, error, info, trace, warn};

/// A fixed ring of lock-free slots with a ticking driver and a bounded
/// worker pool.
///
/// Submission happens from arbitrary connection-handling contexts while
/// drains happen from the scheduler, which is exactly why each slot is
/// a lock-free queue rather than a mutex-guarded list.
///
/// 由无锁槽位构成的固定环，配有一个tick驱动和一个有界工作池。
///
/// 提交来自任意连接处理上下文，而排空发生在调度器中，
/// 这正是每个槽位采用无锁队列而非互斥锁链表的原因。
pub struct TimeWheel {
    inner: Arc<WheelInner>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

struct WheelInner {
    /// Tick duration in milliseconds; the scheduling granularity.
    /// tick时长（毫秒）；即调度粒度。
    tick_ms: u64,
    tick: Duration,
    slot_count: usize,
    /// The largest delay `submit` accepts.
    /// `submit` 接受的最大延迟。
    span: Duration,
    slots: Vec<LockFreeQueue<Arc<dyn Task>>>,
    /// All virtual time is measured from this instant.
    /// 所有虚拟时间都从该时刻起算。
    start: Instant,
    /// The wheel's current position, recorded each tick.
    /// 时间轮的当前位置，每个tick记录一次。
    cursor: AtomicUsize,
    now_ms: AtomicU64,
    /// The last tick index the driver has drained.
    /// 驱动已排空的最后一个tick序号。
    last_tick: AtomicU64,
    running: AtomicBool,
    stopped: AtomicBool,
    /// Bounds concurrent task execution so a slow task never stalls the
    /// tick driver.
    ///
    /// 限制任务并发执行量，慢任务永远不会卡住tick驱动。
    workers: Arc<Semaphore>,
}

impl TimeWheel {
    /// Creates a wheel from configuration. The driver is not started.
    /// 根据配置创建时间轮。驱动不会自动启动。
    pub fn new(config: &WheelConfig) -> Self {
        let tick = config.tick.max(Duration::from_millis(1));
        let tick_ms = tick.as_millis() as u64;
        let slot_count = config.slot_count.max(2);
        let rotation = tick * slot_count as u32;
        let span = config.max_submit_delay.min(rotation);

        let mut slots = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            slots.push(LockFreeQueue::with_capacity(config.max_tasks_per_slot));
        }

        debug!(
            tick_ms,
            slot_count,
            span_ms = span.as_millis() as u64,
            max_workers = config.max_workers,
            "Time wheel created"
        );

        Self {
            inner: Arc::new(WheelInner {
                tick_ms,
                tick,
                slot_count,
                span,
                slots,
                start: Instant::now(),
                cursor: AtomicUsize::new(0),
                now_ms: AtomicU64::new(0),
                last_tick: AtomicU64::new(0),
                running: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
            }),
            driver: Mutex::new(None),
        }
    }

    /// Places `task` in the slot due at `now + delay`.
    ///
    /// Returns the slot index, `Error::InvalidDelay` when the delay
    /// exceeds the schedulable span, `Error::QueueFull` when the slot
    /// is at capacity, or `Error::WheelStopped` after `stop`.
    ///
    /// 将 `task` 放入 `now + delay` 到期的槽位。
    ///
    /// 返回槽位索引；延迟超出可调度范围返回 `Error::InvalidDelay`，
    /// 槽位已满返回 `Error::QueueFull`，`stop` 之后返回
    /// `Error::WheelStopped`。
    pub fn submit(&self, task: Arc<dyn Task>, delay: Duration) -> Result<usize> {
        self.inner.submit_after(task, delay)
    }

    /// Starts the background tick driver. A second call is a no-op.
    /// 启动后台tick驱动。重复调用是空操作。
    pub fn start(&self) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            warn!("Refusing to start a stopped time wheel");
            return;
        }
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            info!(
                tick_ms = inner.tick_ms,
                slot_count = inner.slot_count,
                "Time wheel driver started"
            );
            let mut ticker = interval(inner.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of `interval` completes immediately.
            // `interval` 的第一个tick会立即完成。
            ticker.tick().await;

            while inner.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                inner.advance(Instant::now());
            }
            info!("Time wheel driver exited");
        });

        if let Ok(mut driver) = self.driver.lock() {
            *driver = Some(handle);
        }
    }

    /// Stops the driver and releases the worker pool. Idempotent; tasks
    /// already handed to workers run to completion.
    ///
    /// 停止驱动并释放工作池。幂等；已交给worker的任务会执行完毕。
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.workers.close();
        if let Ok(mut driver) = self.driver.lock() {
            if let Some(handle) = driver.take() {
                handle.abort();
            }
        }
        info!("Time wheel stopped");
    }

    /// Whether the driver is currently running.
    /// 驱动当前是否在运行。
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// The wheel's position as of the last tick: (virtual ms, slot).
    /// 截至上一个tick的时间轮位置：（虚拟毫秒，槽位）。
    pub fn position(&self) -> (u64, usize) {
        (
            self.inner.now_ms.load(Ordering::Relaxed),
            self.inner.cursor.load(Ordering::Relaxed),
        )
    }

    /// Total tasks currently held across all slots (approximate).
    /// 当前所有槽位持有的任务总数（近似值）。
    pub fn task_count(&self) -> usize {
        self.inner.slots.iter().map(|slot| slot.len()).sum()
    }

    /// The largest delay `submit` accepts.
    /// `submit` 接受的最大延迟。
    pub fn span(&self) -> Duration {
        self.inner.span
    }
}

impl Drop for TimeWheel {
    fn drop(&mut self) {
        self.stop();
    }
}

impl WheelInner {
    /// Maps a delay to a slot and enqueues the task there.
    /// 将延迟映射到槽位并把任务入队。
    fn submit_after(self: &Arc<Self>, task: Arc<dyn Task>, delay: Duration) -> Result<usize> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::WheelStopped);
        }
        if delay > self.span {
            return Err(Error::InvalidDelay {
                delay,
                max: self.span,
            });
        }

        let now_ms = self.start.elapsed().as_millis() as u64;
        let current_tick = now_ms / self.tick_ms;
        let due_ms = now_ms + delay.as_millis() as u64;

        // The due slot is the first tick boundary at or after the
        // deadline, clamped to one rotation. A zero delay therefore
        // becomes eligible on the very next tick.
        //
        // 到期槽位是截止时间之后的第一个tick边界，并被钳制在一圈以内。
        // 因此零延迟在下一个tick即可触发。
        let due_tick = due_ms.div_ceil(self.tick_ms).max(current_tick + 1);
        let ticks_ahead = (due_tick - current_tick).min(self.slot_count as u64);
        let slot_index = ((current_tick + ticks_ahead) % self.slot_count as u64) as usize;

        match self.slots[slot_index].enqueue(task) {
            Ok(()) => {
                trace!(
                    slot_index,
                    delay_ms = delay.as_millis() as u64,
                    ticks_ahead,
                    "Task submitted to wheel"
                );
                Ok(slot_index)
            }
            Err(_) => {
                warn!(slot_index, "Slot is full, rejecting task");
                Err(Error::QueueFull)
            }
        }
    }

    /// Called once per tick: records the wheel position and drains every
    /// slot between the last processed tick and now onto the worker
    /// pool, so a delayed driver catches up instead of skipping slots.
    ///
    /// 每个tick调用一次：记录时间轮位置，并把上次处理的tick与当前之间的
    /// 所有槽位排空到工作池，驱动延迟时会补课而不是跳过槽位。
    fn advance(self: &Arc<Self>, now: Instant) {
        let now_ms = now.saturating_duration_since(self.start).as_millis() as u64;
        let current_tick = now_ms / self.tick_ms;
        let last_tick = self.last_tick.swap(current_tick, Ordering::Relaxed);
        if current_tick <= last_tick {
            return;
        }
        self.now_ms.store(now_ms, Ordering::Relaxed);

        // One full rotation covers every slot; catching up further would
        // only drain the same slots twice.
        // 一整圈已覆盖所有槽位；继续补课只会把同一批槽位排空两次。
        let behind = current_tick - last_tick;
        let from = if behind > self.slot_count as u64 {
            current_tick - self.slot_count as u64 + 1
        } else {
            last_tick + 1
        };

        for tick in from..=current_tick {
            let slot_index = (tick % self.slot_count as u64) as usize;
            self.cursor.store(slot_index, Ordering::Relaxed);

            // Drain at most the tasks present when the tick began, so a
            // task retrying into the current slot cannot spin the driver.
            //
            // 最多排空tick开始时已存在的任务，
            // 避免重入当前槽位的任务让驱动空转。
            let due = self.slots[slot_index].len();
            if due == 0 {
                continue;
            }
            trace!(slot_index, due, now_ms, "Draining slot");

            for _ in 0..due {
                let Some(task) = self.slots[slot_index].dequeue() else {
                    break;
                };
                self.dispatch(task, now);
            }
        }
    }

    /// Hands one due task to the worker pool. The driver never awaits
    /// task bodies; multiple tasks from one slot may run concurrently.
    ///
    /// 将一个到期任务交给工作池。驱动从不等待任务体；
    /// 同一槽位的多个任务可以并发执行。
    fn dispatch(self: &Arc<Self>, task: Arc<dyn Task>, now: Instant) {
        let inner = self.clone();
        tokio::spawn(async move {
            let permit = match inner.workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                // Pool closed by `stop`; the task is dropped.
                // 工作池已被 `stop` 关闭；任务被丢弃。
                Err(_) => return,
            };

            let decision = task.execute(now).await;
            drop(permit);

            match decision {
                TaskDecision::Retry(delay) => {
                    if let Err(e) = inner.submit_after(task.clone(), delay) {
                        error!(
                            kind = task.kind(),
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Failed to re-arm task, dropping it"
                        );
                    }
                }
                TaskDecision::Break => {
                    trace!(kind = task.kind(), "Task left the wheel");
                }
            }
        });
    }
}
