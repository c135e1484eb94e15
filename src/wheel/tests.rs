//! 时间轮测试
//! Time wheel tests

use crate::config::WheelConfig;
use crate::error::Error;
use crate::wheel::{Task, TaskDecision, TimeWheel};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// A task that counts its executions and re-arms at a fixed interval
/// until told to leave.
///
/// 记录执行次数并以固定间隔重入的任务，直到被要求退出。
struct CountingTask {
    executions: AtomicUsize,
    interval: Duration,
    stop: AtomicBool,
}

impl CountingTask {
    fn new(interval: Duration) -> Self {
        Self {
            executions: AtomicUsize::new(0),
            interval,
            stop: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Task for CountingTask {
    async fn execute(&self, _now: Instant) -> TaskDecision {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if self.stop.load(Ordering::SeqCst) {
            TaskDecision::Break
        } else {
            TaskDecision::Retry(self.interval)
        }
    }

    fn kind(&self) -> &'static str {
        "counting"
    }
}

fn small_wheel(tick_ms: u64, slot_count: usize) -> TimeWheel {
    TimeWheel::new(&WheelConfig {
        tick: Duration::from_millis(tick_ms),
        slot_count,
        max_tasks_per_slot: 16,
        max_submit_delay: Duration::from_millis(tick_ms) * slot_count as u32,
        max_workers: 4,
    })
}

#[tokio::test]
async fn submit_rejects_delay_beyond_span() {
    let wheel = small_wheel(10, 8);
    let task = Arc::new(CountingTask::new(Duration::from_millis(10)));

    let result = wheel.submit(task, Duration::from_millis(81));
    assert!(matches!(result, Err(Error::InvalidDelay { .. })));
}

#[tokio::test]
async fn submit_accepts_zero_and_full_span_delay() {
    let wheel = small_wheel(10, 8);

    let zero = Arc::new(CountingTask::new(Duration::from_millis(10)));
    zero.stop.store(true, Ordering::SeqCst);
    assert!(wheel.submit(zero.clone(), Duration::ZERO).is_ok());

    let full = Arc::new(CountingTask::new(Duration::from_millis(10)));
    full.stop.store(true, Ordering::SeqCst);
    assert!(wheel.submit(full, Duration::from_millis(80)).is_ok());

    // A zero delay is eligible on the next tick.
    // 零延迟在下一个tick即可触发。
    wheel.start();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(zero.executions.load(Ordering::SeqCst), 1);
    wheel.stop();
}

#[tokio::test]
async fn slot_capacity_is_enforced() {
    let wheel = TimeWheel::new(&WheelConfig {
        tick: Duration::from_millis(10),
        slot_count: 2,
        max_tasks_per_slot: 2,
        max_submit_delay: Duration::from_millis(20),
        max_workers: 4,
    });

    // Five submissions into two slots of capacity two must overflow.
    // 向两个容量为二的槽位提交五次，必然溢出。
    let mut rejected = 0;
    for _ in 0..5 {
        let task = Arc::new(CountingTask::new(Duration::from_millis(10)));
        if matches!(wheel.submit(task, Duration::ZERO), Err(Error::QueueFull)) {
            rejected += 1;
        }
    }
    assert!(rejected >= 1);
}

#[tokio::test]
async fn retry_task_executes_repeatedly() {
    let wheel = small_wheel(10, 32);
    let task = Arc::new(CountingTask::new(Duration::from_millis(20)));

    wheel.submit(task.clone(), Duration::from_millis(20)).ok();
    wheel.start();

    // Roughly one execution per 20ms interval over 300ms, with a wide
    // tolerance for scheduling jitter.
    // 300ms内大约每20ms执行一次，为调度抖动留出宽裕容差。
    sleep(Duration::from_millis(300)).await;
    let executions = task.executions.load(Ordering::SeqCst);
    assert!(
        (5..=20).contains(&executions),
        "expected ~14 executions, got {executions}"
    );

    wheel.stop();
}

#[tokio::test]
async fn break_removes_task_from_wheel() {
    let wheel = small_wheel(10, 32);
    let task = Arc::new(CountingTask::new(Duration::from_millis(20)));
    task.stop.store(true, Ordering::SeqCst);

    wheel.submit(task.clone(), Duration::from_millis(20)).ok();
    wheel.start();

    sleep(Duration::from_millis(200)).await;
    assert_eq!(task.executions.load(Ordering::SeqCst), 1);
    assert_eq!(wheel.task_count(), 0);

    wheel.stop();
}

#[tokio::test]
async fn stop_is_idempotent_and_rejects_new_tasks() {
    let wheel = small_wheel(10, 8);
    wheel.start();
    wheel.stop();
    wheel.stop();

    let task = Arc::new(CountingTask::new(Duration::from_millis(10)));
    assert!(matches!(
        wheel.submit(task, Duration::from_millis(10)),
        Err(Error::WheelStopped)
    ));
    assert!(!wheel.is_running());
}

#[tokio::test]
async fn tasks_from_one_slot_run_concurrently() {
    /// Blocks long enough that serialized execution would overrun the
    /// observation window.
    ///
    /// 阻塞足够久，串行执行将超出观察窗口。
    struct SlowTask {
        started: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Task for SlowTask {
        async fn execute(&self, _now: Instant) -> TaskDecision {
            self.started.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(200)).await;
            TaskDecision::Break
        }
    }

    let wheel = small_wheel(10, 8);
    let started = Arc::new(AtomicUsize::new(0));
    for _ in 0..4 {
        let task = Arc::new(SlowTask {
            started: started.clone(),
        });
        wheel.submit(task, Duration::from_millis(20)).ok();
    }
    wheel.start();

    // All four bodies overlap: each sleeps 200ms, yet all have started
    // well before the first could have finished a serial run.
    // 四个任务体相互重叠：每个睡眠200ms，
    // 但在串行执行能完成之前它们都已开始。
    sleep(Duration::from_millis(100)).await;
    assert_eq!(started.load(Ordering::SeqCst), 4);

    wheel.stop();
}
