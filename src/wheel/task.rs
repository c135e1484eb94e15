//! 调度任务契约：执行一次，决定重入或退出。
//! The scheduled-task contract: execute once, decide to re-arm or leave.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// The outcome of one task execution.
///
/// The wheel's entire protocol with tasks is this enum: it never
/// inspects task semantics beyond it.
///
/// 一次任务执行的结果。
///
/// 时间轮与任务的全部协议就是这个枚举：除此之外它不关心任务语义。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskDecision {
    /// Re-enqueue the task after the given delay. The task re-derives
    /// its own next delay, typically its fixed interval.
    ///
    /// 在给定延迟后重新入队。任务自行推导下一次延迟，通常是其固定间隔。
    Retry(Duration),

    /// Remove the task from the scheduler.
    /// 将任务从调度器中移除。
    Break,
}

/// A unit of schedulable work.
///
/// A task is owned exclusively by the slot queue holding it until it is
/// dequeued; on `Retry` ownership transfers to whichever slot it is
/// re-enqueued into. Because slot timing carries up to one tick of
/// jitter and unrelated submissions can share a slot, implementations
/// must re-validate real elapsed time inside `execute` rather than
/// trusting slot timing alone.
///
/// 一个可调度的工作单元。
///
/// 任务在被出队之前由持有它的槽位队列独占；`Retry` 时所有权转移到
/// 重新入队的那个槽位。由于槽位时序带有最多一个tick的抖动，且不相关的
/// 提交可能共享同一槽位，实现必须在 `execute` 内部重新校验真实的
/// 流逝时间，而不能只信任槽位时序。
#[async_trait]
pub trait Task: Send + Sync {
    /// Executes the task once at (or shortly after) its scheduled time.
    /// 在计划时间（或稍后）执行一次任务。
    async fn execute(&self, now: Instant) -> TaskDecision;

    /// A short label used in scheduler logs.
    /// 用于调度器日志的简短标签。
    fn kind(&self) -> &'static str {
        "task"
    }
}
