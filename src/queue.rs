//! 无锁多生产者多消费者队列，作为时间轮槽位的存储单元。
//! Lock-free MPMC queue, the storage unit of one time-wheel slot.
//!
//! Michael–Scott 风格的单链表队列：head 与 tail 只通过 CAS 修改，
//! 使用 epoch 回收避免裸指针 CAS 固有的 ABA 与释放后使用问题。
//!
//! A Michael–Scott style singly-linked queue: head and tail are mutated
//! only through compare-and-swap, with epoch-based reclamation to avoid
//! the ABA and use-after-free hazards inherent in raw pointer CAS.

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::Backoff;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A node in the linked list. Under the dummy-head convention the node
/// currently pointed to by `head` never holds a live value.
///
/// 链表中的一个节点。在哑头约定下，`head` 当前指向的节点不持有有效值。
struct Node<T> {
    /// Initialized for every node except the current dummy head.
    /// 除当前哑头外，所有节点的该字段均已初始化。
    value: MaybeUninit<T>,
    next: Atomic<Node<T>>,
}

/// Unbounded-or-capped lock-free FIFO queue.
///
/// 无界或有上限的无锁FIFO队列。
pub struct LockFreeQueue<T> {
    head: Atomic<Node<T>>,
    tail: Atomic<Node<T>>,
    /// Approximate length: eventually consistent with the sequence of
    /// successful enqueues and dequeues, briefly stale under contention.
    ///
    /// 近似长度：与成功的入队/出队序列最终一致，竞争下可能短暂滞后。
    len: AtomicUsize,
    /// When set, enqueues beyond this length are rejected.
    /// 设置后，超过该长度的入队会被拒绝。
    capacity: Option<usize>,
}

unsafe impl<T: Send> Send for LockFreeQueue<T> {}
unsafe impl<T: Send> Sync for LockFreeQueue<T> {}

impl<T> LockFreeQueue<T> {
    /// Creates an unbounded queue.
    /// 创建无界队列。
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a queue that rejects enqueues once `capacity` elements
    /// are held.
    ///
    /// 创建一个在持有 `capacity` 个元素后拒绝入队的队列。
    pub fn with_capacity(capacity: usize) -> Self {
        Self::build(Some(capacity.max(1)))
    }

    fn build(capacity: Option<usize>) -> Self {
        let queue = Self {
            head: Atomic::null(),
            tail: Atomic::null(),
            len: AtomicUsize::new(0),
            capacity,
        };

        let dummy = Owned::new(Node {
            value: MaybeUninit::uninit(),
            next: Atomic::null(),
        });

        // Safety: the queue is not yet shared, no concurrent access.
        // 安全性：队列尚未共享，不存在并发访问。
        unsafe {
            let guard = epoch::unprotected();
            let dummy = dummy.into_shared(guard);
            queue.head.store(dummy, Ordering::Relaxed);
            queue.tail.store(dummy, Ordering::Relaxed);
        }

        queue
    }

    /// Appends a value at the tail.
    ///
    /// Fails only when a configured capacity is exceeded, handing the
    /// rejected value back to the caller.
    ///
    /// 在尾部追加一个值。
    ///
    /// 仅在超过配置的容量时失败，并将被拒绝的值交还调用方。
    pub fn enqueue(&self, value: T) -> Result<(), T> {
        if let Some(capacity) = self.capacity {
            if self.len.load(Ordering::Relaxed) >= capacity {
                return Err(value);
            }
        }

        // Counted before linking: a racing dequeue of this value can
        // then never drive the counter below zero.
        // 在链接之前计数：并发取走该值的出队便绝不会把计数器减到零以下。
        self.len.fetch_add(1, Ordering::Relaxed);

        let guard = epoch::pin();
        let mut node = Owned::new(Node {
            value: MaybeUninit::new(value),
            next: Atomic::null(),
        });
        let backoff = Backoff::new();

        loop {
            let tail = self.tail.load(Ordering::Acquire, &guard);
            // Safety: tail is never null and the pinned epoch keeps the
            // node alive.
            // 安全性：tail永不为空，且pinned epoch保证节点存活。
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Ordering::Acquire, &guard);

            // Stale tail snapshot, start over.
            // tail快照已过期，重新开始。
            if tail != self.tail.load(Ordering::Acquire, &guard) {
                backoff.spin();
                continue;
            }

            if next.is_null() {
                match tail_ref.next.compare_exchange(
                    Shared::null(),
                    node,
                    Ordering::Release,
                    Ordering::Relaxed,
                    &guard,
                ) {
                    Ok(new) => {
                        // Best-effort tail advancement; any thread may
                        // complete this step.
                        // 尽力推进tail；任何线程都可以完成这一步。
                        let _ = self.tail.compare_exchange(
                            tail,
                            new,
                            Ordering::Release,
                            Ordering::Relaxed,
                            &guard,
                        );
                        return Ok(());
                    }
                    Err(err) => {
                        node = err.new;
                        backoff.spin();
                    }
                }
            } else {
                // The tail pointer is behind reality; help advance it
                // and retry.
                // tail指针落后于实际情况；帮助推进后重试。
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    &guard,
                );
                backoff.spin();
            }
        }
    }

    /// Removes and returns the oldest element, or `None` when the queue
    /// is empty. Empty is the normal "nothing to do" case, not an error.
    ///
    /// 移除并返回最老的元素，队列为空时返回 `None`。
    /// 空队列是正常的"无事可做"情形，不是错误。
    pub fn dequeue(&self) -> Option<T> {
        let guard = epoch::pin();
        let backoff = Backoff::new();

        loop {
            match self.try_dequeue(&guard) {
                Ok(result) => return result,
                Err(()) => backoff.spin(),
            }
        }
    }

    /// One dequeue attempt; `Err(())` means a CAS lost and the caller
    /// should retry.
    ///
    /// 一次出队尝试；`Err(())` 表示CAS竞争失败，调用方应重试。
    fn try_dequeue(&self, guard: &Guard) -> Result<Option<T>, ()> {
        let head = self.head.load(Ordering::Acquire, guard);
        // Safety: head is never null under the dummy-head convention.
        // 安全性：哑头约定下head永不为空。
        let head_ref = unsafe { head.deref() };
        let next = head_ref.next.load(Ordering::Acquire, guard);
        let tail = self.tail.load(Ordering::Acquire, guard);

        if head != self.head.load(Ordering::Acquire, guard) {
            return Err(());
        }

        if next.is_null() {
            // head == tail with null next: truly empty.
            // head == tail 且 next 为空：队列确实为空。
            return Ok(None);
        }

        if head == tail {
            // Non-null next behind the tail: tail is lagging, help
            // advance before retrying.
            // tail 之后存在非空 next：tail 滞后，先帮助推进再重试。
            let _ = self.tail.compare_exchange(
                tail,
                next,
                Ordering::Release,
                Ordering::Relaxed,
                guard,
            );
            return Err(());
        }

        match self.head.compare_exchange(
            head,
            next,
            Ordering::Release,
            Ordering::Relaxed,
            guard,
        ) {
            Ok(_) => {
                // Safety: winning the head CAS grants exclusive right to
                // read the value out of the new dummy; the old dummy is
                // reclaimed once no thread can still observe it.
                // 安全性：赢得head的CAS即获得读取新哑头中值的独占权；
                // 旧哑头在没有线程还能观察到它之后才被回收。
                let value = unsafe {
                    let value = next.deref().value.as_ptr().read();
                    guard.defer_destroy(head);
                    value
                };
                self.len.fetch_sub(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Err(_) => Err(()),
        }
    }

    /// Appends values in order as a single logical operation. Returns
    /// the number enqueued and hands back the values rejected once the
    /// capacity was hit, matching repeated single-call semantics.
    ///
    /// 按序批量追加值。返回成功入队的数量，并交还容量耗尽后被拒绝的值，
    /// 语义与重复单次调用一致。
    pub fn enqueue_batch(&self, values: impl IntoIterator<Item = T>) -> (usize, Vec<T>) {
        let mut enqueued = 0;
        let mut values = values.into_iter();
        let mut rejected = Vec::new();

        for value in values.by_ref() {
            match self.enqueue(value) {
                Ok(()) => enqueued += 1,
                Err(value) => {
                    rejected.push(value);
                    break;
                }
            }
        }
        rejected.extend(values);

        (enqueued, rejected)
    }

    /// Removes up to `max` elements, oldest first.
    /// 按最老优先的顺序最多移除 `max` 个元素。
    pub fn dequeue_batch(&self, max: usize) -> Vec<T> {
        let mut values = Vec::with_capacity(max.min(self.len()));
        for _ in 0..max {
            match self.dequeue() {
                Some(value) => values.push(value),
                None => break,
            }
        }
        values
    }

    /// Approximate current length.
    /// 近似的当前长度。
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Whether the queue is (approximately) empty.
    /// 队列是否（近似）为空。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured capacity, if any.
    /// 配置的容量（如有）。
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl<T> Default for LockFreeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for LockFreeQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFreeQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<T> Drop for LockFreeQueue<T> {
    fn drop(&mut self) {
        // Safety: &mut self guarantees no concurrent access; remaining
        // values are dropped in place and the final dummy is freed.
        // 安全性：&mut self 保证没有并发访问；
        // 剩余的值就地释放，最后的哑头节点也被释放。
        unsafe {
            let guard = epoch::unprotected();
            let mut current = self.head.load(Ordering::Relaxed, guard);
            let mut is_dummy = true;
            while !current.is_null() {
                let next = current.deref().next.load(Ordering::Relaxed, guard);
                let mut node = current.into_owned();
                if !is_dummy {
                    node.value.assume_init_drop();
                }
                drop(node);
                is_dummy = false;
                current = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LockFreeQueue;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order_single_thread() {
        let queue = LockFreeQueue::new();
        for i in 0..100 {
            queue.enqueue(i).ok();
        }
        for i in 0..100 {
            assert_eq!(queue.dequeue(), Some(i));
        }
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn capacity_rejects_and_returns_value() {
        let queue = LockFreeQueue::with_capacity(2);
        assert!(queue.enqueue(1).is_ok());
        assert!(queue.enqueue(2).is_ok());
        assert_eq!(queue.enqueue(3), Err(3));

        queue.dequeue();
        assert!(queue.enqueue(3).is_ok());
    }

    #[test]
    fn len_is_consistent_when_quiescent() {
        let queue = LockFreeQueue::new();
        for i in 0..10 {
            queue.enqueue(i).ok();
        }
        assert_eq!(queue.len(), 10);
        for _ in 0..4 {
            queue.dequeue();
        }
        assert_eq!(queue.len(), 6);
    }

    #[test]
    fn batch_matches_single_call_semantics() {
        let queue = LockFreeQueue::with_capacity(3);
        let (enqueued, rejected) = queue.enqueue_batch(vec![1, 2, 3, 4, 5]);
        assert_eq!(enqueued, 3);
        assert_eq!(rejected, vec![4, 5]);

        let drained = queue.dequeue_batch(10);
        assert_eq!(drained, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn concurrent_no_loss_no_duplication() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: usize = 1000;

        let queue = Arc::new(LockFreeQueue::new());
        let mut handles = Vec::new();

        for producer in 0..PRODUCERS {
            let queue = queue.clone();
            handles.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    queue.enqueue(producer * PER_PRODUCER + i).ok();
                }
            }));
        }

        let mut consumers = Vec::new();
        for _ in 0..CONSUMERS {
            let queue = queue.clone();
            consumers.push(thread::spawn(move || {
                let mut seen = Vec::new();
                let mut idle_rounds = 0;
                while idle_rounds < 1000 {
                    match queue.dequeue() {
                        Some(value) => {
                            seen.push(value);
                            idle_rounds = 0;
                        }
                        None => {
                            idle_rounds += 1;
                            thread::yield_now();
                        }
                    }
                }
                seen
            }));
        }

        for handle in handles {
            handle.join().ok();
        }

        let mut all = Vec::new();
        for consumer in consumers {
            if let Ok(seen) = consumer.join() {
                all.extend(seen);
            }
        }

        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len(), PRODUCERS * PER_PRODUCER, "no value lost");
        assert_eq!(unique.len(), all.len(), "no value dequeued twice");
        assert_eq!(queue.len(), 0);
    }
}
