//! Priority-aware buffer for work that could not run immediately
//!
//! Items are served highest-priority first, FIFO within a priority level.
//! A failed item is re-enqueued until its retry budget or deadline is
//! spent, then dropped and reported as permanently failed. At most one
//! drain loop runs per queue instance; concurrent drain calls are no-ops.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, warn};

/// Queue error types
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue full (capacity {0})")]
    QueueFull(usize),
}

/// One buffered unit of work; the payload is opaque to the core
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub payload: Bytes,
    /// Higher priorities are served first
    pub priority: i32,
    /// Optional session key carried through retries
    pub session_key: Option<String>,
    pub retry_count: u32,
    pub enqueued_at: Instant,
    pub deadline: Option<Instant>,
    seq: u64,
}

impl QueueItem {
    fn past_deadline(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueItem {}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: highest priority first, then lowest sequence number so
        // equal priorities stay FIFO
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Outcome of one drain pass
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Items executed successfully
    pub succeeded: u64,
    /// Failures re-enqueued for another attempt
    pub requeued: u64,
    /// Items dropped permanently (retries or deadline exhausted)
    pub failed: Vec<QueueItem>,
    /// True when another drain was already running and this call did nothing
    pub already_draining: bool,
}

/// Bounded priority queue of pending requests
pub struct RequestQueue {
    items: Mutex<BinaryHeap<QueueItem>>,
    capacity: usize,
    max_retries: u32,
    seq: AtomicU64,
    draining: AtomicBool,
}

impl RequestQueue {
    pub fn new(capacity: usize, max_retries: u32) -> Self {
        Self {
            items: Mutex::new(BinaryHeap::new()),
            capacity,
            max_retries,
            seq: AtomicU64::new(0),
            draining: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffer one item, keeping priority order
    pub fn enqueue(
        &self,
        payload: Bytes,
        priority: i32,
        session_key: Option<String>,
        deadline: Option<Instant>,
    ) -> Result<(), QueueError> {
        let item = QueueItem {
            payload,
            priority,
            session_key,
            retry_count: 0,
            enqueued_at: Instant::now(),
            deadline,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        self.push(item)
    }

    fn push(&self, item: QueueItem) -> Result<(), QueueError> {
        let mut items = self.items.lock().expect("queue lock poisoned");
        if items.len() >= self.capacity {
            warn!(capacity = self.capacity, "queue full, rejecting item");
            return Err(QueueError::QueueFull(self.capacity));
        }
        items.push(item);
        Ok(())
    }

    fn pop(&self) -> Option<QueueItem> {
        self.items.lock().expect("queue lock poisoned").pop()
    }

    /// Process buffered items highest-priority first
    ///
    /// `executor` runs each item; a `false` result counts as a failure.
    /// Failed items are re-enqueued with an incremented retry count while
    /// `retry_count < max_retries` and the deadline has not passed,
    /// otherwise they land in [`DrainReport::failed`]. Safe to call
    /// concurrently with `enqueue`; a second concurrent `drain` returns
    /// immediately.
    pub async fn drain<F, Fut>(&self, executor: F) -> DrainReport
    where
        F: Fn(QueueItem) -> Fut,
        Fut: Future<Output = Result<(), QueueItem>>,
    {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return DrainReport {
                already_draining: true,
                ..DrainReport::default()
            };
        }
        let _guard = DrainGuard(&self.draining);

        let mut report = DrainReport::default();

        while let Some(item) = self.pop() {
            let now = Instant::now();
            if item.past_deadline(now) {
                debug!(priority = item.priority, retries = item.retry_count, "dropping expired item");
                report.failed.push(item);
                continue;
            }

            match executor(item).await {
                Ok(()) => report.succeeded += 1,
                Err(mut item) => {
                    if item.retry_count < self.max_retries && !item.past_deadline(Instant::now()) {
                        item.retry_count += 1;
                        report.requeued += 1;
                        // Capacity cannot be exceeded: the slot was just
                        // vacated by this same item
                        let _ = self.push(item);
                    } else {
                        warn!(
                            priority = item.priority,
                            retries = item.retry_count,
                            "item permanently failed"
                        );
                        report.failed.push(item);
                    }
                }
            }
        }

        report
    }
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
