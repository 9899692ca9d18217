//! Bounded FIFO hand-off between the I/O loop and the worker pool.
//!
//! [`FrameQueue`] is a single process-wide queue guarded by one lock and a
//! pair of condition variables. The I/O loop pushes decoded frames; workers
//! block in [`pop_with`](FrameQueue::pop_with) until a job is available or the
//! queue is closed.
//!
//! Per-connection ordering relies on this queue being one strict FIFO:
//! `pop_with` runs its closure while the lock is still held, so a worker can
//! assign the job's sequence number before any other worker is able to pop
//! the next job.

#[cfg(not(loom))]
use std::sync::{Condvar, Mutex, MutexGuard};
use std::{
    collections::VecDeque,
    sync::PoisonError,
    time::{Duration, Instant},
};

use image::DynamicImage;
#[cfg(loom)]
use loom::sync::{Condvar, Mutex, MutexGuard};
use thiserror::Error;

use crate::session::ConnectionId;

/// Default capacity of the frame queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A decoded frame awaiting processing.
#[derive(Debug)]
pub struct FrameJob {
    /// Connection the frame arrived on.
    pub connection: ConnectionId,
    /// Decoded inbound frame.
    pub image: DynamicImage,
}

/// Behaviour when a push finds the queue full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest queued job to make room.
    DropOldest,
    /// Reject the incoming job.
    DropNewest,
    /// Wait up to `timeout` for room, then reject the incoming job.
    Block { timeout: Duration },
}

impl Default for OverflowPolicy {
    fn default() -> Self { Self::DropOldest }
}

/// Errors returned by [`FrameQueue`] operations.
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was at capacity and the incoming job was rejected.
    #[error("frame queue full")]
    Full,
    /// The oldest job was evicted to make room.
    #[error("oldest queued frame evicted")]
    Evicted,
    /// The queue no longer accepts jobs.
    #[error("frame queue closed")]
    Closed,
    /// The configured capacity was zero.
    #[error("invalid queue capacity {0}; must be >= 1")]
    InvalidCapacity(usize),
}

/// Outcome of a successful [`FrameQueue::push`].
#[derive(Debug, PartialEq, Eq)]
pub enum Pushed<T> {
    /// The job was queued without displacing anything.
    Queued,
    /// The job was queued after evicting this older job.
    Evicted(T),
}

struct QueueState<T> {
    jobs: VecDeque<T>,
    closed: bool,
}

/// Bounded multi-producer, multi-consumer FIFO.
pub struct FrameQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
    space: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
}

impl<T> std::fmt::Debug for FrameQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameQueue")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<T> FrameQueue<T> {
    /// Create a queue holding at most `capacity` jobs.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidCapacity`] if `capacity` is zero.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::InvalidCapacity(capacity));
        }
        Ok(Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Condvar::new(),
            space: Condvar::new(),
            capacity,
            policy,
        })
    }

    /// Number of jobs currently queued.
    #[must_use]
    pub fn len(&self) -> usize { self.lock().jobs.len() }

    /// Whether no jobs are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.lock().jobs.is_empty() }

    /// Append a job and wake one waiting worker.
    ///
    /// With [`OverflowPolicy::Block`] the call waits at most the configured
    /// timeout; the other policies never wait.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] once the queue is closed and
    /// [`QueueError::Full`] when the policy rejects the job.
    pub fn push(&self, job: T) -> Result<Pushed<T>, QueueError> {
        let mut state = self.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }
        let mut outcome = Pushed::Queued;
        if state.jobs.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropNewest => return Err(QueueError::Full),
                OverflowPolicy::DropOldest => {
                    if let Some(oldest) = state.jobs.pop_front() {
                        outcome = Pushed::Evicted(oldest);
                    }
                }
                OverflowPolicy::Block { timeout } => {
                    state = self.wait_for_space(state, timeout)?;
                }
            }
        }
        state.jobs.push_back(job);
        drop(state);
        self.available.notify_one();
        Ok(outcome)
    }

    /// Block until a job is available, then hand it to `f` while the queue
    /// lock is still held.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub fn pop_with<R>(&self, f: impl FnOnce(T) -> R) -> Option<R> {
        let mut state = self.lock();
        loop {
            if let Some(job) = state.jobs.pop_front() {
                let result = f(job);
                drop(state);
                self.space.notify_one();
                return Some(result);
            }
            if state.closed {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stop accepting jobs and wake every waiter.
    ///
    /// Jobs already queued remain available to [`pop_with`](Self::pop_with).
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
        self.space.notify_all();
    }

    /// Close the queue and discard every job still queued.
    ///
    /// Returns the number of discarded jobs.
    pub fn abandon(&self) -> usize {
        let discarded = {
            let mut state = self.lock();
            state.closed = true;
            let n = state.jobs.len();
            state.jobs.clear();
            n
        };
        self.available.notify_all();
        self.space.notify_all();
        discarded
    }

    fn wait_for_space<'a>(
        &'a self,
        mut state: MutexGuard<'a, QueueState<T>>,
        timeout: Duration,
    ) -> Result<MutexGuard<'a, QueueState<T>>, QueueError> {
        let deadline = Instant::now() + timeout;
        while state.jobs.len() >= self.capacity {
            if state.closed {
                return Err(QueueError::Closed);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(QueueError::Full);
            }
            state = self
                .space
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        if state.closed {
            return Err(QueueError::Closed);
        }
        Ok(state)
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use std::{sync::Arc, thread};

    use rstest::rstest;

    use super::*;

    fn queue(capacity: usize, policy: OverflowPolicy) -> FrameQueue<u8> {
        FrameQueue::new(capacity, policy).expect("valid capacity")
    }

    fn pop(queue: &FrameQueue<u8>) -> Option<u8> { queue.pop_with(|job| job) }

    #[test]
    fn rejects_zero_capacity() {
        let err = FrameQueue::<u8>::new(0, OverflowPolicy::DropOldest).expect_err("zero capacity");
        assert_eq!(err, QueueError::InvalidCapacity(0));
    }

    #[test]
    fn preserves_fifo_order() {
        let queue = queue(4, OverflowPolicy::DropNewest);
        for n in 1..=3 {
            assert_eq!(queue.push(n), Ok(Pushed::Queued));
        }
        assert_eq!(pop(&queue), Some(1));
        assert_eq!(pop(&queue), Some(2));
        assert_eq!(pop(&queue), Some(3));
    }

    #[rstest]
    #[case::drop_oldest(OverflowPolicy::DropOldest, Ok(Pushed::Evicted(1)), vec![2, 3])]
    #[case::drop_newest(OverflowPolicy::DropNewest, Err(QueueError::Full), vec![1, 2])]
    #[case::block(
        OverflowPolicy::Block { timeout: Duration::from_millis(20) },
        Err(QueueError::Full),
        vec![1, 2]
    )]
    fn overflow_policies(
        #[case] policy: OverflowPolicy,
        #[case] expected: Result<Pushed<u8>, QueueError>,
        #[case] remaining: Vec<u8>,
    ) {
        let queue = queue(2, policy);
        queue.push(1).expect("first push");
        queue.push(2).expect("second push");
        assert_eq!(queue.push(3), expected);
        queue.close();
        let drained: Vec<_> = std::iter::from_fn(|| pop(&queue)).collect();
        assert_eq!(drained, remaining);
    }

    #[test]
    fn blocked_push_resumes_when_space_frees() {
        let queue = Arc::new(queue(
            1,
            OverflowPolicy::Block {
                timeout: Duration::from_secs(5),
            },
        ));
        queue.push(1).expect("first push");
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(pop(&queue), Some(1));
        assert_eq!(producer.join().expect("producer panicked"), Ok(Pushed::Queued));
        assert_eq!(pop(&queue), Some(2));
    }

    #[test]
    fn close_wakes_idle_consumers() {
        let queue = Arc::new(queue(1, OverflowPolicy::DropOldest));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || pop(&queue))
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(consumer.join().expect("consumer panicked"), None);
        assert_eq!(queue.push(9), Err(QueueError::Closed));
    }

    #[test]
    fn close_keeps_queued_jobs_for_draining() {
        let queue = queue(4, OverflowPolicy::DropOldest);
        queue.push(1).expect("push");
        queue.push(2).expect("push");
        queue.close();
        assert_eq!(pop(&queue), Some(1));
        assert_eq!(pop(&queue), Some(2));
        assert_eq!(pop(&queue), None);
    }

    #[test]
    fn abandon_discards_jobs() {
        let queue = queue(4, OverflowPolicy::DropOldest);
        queue.push(1).expect("push");
        queue.push(2).expect("push");
        assert_eq!(queue.abandon(), 2);
        assert!(queue.is_empty());
        assert_eq!(pop(&queue), None);
    }

    #[test]
    fn pop_runs_closure_before_next_pop() {
        let queue = Arc::new(queue(8, OverflowPolicy::DropNewest));
        for n in 0..8 {
            queue.push(n).expect("push");
        }
        queue.close();
        let counter = Arc::new(Mutex::new(Vec::new()));
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    while queue
                        .pop_with(|job| counter.lock().expect("lock").push(job))
                        .is_some()
                    {}
                })
            })
            .collect();
        for consumer in consumers {
            consumer.join().expect("consumer panicked");
        }
        let seen = counter.lock().expect("lock").clone();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }
}
