//! Bounded input queue between a session and its encoder's stdin writer.
//!
//! The queue is budgeted in bytes, not chunks, so memory stays bounded no
//! matter how the client frames its payload. One producer (the session) and
//! one consumer (the stdin writer task) are expected.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use cf_core::config::BackpressurePolicy;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct QueueState {
    chunks: VecDeque<Bytes>,
    bytes: usize,
    closed: bool,
    dropped_bytes: u64,
}

impl QueueState {
    fn fits(&self, len: usize, capacity: usize) -> bool {
        // An oversized chunk is still admitted into an empty queue.
        self.chunks.is_empty() || self.bytes + len <= capacity
    }
}

/// Byte-budgeted FIFO with a configurable full-queue policy.
#[derive(Debug)]
pub struct FeedQueue {
    label: String,
    capacity: usize,
    policy: BackpressurePolicy,
    wait_timeout: Duration,
    state: Mutex<QueueState>,
    readable: Notify,
    writable: Notify,
}

impl FeedQueue {
    pub fn new(
        label: impl Into<String>,
        capacity: usize,
        policy: BackpressurePolicy,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            label: label.into(),
            capacity: capacity.max(1),
            policy,
            wait_timeout,
            state: Mutex::new(QueueState::default()),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    /// Enqueue a chunk according to the queue's policy.
    ///
    /// Returns the number of previously queued bytes evicted to make room
    /// (always 0 under [`BackpressurePolicy::Wait`]).
    ///
    /// # Errors
    ///
    /// - [`cf_core::Error::Encoder`] if the queue has been closed.
    /// - [`cf_core::Error::Backpressure`] if no room appeared before the
    ///   wait timeout.
    pub async fn push(&self, chunk: Bytes) -> cf_core::Result<usize> {
        if chunk.is_empty() {
            return Ok(0);
        }
        match self.policy {
            BackpressurePolicy::DropOldest => self.push_evicting(chunk),
            BackpressurePolicy::Wait => self.push_waiting(chunk).await.map(|()| 0),
        }
    }

    fn push_evicting(&self, chunk: Bytes) -> cf_core::Result<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }

        let mut evicted = 0usize;
        while !state.fits(chunk.len(), self.capacity) {
            let Some(oldest) = state.chunks.pop_front() else {
                break;
            };
            state.bytes -= oldest.len();
            evicted += oldest.len();
        }
        state.dropped_bytes += evicted as u64;
        state.bytes += chunk.len();
        state.chunks.push_back(chunk);
        drop(state);

        self.readable.notify_one();
        Ok(evicted)
    }

    async fn push_waiting(&self, chunk: Bytes) -> cf_core::Result<()> {
        let deadline = Instant::now() + self.wait_timeout;
        loop {
            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(self.closed_error());
                }
                if state.fits(chunk.len(), self.capacity) {
                    state.bytes += chunk.len();
                    state.chunks.push_back(chunk);
                    drop(state);
                    self.readable.notify_one();
                    return Ok(());
                }
            }

            // `notify_one` stores a permit when nobody is waiting, so a pop
            // that lands between the check above and this await still wakes us.
            if tokio::time::timeout_at(deadline, self.writable.notified())
                .await
                .is_err()
            {
                return Err(cf_core::Error::Backpressure(format!(
                    "{}: input queue full ({} bytes) for {:?}",
                    self.label, self.capacity, self.wait_timeout
                )));
            }
        }
    }

    /// Dequeue the next chunk, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(chunk) = state.chunks.pop_front() {
                    state.bytes -= chunk.len();
                    drop(state);
                    self.writable.notify_one();
                    return Some(chunk);
                }
                if state.closed {
                    return None;
                }
            }
            self.readable.notified().await;
        }
    }

    /// Refuse further pushes; already queued chunks can still be drained.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.wake_all();
    }

    /// Refuse further pushes and discard everything still queued.
    ///
    /// Returns the number of bytes discarded.
    pub fn close_and_clear(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            state.closed = true;
            state.chunks.clear();
            std::mem::take(&mut state.bytes)
        };
        self.wake_all();
        discarded
    }

    /// Bytes currently queued.
    pub fn queued_bytes(&self) -> usize {
        self.state.lock().bytes
    }

    /// Total bytes evicted by the drop-oldest policy since creation.
    pub fn dropped_bytes(&self) -> u64 {
        self.state.lock().dropped_bytes
    }

    fn wake_all(&self) {
        self.readable.notify_waiters();
        self.readable.notify_one();
        self.writable.notify_waiters();
        self.writable.notify_one();
    }

    fn closed_error(&self) -> cf_core::Error {
        cf_core::Error::encoder(self.label.clone(), "encoder input is closed")
    }
}
