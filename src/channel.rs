// src/channel.rs
//
// Bounded single-producer/single-consumer byte queue between the link reader
// and the write activity. Senders block for capacity instead of dropping data.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;

/// How often blocked callers re-check the cancellation signal.
const CANCEL_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("send cancelled while waiting for capacity")]
    Cancelled,
    #[error("channel producer has hung up")]
    Closed,
    #[error("channel closed with {0} bytes still queued")]
    Undrained(usize),
}

#[derive(Debug)]
struct Queue {
    bytes: VecDeque<u8>,
    hung_up: bool,
}

/// Fixed-capacity byte queue with blocking receive and backpressuring send.
#[derive(Debug)]
pub struct BoundedByteChannel {
    capacity: usize,
    queue: Mutex<Queue>,
    readable: Condvar,
    writable: Condvar,
}

impl BoundedByteChannel {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            queue: Mutex::new(Queue {
                bytes: VecDeque::with_capacity(capacity),
                hung_up: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue `data`, blocking while the queue is full.
    ///
    /// Data larger than the free space goes in piecewise as the consumer
    /// drains. Bytes already enqueued when cancellation is observed stay
    /// queued and are still delivered.
    pub fn send(&self, data: &[u8], cancel: &CancelToken) -> Result<(), ChannelError> {
        let mut remaining = data;
        let mut queue = self.lock();
        while !remaining.is_empty() {
            if queue.hung_up {
                return Err(ChannelError::Closed);
            }
            let free = self.capacity - queue.bytes.len();
            if free == 0 {
                if cancel.is_cancelled() {
                    return Err(ChannelError::Cancelled);
                }
                queue = self.wait(&self.writable, queue);
                continue;
            }
            let take = free.min(remaining.len());
            queue.bytes.extend(&remaining[..take]);
            remaining = &remaining[take..];
            self.readable.notify_one();
        }
        Ok(())
    }

    /// Block until at least one byte is queued, then move up to `buf.len()`
    /// bytes into `buf`. Returns 0 only when the queue is empty and either
    /// the signal is raised or the producer has hung up.
    pub fn receive(&self, buf: &mut [u8], cancel: &CancelToken) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let mut queue = self.lock();
        loop {
            if !queue.bytes.is_empty() {
                return self.take(&mut queue, buf);
            }
            if queue.hung_up || cancel.is_cancelled() {
                return 0;
            }
            queue = self.wait(&self.readable, queue);
        }
    }

    /// `receive` with a time limit. Returns `None` if nothing arrived within
    /// `timeout`, so the caller can do other work between waits.
    pub fn receive_timeout(
        &self,
        buf: &mut [u8],
        cancel: &CancelToken,
        timeout: Duration,
    ) -> Option<usize> {
        if buf.is_empty() {
            return Some(0);
        }
        let deadline = Instant::now() + timeout;
        let mut queue = self.lock();
        loop {
            if !queue.bytes.is_empty() {
                return Some(self.take(&mut queue, buf));
            }
            if queue.hung_up || cancel.is_cancelled() {
                return Some(0);
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return None;
            }
            queue = self.wait_at_most(&self.readable, queue, left);
        }
    }

    /// Like `receive`, but ignores cancellation: waits until data arrives or
    /// the producer hangs up. Used to drain the queue during shutdown.
    pub fn receive_remaining(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let mut queue = self.lock();
        loop {
            if !queue.bytes.is_empty() {
                return self.take(&mut queue, buf);
            }
            if queue.hung_up {
                return 0;
            }
            queue = self.wait(&self.readable, queue);
        }
    }

    /// Producer end-of-stream. Queued bytes remain readable.
    pub fn hang_up(&self) {
        let mut queue = self.lock();
        queue.hung_up = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub fn is_hung_up(&self) -> bool {
        self.lock().hung_up
    }

    /// Final teardown. Fails if bytes were accepted but never received.
    pub fn close(&self) -> Result<(), ChannelError> {
        let mut queue = self.lock();
        queue.hung_up = true;
        self.readable.notify_all();
        self.writable.notify_all();
        match queue.bytes.len() {
            0 => Ok(()),
            n => Err(ChannelError::Undrained(n)),
        }
    }

    fn take(&self, queue: &mut MutexGuard<'_, Queue>, buf: &mut [u8]) -> usize {
        let n = buf.len().min(queue.bytes.len());
        for (slot, byte) in buf.iter_mut().zip(queue.bytes.drain(..n)) {
            *slot = byte;
        }
        self.writable.notify_one();
        n
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        // The queue holds plain bytes; a panic elsewhere cannot leave it inconsistent
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn wait<'a>(&self, cond: &Condvar, guard: MutexGuard<'a, Queue>) -> MutexGuard<'a, Queue> {
        self.wait_at_most(cond, guard, CANCEL_POLL)
    }

    fn wait_at_most<'a>(
        &self,
        cond: &Condvar,
        guard: MutexGuard<'a, Queue>,
        limit: Duration,
    ) -> MutexGuard<'a, Queue> {
        match cond.wait_timeout(guard, limit.min(CANCEL_POLL)) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }
}
