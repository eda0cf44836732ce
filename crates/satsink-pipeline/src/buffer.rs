//! Bounded per-channel byte buffer.
//!
//! One producer (the dispatcher) appends blobs, one consumer (the delivery
//! worker) pops them. The bound is expressed in bytes. When an append pushes
//! the total past capacity the oldest blobs are evicted until it fits again,
//! so the sink always sees the freshest data and the producer never blocks.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use satsink_frame::ChannelType;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How long a waiting consumer sleeps before re-checking cancellation.
const DEQUEUE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What happened to a blob handed to [`ChannelBuffer::enqueue`].
///
/// The buffer only records the facts; the caller decides what to log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOutcome {
    /// The blob is now queued.
    pub accepted: bool,
    /// Blobs discarded by this call (evicted, or the new one if oversized).
    pub dropped_items: usize,
    /// Bytes discarded by this call.
    pub dropped_bytes: usize,
    /// Occupancy percent, set when this append crossed a new warning level.
    pub fill_warning: Option<u8>,
}

/// Point-in-time view of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub capacity: usize,
    pub buffered_bytes: usize,
    pub buffered_items: usize,
    pub occupancy_percent: u8,
}

#[derive(Debug, Default)]
struct BufferState {
    queue: VecDeque<Bytes>,
    total_bytes: usize,
    /// Bytes discarded since the last `take_dropped`.
    dropped_bytes: u64,
    /// Highest occupancy already warned about; 0 means armed.
    warned_percent: u8,
    closed: bool,
}

/// Byte-bounded FIFO with drop-oldest overflow.
#[derive(Debug)]
pub struct ChannelBuffer {
    channel: ChannelType,
    capacity: usize,
    warn_percent: u8,
    state: Mutex<BufferState>,
    ready: Condvar,
}

impl ChannelBuffer {
    /// Create an empty buffer holding at most `capacity` bytes.
    ///
    /// `warn_percent` is the occupancy at which fill warnings start.
    pub fn new(channel: ChannelType, capacity: usize, warn_percent: u8) -> Self {
        Self {
            channel,
            capacity,
            warn_percent: warn_percent.max(1),
            state: Mutex::new(BufferState::default()),
            ready: Condvar::new(),
        }
    }

    /// Channel this buffer serves.
    pub fn channel(&self) -> ChannelType {
        self.channel
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a blob, evicting the oldest entries if capacity is exceeded.
    ///
    /// Never blocks on the consumer. A blob larger than the whole capacity is
    /// discarded on its own and leaves queued data untouched. A closed buffer
    /// rejects new blobs.
    pub fn enqueue(&self, blob: Bytes) -> EnqueueOutcome {
        let len = blob.len();
        let mut state = self.lock();

        if state.closed {
            debug!(channel = self.channel.as_str(), len, "buffer closed, blob rejected");
            return EnqueueOutcome::default();
        }

        if len > self.capacity {
            state.dropped_bytes += len as u64;
            return EnqueueOutcome {
                accepted: false,
                dropped_items: 1,
                dropped_bytes: len,
                fill_warning: None,
            };
        }

        state.queue.push_back(blob);
        state.total_bytes += len;

        let mut outcome = EnqueueOutcome {
            accepted: true,
            ..EnqueueOutcome::default()
        };
        while state.total_bytes > self.capacity {
            let Some(oldest) = state.queue.pop_front() else {
                break;
            };
            state.total_bytes -= oldest.len();
            outcome.dropped_items += 1;
            outcome.dropped_bytes += oldest.len();
        }
        state.dropped_bytes += outcome.dropped_bytes as u64;

        let percent = self.percent_of(state.total_bytes);
        if percent >= self.warn_percent && percent > state.warned_percent {
            state.warned_percent = percent;
            outcome.fill_warning = Some(percent);
        }

        drop(state);
        self.ready.notify_one();
        outcome
    }

    /// Pop the oldest blob, waiting until one is available.
    ///
    /// Returns `None` once `token` is cancelled, or once the buffer is closed
    /// and fully drained.
    pub fn dequeue(&self, token: &CancellationToken) -> Option<Bytes> {
        let mut state = self.lock();
        loop {
            if token.is_cancelled() {
                return None;
            }
            if let Some(blob) = self.pop(&mut state) {
                return Some(blob);
            }
            if state.closed {
                return None;
            }
            state = match self.ready.wait_timeout(state, DEQUEUE_POLL_INTERVAL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Pop the oldest blob without waiting.
    pub fn try_dequeue(&self) -> Option<Bytes> {
        let mut state = self.lock();
        self.pop(&mut state)
    }

    /// Bytes discarded since the previous call, if any.
    pub fn take_dropped(&self) -> Option<u64> {
        let mut state = self.lock();
        match std::mem::take(&mut state.dropped_bytes) {
            0 => None,
            n => Some(n),
        }
    }

    /// Number of queued blobs.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Sum of queued blob lengths.
    pub fn total_bytes(&self) -> usize {
        self.lock().total_bytes
    }

    /// Queued bytes as a percentage of capacity.
    pub fn occupancy_percent(&self) -> u8 {
        let total = self.lock().total_bytes;
        self.percent_of(total)
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        let state = self.lock();
        BufferSnapshot {
            capacity: self.capacity,
            buffered_bytes: state.total_bytes,
            buffered_items: state.queue.len(),
            occupancy_percent: self.percent_of(state.total_bytes),
        }
    }

    /// Stop accepting blobs. The consumer drains what is left, then sees `None`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    /// True after [`close`](Self::close).
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Wake a waiting consumer so it re-checks its cancellation token.
    pub fn wake(&self) {
        let _state = self.lock();
        self.ready.notify_all();
    }

    fn pop(&self, state: &mut BufferState) -> Option<Bytes> {
        let blob = state.queue.pop_front()?;
        state.total_bytes -= blob.len();
        if self.percent_of(state.total_bytes) < self.warn_percent {
            state.warned_percent = 0;
        }
        Some(blob)
    }

    fn percent_of(&self, bytes: usize) -> u8 {
        let percent = (bytes as u64).saturating_mul(100) / self.capacity.max(1) as u64;
        percent.min(100) as u8
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
