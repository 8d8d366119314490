//! Fixed-capacity ring buffer for recent console lines.
//!
//! Each channel keeps the last N decoded lines here so waiters and probes can
//! inspect them without touching the serial device. When full, new lines
//! overwrite the oldest. No allocations after initial creation.
//!
//! Every push advances a monotonic counter. A probe takes [`RingBuffer::mark`]
//! before it sends its command and later asks for [`RingBuffer::since`] that
//! mark, so lines it has already scanned are never handed back, even after
//! `clear()` or eviction.

use serde::{Deserialize, Serialize};

// =============================================================================
// RingBuffer
// =============================================================================

/// A fixed-capacity ring buffer.
///
/// Iteration yields items from oldest to newest.
pub struct RingBuffer<T> {
    buf: Vec<Option<T>>,
    capacity: usize,
    head: usize, // next write position
    len: usize,  // current number of items
    total: u64,  // total items ever pushed, survives clear()
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || None);
        Self {
            buf,
            capacity,
            head: 0,
            len: 0,
            total: 0,
        }
    }

    /// Push an item into the buffer.
    ///
    /// If full, the oldest item is overwritten and returned.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = self.buf[self.head].take();
        self.buf[self.head] = Some(item);
        self.head = (self.head + 1) % self.capacity;
        self.total += 1;
        if self.len < self.capacity {
            self.len += 1;
            None
        } else {
            evicted
        }
    }

    /// Get the most recently pushed item.
    #[must_use]
    pub fn back(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        self.get(self.len - 1)
    }

    /// Get the oldest item in the buffer.
    #[must_use]
    pub fn front(&self) -> Option<&T> {
        self.get(0)
    }

    fn start(&self) -> usize {
        if self.len < self.capacity {
            (self.head + self.capacity - self.len) % self.capacity
        } else {
            self.head
        }
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> RingBufferIter<'_, T> {
        RingBufferIter {
            ring: self,
            front: 0,
            back: self.len,
        }
    }

    /// Get item at logical index (0 = oldest).
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        let actual = (self.start() + index) % self.capacity;
        self.buf[actual].as_ref()
    }

    /// Current push counter; pass it to [`since`](Self::since) later.
    #[must_use]
    pub fn mark(&self) -> u64 {
        self.total
    }

    /// Items pushed after `mark` that are still held, oldest first.
    ///
    /// Items that were pushed after `mark` but already evicted or cleared are
    /// gone; the iterator only ever yields what is still buffered.
    pub fn since(&self, mark: u64) -> RingBufferIter<'_, T> {
        let newer = self.total.saturating_sub(mark);
        let held = usize::try_from(newer).unwrap_or(usize::MAX).min(self.len);
        RingBufferIter {
            ring: self,
            front: self.len - held,
            back: self.len,
        }
    }

    /// Current number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the buffer is full.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    /// Maximum capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total items ever pushed (including overwrites).
    #[must_use]
    pub fn total_pushed(&self) -> u64 {
        self.total
    }

    /// Clear all items. The push counter keeps running.
    pub fn clear(&mut self) {
        for slot in &mut self.buf {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Collect to an owned Vec (oldest to newest).
    #[must_use]
    pub fn to_owned_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len)
            .field("total_pushed", &self.total)
            .finish()
    }
}

// =============================================================================
// RingBufferIter
// =============================================================================

/// Iterator over ring buffer items (oldest to newest, reversible).
pub struct RingBufferIter<'a, T> {
    ring: &'a RingBuffer<T>,
    front: usize,
    back: usize,
}

impl<'a, T> Iterator for RingBufferIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        let item = self.ring.get(self.front);
        self.front += 1;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.back - self.front;
        (remaining, Some(remaining))
    }
}

impl<T> DoubleEndedIterator for RingBufferIter<'_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        self.back -= 1;
        self.ring.get(self.back)
    }
}

impl<T> ExactSizeIterator for RingBufferIter<'_, T> {}

// =============================================================================
// RingBufferStats (serializable)
// =============================================================================

/// Serializable statistics about a ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingBufferStats {
    pub capacity: usize,
    pub len: usize,
    pub total_pushed: u64,
}

impl<T> RingBuffer<T> {
    /// Get statistics.
    #[must_use]
    pub fn stats(&self) -> RingBufferStats {
        RingBufferStats {
            capacity: self.capacity,
            len: self.len,
            total_pushed: self.total,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
