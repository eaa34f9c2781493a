use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// Fixed-capacity circular store with a monotonic write position
///
/// One writer appends, any number of readers take chronological slices.
/// The slot write and the position bump happen under the same write lock, and
/// the position is then published through an atomic so
/// [`RingBuffer::get_current_position`] never has to take the lock.
pub struct RingBuffer<T> {
    slots: RwLock<Slots<T>>,
    /// Published copy of the write position
    position: AtomicU64,
    capacity: usize,
    stats: RingBufferStats,
}

struct Slots<T> {
    /// Grows up to `capacity`, then slots are overwritten in place
    items: Vec<T>,
    /// Total items ever appended
    write_pos: u64,
}

/// Statistics for ring buffer monitoring
#[derive(Debug)]
pub struct RingBufferStats {
    /// Total items appended
    pub items_appended: AtomicU64,
    /// Items overwritten after the buffer wrapped
    pub items_overwritten: AtomicU64,
    /// Read calls served
    pub reads: AtomicU64,
}

impl RingBufferStats {
    fn new() -> Self {
        Self {
            items_appended: AtomicU64::new(0),
            items_overwritten: AtomicU64::new(0),
            reads: AtomicU64::new(0),
        }
    }

    /// Get current statistics as a snapshot
    pub fn snapshot(&self) -> RingBufferStatsSnapshot {
        RingBufferStatsSnapshot {
            items_appended: self.items_appended.load(Ordering::Relaxed),
            items_overwritten: self.items_overwritten.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of ring buffer statistics
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RingBufferStatsSnapshot {
    pub items_appended: u64,
    pub items_overwritten: u64,
    pub reads: u64,
}

impl<T: Clone> RingBuffer<T> {
    /// Create a new ring buffer holding at most `capacity` items
    ///
    /// # Example
    /// ```
    /// use ffwarden::ring_buffer::RingBuffer;
    ///
    /// let buffer = RingBuffer::new(4);
    /// buffer.append(1);
    /// assert_eq!(buffer.get_all(), (vec![1], 1));
    /// ```
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            panic!("Ring buffer capacity must be greater than 0");
        }

        debug!("Created ring buffer with capacity {}", capacity);

        Self {
            slots: RwLock::new(Slots {
                items: Vec::new(),
                write_pos: 0,
            }),
            position: AtomicU64::new(0),
            capacity,
            stats: RingBufferStats::new(),
        }
    }

    /// Append an item, overwriting the oldest one once the buffer is full
    pub fn append(&self, item: T) {
        let mut slots = self.slots.write();
        let index = (slots.write_pos % self.capacity as u64) as usize;

        if index < slots.items.len() {
            slots.items[index] = item;
            self.stats.items_overwritten.fetch_add(1, Ordering::Relaxed);
        } else {
            slots.items.push(item);
        }

        slots.write_pos += 1;
        self.position.store(slots.write_pos, Ordering::Release);
        self.stats.items_appended.fetch_add(1, Ordering::Relaxed);

        trace!("Appended item at slot {} (position {})", index, slots.write_pos);
    }

    /// Return the `n` most recent items in append order plus the current position
    ///
    /// `n == 0` and `n > capacity` both return everything still live.
    pub fn get_last_items(&self, n: usize) -> (Vec<T>, u64) {
        if n == 0 || n > self.capacity {
            return self.get_all();
        }

        let slots = self.slots.read();
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        (self.last_n(&slots, n), slots.write_pos)
    }

    /// Return every live item in append order plus the current position
    pub fn get_all(&self) -> (Vec<T>, u64) {
        let slots = self.slots.read();
        self.stats.reads.fetch_add(1, Ordering::Relaxed);

        let write_pos = slots.write_pos;
        if write_pos < self.capacity as u64 {
            return (slots.items.clone(), write_pos);
        }

        let split = (write_pos % self.capacity as u64) as usize;
        let mut result = Vec::with_capacity(self.capacity);
        result.extend_from_slice(&slots.items[split..]);
        result.extend_from_slice(&slots.items[..split]);
        (result, write_pos)
    }

    /// Return items appended after `position`, oldest first, plus the new position
    ///
    /// Items that were overwritten before the caller caught up are skipped.
    pub fn items_since(&self, position: u64) -> (Vec<T>, u64) {
        let slots = self.slots.read();
        let current = slots.write_pos;
        if position >= current {
            return (Vec::new(), current);
        }
        self.stats.reads.fetch_add(1, Ordering::Relaxed);

        let pending = current - position;
        let capacity = self.capacity as u64;
        if pending > capacity {
            warn!(
                "Reader fell behind by {} items; {} were overwritten",
                pending,
                pending - capacity
            );
        }

        (self.last_n(&slots, pending.min(capacity) as usize), current)
    }

    /// Chronological slice of the `n` newest items, `n` in `0..=capacity`
    fn last_n(&self, slots: &Slots<T>, n: usize) -> Vec<T> {
        let write_pos = slots.write_pos;
        let capacity = self.capacity as u64;
        let items = &slots.items;

        if write_pos <= capacity {
            let end = write_pos as usize;
            let start = end.saturating_sub(n);
            return items[start..end].to_vec();
        }

        let split = (write_pos % capacity) as usize;
        if split == 0 {
            items[self.capacity - n..].to_vec()
        } else if n > split {
            let mut result = Vec::with_capacity(n);
            result.extend_from_slice(&items[self.capacity - (n - split)..]);
            result.extend_from_slice(&items[..split]);
            result
        } else {
            items[split - n..split].to_vec()
        }
    }

    /// Most recently appended item
    pub fn latest(&self) -> Option<T> {
        let slots = self.slots.read();
        if slots.write_pos == 0 {
            return None;
        }
        let index = ((slots.write_pos - 1) % self.capacity as u64) as usize;
        slots.items.get(index).cloned()
    }

    /// Total items ever appended
    pub fn get_current_position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items currently held
    pub fn len(&self) -> usize {
        (self.get_current_position().min(self.capacity as u64)) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.get_current_position() == 0
    }

    /// Get current buffer statistics
    pub fn stats(&self) -> RingBufferStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Builder for creating ring buffers with validated configuration
pub struct RingBufferBuilder {
    capacity: Option<usize>,
}

impl RingBufferBuilder {
    /// Create a new ring buffer builder
    pub fn new() -> Self {
        Self { capacity: None }
    }

    /// Set the buffer capacity
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Build the ring buffer with specified configuration
    pub fn build<T: Clone>(self) -> Result<RingBuffer<T>, crate::error::FfwardenError> {
        let capacity = self.capacity.ok_or_else(|| {
            crate::error::FfwardenError::system("Ring buffer capacity must be specified")
        })?;

        if capacity == 0 {
            return Err(crate::error::FfwardenError::system(
                "Ring buffer capacity must be greater than 0",
            ));
        }

        Ok(RingBuffer::new(capacity))
    }
}

impl Default for RingBufferBuilder {
    fn default() -> Self {
        Self::new()
    }
}
