#![forbid(unsafe_code)]

//! Fixed-capacity circular buffer.
//!
//! Render samples and frame timestamps are appended every frame, so the
//! buffers that hold them must never grow. [`RingBuffer`] allocates its
//! storage once and overwrites the oldest element when full.
//!
//! Iteration order is oldest to newest; [`RingBuffer::iter_newest`] walks the
//! other way, which is what trailing-window statistics need.

/// Fixed-capacity circular buffer that evicts its oldest element when full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    /// Index of the oldest element.
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Create an empty buffer holding at most `capacity` elements.
    ///
    /// A capacity of zero is bumped to one so `push` always retains the
    /// latest element.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    /// Maximum number of retained elements.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of retained elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the next push will evict.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Append an element, returning the evicted oldest element if the buffer
    /// was full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let cap = self.capacity();
        if self.len < cap {
            let idx = (self.head + self.len) % cap;
            self.slots[idx] = Some(value);
            self.len += 1;
            None
        } else {
            let evicted = self.slots[self.head].replace(value);
            self.head = (self.head + 1) % cap;
            evicted
        }
    }

    /// Most recently pushed element.
    pub fn newest(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.head + self.len - 1) % self.capacity();
        self.slots[idx].as_ref()
    }

    /// Oldest retained element.
    pub fn oldest(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        let cap = self.capacity();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % cap].as_ref())
    }

    /// Iterate newest to oldest.
    pub fn iter_newest(&self) -> impl Iterator<Item = &T> + '_ {
        self.iter().rev()
    }

    /// Drop all elements, keeping the allocation.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}
