//! Fixed-capacity circular history store.
//!
//! # Invariants
//! - `size <= capacity`
//! - When full, `add` evicts exactly the oldest element (FIFO)
//! - Reads return elements oldest-to-newest
//!
//! # Design Decisions
//! - One `RwLock` per buffer; buffers never block each other
//! - Evicted slots are reset to `None` so dropped traces are released immediately
//! - Reads copy at most two contiguous runs (the wrap-around case)

use parking_lot::RwLock;

struct Slots<T> {
    items: Vec<Option<T>>,
    head: usize,
    tail: usize,
    size: usize,
}

/// A thread-safe ring buffer retaining the most recent `capacity` items.
pub struct RingBuffer<T> {
    inner: RwLock<Slots<T>>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` items.
    ///
    /// A capacity of zero is bumped to one so `add` always retains the newest item.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: RwLock::new(Slots {
                items: (0..capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
                size: 0,
            }),
            capacity,
        }
    }

    /// Append an item, evicting the oldest one when full.
    ///
    /// Returns the evicted item, if any.
    pub fn add(&self, item: T) -> Option<T> {
        let mut slots = self.inner.write();
        let mut evicted = None;

        if slots.size == self.capacity {
            let head = slots.head;
            evicted = slots.items[head].take();
            slots.head = (head + 1) % self.capacity;
        } else {
            slots.size += 1;
        }

        let tail = slots.tail;
        slots.items[tail] = Some(item);
        slots.tail = (tail + 1) % self.capacity;
        evicted
    }

    /// All live items, oldest first.
    pub fn get_all(&self) -> Vec<T> {
        let slots = self.inner.read();
        Self::copy_window(&slots, self.capacity, slots.size)
    }

    /// The last `min(n, size)` items, oldest of the window first.
    pub fn get_recent(&self, n: usize) -> Vec<T> {
        let slots = self.inner.read();
        let n = n.min(slots.size);
        Self::copy_window(&slots, self.capacity, n)
    }

    fn copy_window(slots: &Slots<T>, capacity: usize, n: usize) -> Vec<T> {
        let mut result = Vec::with_capacity(n);
        if n == 0 {
            return result;
        }

        let start = (slots.head + slots.size - n) % capacity;
        let first_run = n.min(capacity - start);
        result.extend(slots.items[start..start + first_run].iter().flatten().cloned());
        if first_run < n {
            result.extend(slots.items[..n - first_run].iter().flatten().cloned());
        }
        result
    }

    /// Keep only items matching `keep`, preserving order. Returns the number removed.
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let mut slots = self.inner.write();
        let before = slots.size;
        let mut kept = Vec::with_capacity(before);
        for i in 0..before {
            let idx = (slots.head + i) % self.capacity;
            if let Some(item) = slots.items[idx].take() {
                if keep(&item) {
                    kept.push(item);
                }
            }
        }

        let removed = before - kept.len();
        slots.head = 0;
        slots.size = kept.len();
        slots.tail = kept.len() % self.capacity;
        for (i, item) in kept.into_iter().enumerate() {
            slots.items[i] = Some(item);
        }
        removed
    }

    /// Drop every item and reset the indices.
    pub fn clear(&self) {
        let mut slots = self.inner.write();
        slots.items.iter_mut().for_each(|slot| *slot = None);
        slots.head = 0;
        slots.tail = 0;
        slots.size = 0;
    }

    /// Current number of items.
    pub fn size(&self) -> usize {
        self.inner.read().size
    }

    /// Maximum number of items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_eviction_order() {
        let buffer = RingBuffer::new(2);
        buffer.add("a");
        buffer.add("b");
        let evicted = buffer.add("c");

        assert_eq!(evicted, Some("a"));
        assert_eq!(buffer.get_all(), vec!["b", "c"]);
        assert_eq!(buffer.size(), 2);
    }

    #[test]
    fn test_recent_window() {
        let buffer = RingBuffer::new(4);
        for i in 0..6 {
            buffer.add(i);
        }
        assert_eq!(buffer.get_all(), vec![2, 3, 4, 5]);
        assert_eq!(buffer.get_recent(2), vec![4, 5]);
        assert_eq!(buffer.get_recent(10), vec![2, 3, 4, 5]);
        assert!(buffer.get_recent(0).is_empty());
    }

    #[test]
    fn test_clear() {
        let buffer = RingBuffer::new(3);
        buffer.add(1);
        buffer.add(2);
        buffer.clear();
        assert_eq!(buffer.size(), 0);
        assert!(buffer.get_all().is_empty());

        buffer.add(7);
        assert_eq!(buffer.get_all(), vec![7]);
    }

    #[test]
    fn test_retain_after_wrap() {
        let buffer = RingBuffer::new(3);
        for i in 1..=5 {
            buffer.add(i);
        }
        let removed = buffer.retain(|v| v % 2 == 1);
        assert_eq!(removed, 1);
        assert_eq!(buffer.get_all(), vec![3, 5]);

        buffer.add(6);
        buffer.add(7);
        assert_eq!(buffer.get_all(), vec![5, 6, 7]);
    }

    #[test]
    fn test_concurrent_adds() {
        let buffer = std::sync::Arc::new(RingBuffer::new(64));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        buffer.add(t * 1000 + i);
                        let _ = buffer.get_recent(8);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(buffer.size(), 64);
        assert_eq!(buffer.get_all().len(), 64);
    }

    proptest! {
        #[test]
        fn prop_keeps_last_capacity_items(capacity in 1usize..32, items in proptest::collection::vec(any::<u32>(), 0..100)) {
            let buffer = RingBuffer::new(capacity);
            for item in &items {
                buffer.add(*item);
            }

            let expected_len = items.len().min(capacity);
            let expected: Vec<u32> = items[items.len() - expected_len..].to_vec();
            prop_assert_eq!(buffer.size(), expected_len);
            prop_assert_eq!(buffer.get_all(), expected);
        }

        #[test]
        fn prop_recent_is_suffix(capacity in 1usize..16, count in 0usize..40, k in 0usize..20) {
            let buffer = RingBuffer::new(capacity);
            for i in 0..count {
                buffer.add(i);
            }

            let all = buffer.get_all();
            let recent = buffer.get_recent(k);
            prop_assert_eq!(recent.len(), k.min(all.len()));
            prop_assert_eq!(&recent[..], &all[all.len() - recent.len()..]);
        }
    }
}
