//! Binary heap ordered by a caller-supplied comparator.
//!
//! [`std::collections::BinaryHeap`] needs `Ord` on the element type; the BPE
//! merge loop and top-k selection want to order plain tuples and floats by an
//! ad-hoc rule, and top-k wants a size bound.

use std::cmp::Ordering;

/// Max-heap where "max" is defined by `compare`.
///
/// With a `max_size`, pushing into a full queue discards whichever element has
/// the lowest priority, so the queue keeps the best `max_size` elements seen.
pub struct PriorityQueue<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    heap: Vec<T>,
    compare: F,
    max_size: Option<usize>,
}

impl<T, F> PriorityQueue<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    pub fn new(compare: F) -> Self {
        Self {
            heap: Vec::new(),
            compare,
            max_size: None,
        }
    }

    pub fn with_max_size(compare: F, max_size: usize) -> Self {
        Self {
            heap: Vec::with_capacity(max_size.min(1024)),
            compare,
            max_size: Some(max_size),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Highest-priority element without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.heap.first()
    }

    pub fn push(&mut self, value: T) {
        if self.max_size == Some(0) {
            return;
        }
        if self.max_size.is_some_and(|max| self.heap.len() >= max) {
            // The lowest element lives among the leaves.
            let first_leaf = self.heap.len() / 2;
            let mut lowest = first_leaf;
            for i in first_leaf + 1..self.heap.len() {
                if (self.compare)(&self.heap[i], &self.heap[lowest]) == Ordering::Less {
                    lowest = i;
                }
            }
            if (self.compare)(&value, &self.heap[lowest]) != Ordering::Greater {
                return;
            }
            self.heap[lowest] = value;
            self.sift_up(lowest);
            return;
        }
        self.heap.push(value);
        self.sift_up(self.heap.len() - 1);
    }

    pub fn extend<I: IntoIterator<Item = T>>(&mut self, values: I) {
        for value in values {
            self.push(value);
        }
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let top = self.heap.pop();
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        top
    }

    /// Drain in priority order, highest first.
    pub fn into_sorted_vec(mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(v) = self.pop() {
            out.push(v);
        }
        out
    }

    fn greater(&self, a: usize, b: usize) -> bool {
        (self.compare)(&self.heap[a], &self.heap[b]) == Ordering::Greater
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !self.greater(idx, parent) {
                break;
            }
            self.heap.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut best = idx;
            if left < len && self.greater(left, best) {
                best = left;
            }
            if right < len && self.greater(right, best) {
                best = right;
            }
            if best == idx {
                break;
            }
            self.heap.swap(idx, best);
            idx = best;
        }
    }
}
