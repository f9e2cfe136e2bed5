// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::fmt::Debug;

use crate::memory::Allocator;

use super::{npod::CollectionValue, Array};

/// Binary max-heap over an [`Array`], ordered by a `less` function: the
/// front is an element that no other element is greater than.
///
/// The index math is 1-based: element `k` lives at `data[k - 1]`, its
/// parent is `k / 2` and its children are `2k` and `2k + 1`.
pub struct PriorityQueue<'a, T: CollectionValue> {
    data: Array<'a, T>,
    less: fn(&T, &T) -> bool,
}

impl<'a, T: CollectionValue> PriorityQueue<'a, T> {
    pub fn new(allocator: &'a dyn Allocator, less: fn(&T, &T) -> bool) -> PriorityQueue<'a, T> {
        PriorityQueue {
            data: Array::new(allocator),
            less,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn any(&self) -> bool {
        self.data.any()
    }

    pub fn reserve(&mut self, capacity: usize) {
        self.data.reserve(capacity);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// The greatest element, if any.
    pub fn front(&self) -> Option<&T> {
        self.data.first()
    }

    pub fn push(&mut self, value: T) {
        self.data.push_back(value);
        self.swim(self.data.len());
    }

    /// Removes the greatest element and returns it, if any.
    pub fn pop(&mut self) -> Option<T> {
        let n = self.data.len();
        if n == 0 {
            return None;
        }
        self.data.swap(0, n - 1);
        let value = self.data.pop_back();
        self.sink(1);
        value
    }

    /// Checks the heap property: no element is less than one of its children.
    pub fn is_valid(&self) -> bool {
        (2..=self.data.len()).all(|k| !self.less_at(k / 2, k))
    }

    fn less_at(&self, a: usize, b: usize) -> bool {
        (self.less)(&self.data[a - 1], &self.data[b - 1])
    }

    fn swim(&mut self, mut k: usize) {
        while k > 1 && self.less_at(k / 2, k) {
            self.data.swap(k / 2 - 1, k - 1);
            k /= 2;
        }
    }

    fn sink(&mut self, mut k: usize) {
        let n = self.data.len();
        while 2 * k <= n {
            let mut child = 2 * k;
            if child < n && self.less_at(child, child + 1) {
                child += 1;
            }
            if !self.less_at(k, child) {
                break;
            }
            self.data.swap(k - 1, child - 1);
            k = child;
        }
    }
}

impl<T: CollectionValue + Debug> Debug for PriorityQueue<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("heap", &self.data)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::memory::HeapAllocator;

    use super::PriorityQueue;

    #[test]
    fn pops_greatest_first() {
        let heap = HeapAllocator::new();
        let mut queue = PriorityQueue::<u32>::new(&heap, |a, b| a < b);
        for value in [5, 1, 9, 3, 7, 9, 0, 4] {
            queue.push(value);
            assert!(queue.is_valid());
        }
        assert_eq!(Some(&9), queue.front());
        assert_eq!(8, queue.len());

        let mut popped = Vec::new();
        while let Some(value) = queue.pop() {
            assert!(queue.is_valid());
            popped.push(value);
        }
        assert_eq!(vec![9, 9, 7, 5, 4, 3, 1, 0], popped);
        assert!(!queue.any());
        assert_eq!(None, queue.front());
    }

    #[test]
    fn reversed_comparison_is_a_min_heap() {
        let heap = HeapAllocator::new();
        let mut queue = PriorityQueue::<String>::new(&heap, |a, b| a.len() > b.len());
        for word in ["three", "a", "four", "to"] {
            queue.push(word.to_owned());
        }
        assert_eq!(Some("a"), queue.pop().as_deref());
        assert_eq!(Some("to"), queue.pop().as_deref());
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn is_valid_detects_a_broken_heap() {
        let heap = HeapAllocator::new();
        let mut queue = PriorityQueue::<i32>::new(&heap, |a, b| a < b);
        queue.push(1);
        queue.push(2);
        assert!(queue.is_valid());
        queue.less = |a, b| a > b;
        assert!(!queue.is_valid());
    }
}
