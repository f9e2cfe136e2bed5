// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{
    fmt::Debug,
    marker::PhantomData,
    ops::{Index, IndexMut},
    ptr::{self, NonNull},
    slice,
};

use crate::{
    assert_fatal, fatal,
    memory::{allocate_array, deallocate_array, Allocator},
};

use super::npod::{self, CollectionValue};

/// Growable double-ended FIFO queue of `T`, backed by a ring buffer
/// allocated from an [`Allocator`].
///
/// When full, the ring is reallocated to `len * 2 + 8` elements, and
/// unwrapped so that the front is at the start of the new storage.
pub struct Queue<'a, T: CollectionValue> {
    /// Backing memory. Invariant: everything from index `head` (inclusive)
    /// to `(head + len) % capacity` (exclusive, possibly wrapping around the
    /// end) is initialized, and the rest is uninitialized.
    data: NonNull<T>,
    head: usize,
    len: usize,
    capacity: usize,
    allocator: &'a dyn Allocator,
    _owns: PhantomData<T>,
}

impl<'a, T: CollectionValue> Queue<'a, T> {
    /// Creates an empty queue. Doesn't allocate until the first push.
    pub fn new(allocator: &'a dyn Allocator) -> Queue<'a, T> {
        Queue {
            data: NonNull::dangling(),
            head: 0,
            len: 0,
            capacity: 0,
            allocator,
            _owns: PhantomData,
        }
    }

    pub fn with_capacity(allocator: &'a dyn Allocator, capacity: usize) -> Queue<'a, T> {
        let mut queue = Queue::new(allocator);
        queue.set_capacity(capacity);
        queue
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn any(&self) -> bool {
        self.len > 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The amount of elements that can be pushed before the queue grows.
    pub fn space(&self) -> usize {
        self.capacity - self.len
    }

    /// Reallocates the ring to fit exactly `capacity` elements, with the
    /// front element at the start of the storage. If the queue is longer
    /// than that, elements are destroyed from the back first.
    pub fn set_capacity(&mut self, capacity: usize) {
        if capacity != self.capacity {
            self.reallocate(capacity);
        }
    }

    /// Ensures there's capacity for at least `capacity` elements.
    pub fn reserve(&mut self, capacity: usize) {
        if capacity > self.capacity {
            self.grow(capacity);
        }
    }

    /// Grows the capacity to `len * 2 + 8`, or to `min_capacity` if that's
    /// larger.
    pub fn grow(&mut self, min_capacity: usize) {
        let new_capacity = (self.len * 2 + 8).max(min_capacity);
        self.set_capacity(new_capacity);
    }

    fn reallocate(&mut self, capacity: usize) {
        while self.len > capacity {
            let last = self.physical_index(self.len - 1);
            // Safety: the last element is initialized, and the length is
            // lowered right after.
            unsafe { npod::destruct(self.data.as_ptr().add(last), 1) };
            self.len -= 1;
        }

        let new_data = allocate_array::<T>(self.allocator, capacity);
        let (first, second) = self.raw_halves();
        // Safety: the halves are the initialized elements, in order, and
        // there are `len <= capacity` of them. They're moved bitwise into the
        // new storage, after which the old storage is freed without dropping
        // anything.
        unsafe {
            ptr::copy_nonoverlapping(first.0, new_data.as_ptr(), first.1);
            ptr::copy_nonoverlapping(second.0, new_data.as_ptr().add(first.1), second.1);
            deallocate_array(self.allocator, self.data, self.capacity);
        }
        self.data = new_data;
        self.head = 0;
        self.capacity = capacity;
    }

    fn physical_index(&self, index: usize) -> usize {
        let i = self.head + index;
        if i >= self.capacity {
            i - self.capacity
        } else {
            i
        }
    }

    /// The initialized ranges as (pointer, length) pairs, front first.
    fn raw_halves(&self) -> ((*mut T, usize), (*mut T, usize)) {
        let first_len = self.len.min(self.capacity - self.head);
        let base = self.data.as_ptr();
        // Safety: head <= capacity, so the pointer is within (or one past)
        // the allocation.
        let first = (unsafe { base.add(self.head) }, first_len);
        (first, (base, self.len - first_len))
    }

    /// Appends the value to the back of the queue, growing the ring if
    /// needed.
    pub fn push_back(&mut self, value: T) {
        if self.len == self.capacity {
            self.grow(0);
        }
        let i = self.physical_index(self.len);
        // The slot at `i` is uninitialized due to the invariant stated in the
        // doc comment of `self.data`, so writing it doesn't leak anything.
        // Safety: i < capacity.
        unsafe { self.data.as_ptr().add(i).write(value) };
        self.len += 1;
    }

    /// Prepends the value to the front of the queue, growing the ring if
    /// needed.
    pub fn push_front(&mut self, value: T) {
        if self.len == self.capacity {
            self.grow(0);
        }
        self.head = if self.head == 0 { self.capacity - 1 } else { self.head - 1 };
        // Safety: the slot before the old head is uninitialized since the
        // queue isn't full, and it's within capacity.
        unsafe { self.data.as_ptr().add(self.head).write(value) };
        self.len += 1;
    }

    /// Removes the front element and returns it, if any.
    pub fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        // Safety: the element at head is initialized, and it's cut out of
        // the initialized range right after, so it won't be read again.
        let value = unsafe { self.data.as_ptr().add(self.head).read() };
        self.head = self.physical_index(1);
        self.len -= 1;
        if self.len == 0 {
            self.head = 0;
        }
        Some(value)
    }

    /// Removes the back element and returns it, if any.
    pub fn pop_back(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let i = self.physical_index(self.len - 1);
        // Safety: the last element is initialized, and it's cut out of the
        // initialized range right after, so it won't be read again.
        let value = unsafe { self.data.as_ptr().add(i).read() };
        self.len -= 1;
        if self.len == 0 {
            self.head = 0;
        }
        Some(value)
    }

    pub fn front(&self) -> Option<&T> {
        self.get(0)
    }

    pub fn front_mut(&mut self) -> Option<&mut T> {
        self.get_mut(0)
    }

    pub fn back(&self) -> Option<&T> {
        self.get(self.len.wrapping_sub(1))
    }

    pub fn back_mut(&mut self) -> Option<&mut T> {
        self.get_mut(self.len.wrapping_sub(1))
    }

    /// The element `index` steps from the front.
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        // Safety: index < len, so the element is initialized.
        Some(unsafe { &*self.data.as_ptr().add(self.physical_index(index)) })
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= self.len {
            return None;
        }
        // Safety: index < len, so the element is initialized.
        Some(unsafe { &mut *self.data.as_ptr().add(self.physical_index(index)) })
    }

    /// The elements as two slices, front to back. The second one is empty
    /// unless the ring wraps around.
    pub fn as_slices(&self) -> (&[T], &[T]) {
        let ((first, first_len), (second, second_len)) = self.raw_halves();
        // Safety: both halves are initialized, and borrowed through self.
        unsafe {
            (
                slice::from_raw_parts(first, first_len),
                slice::from_raw_parts(second, second_len),
            )
        }
    }

    pub fn as_mut_slices(&mut self) -> (&mut [T], &mut [T]) {
        let ((first, first_len), (second, second_len)) = self.raw_halves();
        // Safety: both halves are initialized and don't overlap, and they're
        // borrowed mutably through self.
        unsafe {
            (
                slice::from_raw_parts_mut(first, first_len),
                slice::from_raw_parts_mut(second, second_len),
            )
        }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        let (first, second) = self.as_slices();
        first.iter().chain(second.iter())
    }

    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut T> {
        let (first, second) = self.as_mut_slices();
        first.iter_mut().chain(second.iter_mut())
    }

    /// Destroys all the elements, keeping the capacity.
    pub fn clear(&mut self) {
        let ((first, first_len), (second, second_len)) = self.raw_halves();
        // Safety: both halves are initialized, and the queue is emptied
        // right after.
        unsafe {
            npod::destruct(first, first_len);
            npod::destruct(second, second_len);
        }
        self.len = 0;
        self.head = 0;
    }

    /// Makes this queue a copy of `src`, front first.
    pub fn copy_from(&mut self, src: &[T]) {
        if src.len() > self.capacity {
            self.clear();
            self.reallocate(src.len());
        } else if self.head != 0 {
            self.reallocate(self.capacity);
        }
        // Safety: head is 0 so the first `len` slots are initialized, the
        // storage has room for `src.len()` elements and `src` can't alias
        // self.
        unsafe { npod::copy(self.data.as_ptr(), self.len, src.as_ptr(), src.len()) };
        self.len = src.len();
    }
}

impl<T: CollectionValue> Index<usize> for Queue<'_, T> {
    type Output = T;

    /// Aborts if the index is out of bounds.
    fn index(&self, index: usize) -> &T {
        let len = self.len;
        match self.get(index) {
            Some(value) => value,
            None => fatal!("Queue index {index} out of bounds (length {len})"),
        }
    }
}

impl<T: CollectionValue> IndexMut<usize> for Queue<'_, T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        assert_fatal!(
            index < self.len,
            "Queue index {index} out of bounds (length {})",
            self.len,
        );
        // Safety: index < len, so the element is initialized.
        unsafe { &mut *self.data.as_ptr().add(self.physical_index(index)) }
    }
}

impl<T: CollectionValue> Drop for Queue<'_, T> {
    fn drop(&mut self) {
        self.clear();
        // Safety: the storage came from this allocator with this capacity,
        // and it's empty now.
        unsafe { deallocate_array(self.allocator, self.data, self.capacity) };
    }
}

impl<T: CollectionValue> Clone for Queue<'_, T> {
    fn clone(&self) -> Self {
        let mut queue = Queue::with_capacity(self.allocator, self.len);
        let (first, second) = self.as_slices();
        queue.copy_from(first);
        // Safety: the queue has room for all `self.len` elements, with head
        // 0, and the slots after its `first.len()` elements are
        // uninitialized.
        unsafe {
            npod::copy(queue.data.as_ptr().add(first.len()), 0, second.as_ptr(), second.len());
        }
        queue.len = self.len;
        queue
    }
}

impl<T: CollectionValue + Debug> Debug for Queue<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
