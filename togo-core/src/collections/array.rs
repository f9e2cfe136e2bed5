// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{
    fmt::Debug,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    ptr::{self, NonNull},
    slice,
};

use crate::{
    assert_fatal,
    memory::{allocate_array, deallocate_array, Allocator},
};

use super::npod::{self, CollectionValue};

/// Growable contiguous array, with its storage allocated from an
/// [`Allocator`].
///
/// Like `Vec`, but the allocator is picked at runtime, and element
/// construction, destruction and copying go through
/// [`npod`](super::npod). When the array runs out of capacity, it grows to
/// `capacity * 2 + 8` elements.
pub struct Array<'a, T: CollectionValue> {
    /// Invariant: the first `len` elements are initialized, the rest up to
    /// `capacity` are not.
    data: NonNull<T>,
    len: usize,
    capacity: usize,
    allocator: &'a dyn Allocator,
    _owns: PhantomData<T>,
}

impl<'a, T: CollectionValue> Array<'a, T> {
    /// Creates an empty array. Doesn't allocate until the first push.
    pub fn new(allocator: &'a dyn Allocator) -> Array<'a, T> {
        Array {
            data: NonNull::dangling(),
            len: 0,
            capacity: 0,
            allocator,
            _owns: PhantomData,
        }
    }

    pub fn with_capacity(allocator: &'a dyn Allocator, capacity: usize) -> Array<'a, T> {
        let mut array = Array::new(allocator);
        array.set_capacity(capacity);
        array
    }

    pub fn allocator(&self) -> &'a dyn Allocator {
        self.allocator
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The amount of elements that can be added before the array grows.
    pub fn space(&self) -> usize {
        self.capacity - self.len
    }

    pub fn any(&self) -> bool {
        self.len > 0
    }

    /// The first element. Aborts if the array is empty.
    pub fn front(&self) -> &T {
        assert_fatal!(self.len > 0, "front() called on an empty Array");
        &self[0]
    }

    pub fn front_mut(&mut self) -> &mut T {
        assert_fatal!(self.len > 0, "front_mut() called on an empty Array");
        &mut self[0]
    }

    /// The last element. Aborts if the array is empty.
    pub fn back(&self) -> &T {
        assert_fatal!(self.len > 0, "back() called on an empty Array");
        &self[self.len - 1]
    }

    pub fn back_mut(&mut self) -> &mut T {
        assert_fatal!(self.len > 0, "back_mut() called on an empty Array");
        let last = self.len - 1;
        &mut self[last]
    }

    /// Reallocates the storage to fit exactly `capacity` elements. If the
    /// array is longer than that, the elements past the new capacity are
    /// destroyed first.
    pub fn set_capacity(&mut self, capacity: usize) {
        if capacity == self.capacity {
            return;
        }
        if capacity < self.len {
            // Safety: elements from `capacity` to `len` are initialized, and
            // the length is lowered right after.
            unsafe { npod::destruct(self.data.as_ptr().add(capacity), self.len - capacity) };
            self.len = capacity;
        }

        let new_data = allocate_array::<T>(self.allocator, capacity);
        // Safety: the new storage has room for at least `len` elements, the
        // old storage has `len` initialized ones, and they're different
        // allocations. The old storage is freed without dropping anything,
        // the values were moved out with the bitwise copy.
        unsafe {
            ptr::copy_nonoverlapping(self.data.as_ptr(), new_data.as_ptr(), self.len);
            deallocate_array(self.allocator, self.data, self.capacity);
        }
        self.data = new_data;
        self.capacity = capacity;
    }

    /// Ensures there's capacity for at least `capacity` elements.
    pub fn reserve(&mut self, capacity: usize) {
        if capacity > self.capacity {
            self.grow(capacity);
        }
    }

    /// Grows the capacity to `capacity * 2 + 8`, or to `min_capacity` if
    /// that's larger.
    pub fn grow(&mut self, min_capacity: usize) {
        let new_capacity = (self.capacity * 2 + 8).max(min_capacity);
        self.set_capacity(new_capacity);
    }

    pub fn shrink_to_fit(&mut self) {
        self.set_capacity(self.len);
    }

    /// Changes the length of the array, default-constructing new elements or
    /// destroying the removed ones.
    pub fn resize(&mut self, new_len: usize) {
        if new_len > self.capacity {
            self.grow(new_len);
        }
        // Safety: the ranges are within capacity, the constructed range is
        // uninitialized and the destroyed range is initialized.
        unsafe {
            if new_len > self.len {
                npod::construct(self.data.as_ptr().add(self.len), new_len - self.len);
            } else {
                npod::destruct(self.data.as_ptr().add(new_len), self.len - new_len);
            }
        }
        self.len = new_len;
    }

    /// Destroys all the elements, keeping the capacity.
    pub fn clear(&mut self) {
        self.resize(0);
    }

    /// Appends the value to the back of the array, growing the storage if
    /// needed.
    pub fn push_back(&mut self, value: T) -> &mut T {
        if self.len == self.capacity {
            self.grow(0);
        }
        // Safety: len < capacity, so the slot exists and is uninitialized.
        let slot = unsafe { self.data.as_ptr().add(self.len) };
        // Safety: see above.
        unsafe { slot.write(value) };
        self.len += 1;
        // Safety: the slot was just initialized, and it's borrowed through
        // self.
        unsafe { &mut *slot }
    }

    /// Appends a default-constructed element to the back of the array, and
    /// returns it for filling in.
    pub fn push_back_inplace(&mut self) -> &mut T {
        let i = self.len;
        self.resize(i + 1);
        &mut self[i]
    }

    /// Removes the last element and returns it, if any.
    pub fn pop_back(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        // Safety: the element at the old `len - 1` is initialized, and it's
        // now past the length, so it won't be read or dropped again.
        Some(unsafe { self.data.as_ptr().add(self.len).read() })
    }

    /// Removes the element at `index`, shifting the ones after it down to
    /// preserve the order. Aborts if the index is out of bounds.
    pub fn remove(&mut self, index: usize) -> T {
        assert_fatal!(
            index < self.len,
            "Array index {index} out of bounds (length {})",
            self.len,
        );
        // Safety: index < len so it's initialized. Its value is moved out,
        // and the tail (which is initialized) is shifted over it, after which
        // the previous last slot is past the new length.
        unsafe {
            let slot = self.data.as_ptr().add(index);
            let value = slot.read();
            ptr::copy(slot.add(1), slot, self.len - index - 1);
            self.len -= 1;
            value
        }
    }

    /// Destroys the element at `index` and moves the last element into its
    /// place. Doesn't preserve order. Aborts if the index is out of bounds.
    pub fn remove_over(&mut self, index: usize) {
        assert_fatal!(
            index < self.len,
            "Array index {index} out of bounds (length {})",
            self.len,
        );
        // Safety: the first `len` elements are initialized and index < len.
        // The last slot is considered uninitialized afterwards.
        unsafe { npod::remove_over(self.data.as_ptr(), self.len - 1, index) };
        self.len -= 1;
    }

    /// Makes this array a copy of `src`. Existing elements are assigned to
    /// when possible, if the current storage is too small, it's destroyed and
    /// reallocated first.
    pub fn copy_from(&mut self, src: &[T]) {
        if src.len() > self.capacity {
            self.set_capacity(0);
            self.set_capacity(src.len());
        }
        // Safety: the storage has room for `src.len()` elements, the first
        // `len` are initialized, and `src` can't alias self since self is
        // borrowed mutably.
        unsafe { npod::copy(self.data.as_ptr(), self.len, src.as_ptr(), src.len()) };
        self.len = src.len();
    }
}

impl<T: CollectionValue> Drop for Array<'_, T> {
    fn drop(&mut self) {
        // Safety: the first `len` elements are initialized, and the storage
        // came from this allocator with this capacity.
        unsafe {
            npod::destruct(self.data.as_ptr(), self.len);
            deallocate_array(self.allocator, self.data, self.capacity);
        }
    }
}

impl<T: CollectionValue> Clone for Array<'_, T> {
    /// Copies the elements into new storage from the same allocator.
    fn clone(&self) -> Self {
        let mut array = Array::new(self.allocator);
        array.copy_from(self);
        array
    }
}

impl<T: CollectionValue> Deref for Array<'_, T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        // Safety: the first `len` elements are initialized, and the pointer
        // is non-null and aligned even when nothing has been allocated.
        unsafe { slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }
}

impl<T: CollectionValue> DerefMut for Array<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Safety: see Deref.
        unsafe { slice::from_raw_parts_mut(self.data.as_ptr(), self.len) }
    }
}

impl<'b, T: CollectionValue> IntoIterator for &'b Array<'_, T> {
    type Item = &'b T;
    type IntoIter = slice::Iter<'b, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'b, T: CollectionValue> IntoIterator for &'b mut Array<'_, T> {
    type Item = &'b mut T;
    type IntoIter = slice::IterMut<'b, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

impl<T: CollectionValue + Debug> Debug for Array<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let slice: &[T] = self;
        f.debug_list().entries(slice).finish()
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicI32, Ordering};

    use crate::{
        collections::{Array, CollectionValue, Managed},
        memory::{Allocator, HeapAllocator},
        test_support::expect_fatal,
    };

    #[test]
    fn trivial_resize_zero_fills() {
        let heap = HeapAllocator::new();
        let mut array = Array::<u32>::new(&heap);
        for i in 1..=8 {
            array.push_back(i);
        }
        array.resize(2);
        array.resize(8);
        assert_eq!([1, 2, 0, 0, 0, 0, 0, 0], *array);
    }

    #[test]
    fn grows_as_pushed_to() {
        let heap = HeapAllocator::new();
        let mut array = Array::<u32>::new(&heap);
        assert_eq!(0, array.capacity());
        assert_eq!(0, heap.num_allocations());

        array.push_back(0);
        assert_eq!(8, array.capacity());
        for i in 1..9 {
            array.push_back(i);
        }
        assert_eq!(24, array.capacity());
        assert_eq!(15, array.space());
        assert_eq!(&[0, 1, 2, 3, 4, 5, 6, 7, 8], &array[..]);
        assert_eq!(1, heap.num_allocations());
        assert_eq!(0, *array.front());
        assert_eq!(8, *array.back());

        drop(array);
        assert_eq!(0, heap.num_allocations());
    }

    #[test]
    fn does_not_leak() {
        static ELEMENT_COUNT: AtomicI32 = AtomicI32::new(0);

        #[derive(Debug)]
        struct Element(u32);
        impl Default for Element {
            fn default() -> Self {
                ELEMENT_COUNT.fetch_add(1, Ordering::Relaxed);
                Element(0)
            }
        }
        impl Clone for Element {
            fn clone(&self) -> Self {
                ELEMENT_COUNT.fetch_add(1, Ordering::Relaxed);
                Element(self.0)
            }
        }
        impl Drop for Element {
            fn drop(&mut self) {
                ELEMENT_COUNT.fetch_add(-1, Ordering::Relaxed);
            }
        }
        impl CollectionValue for Element {
            type Lifecycle = Managed;
        }
        let count = || ELEMENT_COUNT.load(Ordering::Relaxed);

        let heap = HeapAllocator::new();
        let mut array = Array::<Element>::new(&heap);

        array.resize(10);
        assert_eq!(10, count());
        array.push_back_inplace().0 = 5;
        assert_eq!(11, count());
        assert_eq!(5, array.back().0);

        // Shrinking the capacity destroys the cut elements.
        array.set_capacity(4);
        assert_eq!(4, count());
        assert_eq!(4, array.len());

        array.resize(2);
        assert_eq!(2, count());

        let popped = array.pop_back();
        assert!(popped.is_some());
        drop(popped);
        assert_eq!(1, count());

        let copy = array.clone();
        assert_eq!(2, count());
        drop(copy);

        array.clear();
        assert_eq!(0, count());
        array.resize(3);
        drop(array);
        assert_eq!(0, count());
        assert_eq!(0, heap.num_allocations());
    }

    #[test]
    fn remove_preserves_order_and_remove_over_does_not() {
        let heap = HeapAllocator::new();
        let mut array = Array::<u32>::new(&heap);
        for i in 0..6 {
            array.push_back(i);
        }

        assert_eq!(1, array.remove(1));
        assert_eq!(&[0, 2, 3, 4, 5], &array[..]);

        array.remove_over(0);
        assert_eq!(&[5, 2, 3, 4], &array[..]);

        array.remove_over(3);
        assert_eq!(&[5, 2, 3], &array[..]);
    }

    #[test]
    fn copy_from_reuses_or_reallocates_storage() {
        let heap = HeapAllocator::new();
        let mut array = Array::<String>::with_capacity(&heap, 4);
        array.push_back(String::from("a"));

        array.copy_from(&[String::from("b"), String::from("c")]);
        assert_eq!(4, array.capacity());
        assert_eq!(["b", "c"], array[..]);

        let long = ["1", "2", "3", "4", "5", "6"].map(String::from);
        array.copy_from(&long);
        assert_eq!(6, array.capacity());
        assert_eq!(long, array[..]);

        array.copy_from(&[]);
        assert!(!array.any());
    }

    #[test]
    fn shrink_to_fit_matches_length() {
        let heap = HeapAllocator::new();
        let mut array = Array::<u8>::new(&heap);
        array.reserve(100);
        assert_eq!(100, array.capacity());
        array.push_back(1);
        array.push_back(2);
        array.shrink_to_fit();
        assert_eq!(2, array.capacity());
        assert_eq!(&[1, 2], &array[..]);

        array.clear();
        array.shrink_to_fit();
        assert_eq!(0, heap.num_allocations());
    }

    #[test]
    fn front_of_empty_array_is_fatal() {
        expect_fatal(module_path!(), "front_of_empty_array_is_fatal", || {
            let heap = HeapAllocator::new();
            let array = Array::<u32>::new(&heap);
            array.front();
        });
    }

    #[test]
    fn remove_out_of_bounds_is_fatal() {
        let stderr = expect_fatal(module_path!(), "remove_out_of_bounds_is_fatal", || {
            let heap = HeapAllocator::new();
            let mut array = Array::<u32>::new(&heap);
            array.push_back(1);
            array.remove(1);
        });
        assert!(stderr.contains("out of bounds"), "unexpected stderr: {stderr}");
    }
}
