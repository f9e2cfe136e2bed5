// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{
    cell::{Cell, UnsafeCell},
    fmt::Debug,
    mem::MaybeUninit,
    ptr::NonNull,
};

use crate::assert_fatal;

use super::{checked_alignment, padding_for, Allocator, SIZE_NOT_TRACKED};

/// Bump allocator over an inline buffer of `N` bytes.
///
/// There's no growth and no fallback: an allocation that doesn't fit in what
/// is left of the buffer is a fatal error. Deallocation does nothing, the
/// memory is reclaimed when the allocator is dropped.
///
/// Not thread-safe.
pub struct FixedAllocator<const N: usize> {
    buffer: UnsafeCell<[MaybeUninit<u8>; N]>,
    /// Offset of the first unallocated byte in `buffer`.
    put: Cell<usize>,
    num_allocations: Cell<usize>,
}

impl<const N: usize> FixedAllocator<N> {
    pub fn new() -> FixedAllocator<N> {
        const { assert!(N > 0, "FixedAllocator must have a non-zero capacity") };
        FixedAllocator {
            buffer: UnsafeCell::new([MaybeUninit::uninit(); N]),
            put: Cell::new(0),
            num_allocations: Cell::new(0),
        }
    }

    /// The amount of bytes consumed from the buffer, alignment padding
    /// included.
    pub fn used(&self) -> usize {
        self.put.get()
    }

    /// The amount of bytes left in the buffer.
    pub fn remaining(&self) -> usize {
        N - self.put.get()
    }
}

impl<const N: usize> Default for FixedAllocator<N> {
    fn default() -> Self {
        FixedAllocator::new()
    }
}

impl<const N: usize> Allocator for FixedAllocator<N> {
    fn num_allocations(&self) -> usize {
        self.num_allocations.get()
    }

    fn total_size(&self) -> usize {
        self.put.get()
    }

    unsafe fn allocation_size(&self, _ptr: *const u8) -> usize {
        SIZE_NOT_TRACKED
    }

    fn allocate(&self, size: usize, align: usize) -> NonNull<u8> {
        let align = checked_alignment(size, align);
        let base = self.buffer.get().cast::<u8>();
        let put = self.put.get();
        let start = put + padding_for(base as usize + put, align);
        let end = start.saturating_add(size);
        assert_fatal!(
            end <= N,
            "FixedAllocator<{N}> is exhausted: {size} bytes requested, {} remaining",
            N - put,
        );
        self.put.set(end);
        self.num_allocations.set(self.num_allocations.get() + 1);
        // Safety: `start + size <= N`, so the allocation is within `buffer`,
        // and `put` was bumped past it so it's not handed out again.
        unsafe { NonNull::new_unchecked(base.add(start)) }
    }

    unsafe fn deallocate(&self, _ptr: *mut u8) {}
}

impl<const N: usize> Debug for FixedAllocator<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FixedAllocator")
            .field("capacity", &N)
            .field("used", &self.put.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        memory::{Allocator, FixedAllocator},
        test_support::expect_fatal,
    };

    #[test]
    fn unaligned_allocations_fill_the_buffer_exactly() {
        let fixed = FixedAllocator::<10>::new();
        let mut sum = 0;
        for size in [1, 4, 4, 1] {
            fixed.allocate(size, 0);
            sum += size;
            assert_eq!(sum, fixed.used());
        }
        assert_eq!(10, fixed.used());
        assert_eq!(0, fixed.remaining());
        assert_eq!(4, fixed.num_allocations());
    }

    #[test]
    fn allocating_past_capacity_is_fatal() {
        let stderr = expect_fatal(module_path!(), "allocating_past_capacity_is_fatal", || {
            let fixed = FixedAllocator::<10>::new();
            for size in [1, 4, 4, 1] {
                fixed.allocate(size, 0);
            }
            fixed.allocate(1, 0);
        });
        assert!(stderr.contains("FixedAllocator<10>"), "unexpected stderr: {stderr}");
    }

    #[test]
    fn allocations_are_aligned_and_in_bounds() {
        let fixed = FixedAllocator::<1024>::new();
        let begin = fixed.allocate(1, 0).as_ptr() as usize;
        for (size, align) in [(3, 2), (8, 8), (5, 4), (16, 16), (1, 64), (7, 1)] {
            let ptr = fixed.allocate(size, align).as_ptr() as usize;
            assert_eq!(0, ptr % align);
            assert!(ptr + size <= begin + 1024);
        }
        assert!(fixed.used() <= 1024);
    }
}
