// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::ptr::NonNull;

use crate::{assert_fatal, fatal};

use super::{Allocator, SIZE_NOT_TRACKED};

/// An allocator that aborts on any real allocation.
///
/// Pass this to code that should provably not allocate, e.g. an
/// [`Array`](crate::collections::Array) that is only ever read from, or as
/// the fallback of a [`TempAllocator`](super::TempAllocator) that must never
/// outgrow its inline buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssertAllocator;

impl Allocator for AssertAllocator {
    fn num_allocations(&self) -> usize {
        0
    }

    fn total_size(&self) -> usize {
        0
    }

    unsafe fn allocation_size(&self, _ptr: *const u8) -> usize {
        SIZE_NOT_TRACKED
    }

    fn allocate(&self, size: usize, align: usize) -> NonNull<u8> {
        fatal!("AssertAllocator cannot allocate (size = {size}, align = {align})");
    }

    unsafe fn deallocate(&self, ptr: *mut u8) {
        assert_fatal!(ptr.is_null(), "AssertAllocator cannot deallocate {ptr:p}");
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        collections::Array,
        memory::{AssertAllocator, Allocator, FixedAllocator, TempAllocator},
        test_support::expect_fatal,
    };

    #[test]
    fn deallocating_null_is_allowed() {
        // Safety: null is always allowed.
        unsafe { AssertAllocator.deallocate(core::ptr::null_mut()) };
    }

    #[test]
    fn allocation_is_fatal() {
        let stderr = expect_fatal(module_path!(), "allocation_is_fatal", || {
            AssertAllocator.allocate(1, 0);
        });
        assert!(stderr.contains("cannot allocate"), "unexpected stderr: {stderr}");
    }

    #[test]
    fn deallocating_non_null_is_fatal() {
        expect_fatal(module_path!(), "deallocating_non_null_is_fatal", || {
            let fixed = FixedAllocator::<8>::new();
            let ptr = fixed.allocate(4, 4);
            // Safety: this is exactly the misuse being tested, the allocator
            // aborts before touching the pointer.
            unsafe { AssertAllocator.deallocate(ptr.as_ptr()) };
        });
    }

    #[test]
    fn empty_array_needs_no_allocations() {
        let array = Array::<u32>::new(&AssertAllocator);
        assert!(array.is_empty());
        drop(array);
    }

    #[test]
    fn temp_allocator_within_its_buffer_needs_no_fallback() {
        let temp = TempAllocator::<256>::with_fallback(&AssertAllocator);
        let mut array = Array::<u32>::new(&temp);
        for i in 0..16 {
            array.push_back(i);
        }
        assert_eq!(120, array.iter().sum::<u32>());
    }
}
