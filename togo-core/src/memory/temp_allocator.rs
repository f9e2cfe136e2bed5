// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{cell::UnsafeCell, fmt::Debug, mem::MaybeUninit, ptr::NonNull};

use super::{
    jump_block_allocator::BlockChain, scratch_allocator, Allocator, SIZE_NOT_TRACKED,
};

/// Jump-block allocator whose base block is an inline buffer of `S` bytes.
///
/// This is the scratch arena for short-lived allocations: as long as `S`
/// bytes suffice, nothing is allocated from the heap. Past that, blocks are
/// obtained from the fallback allocator (by default
/// [`scratch_allocator`](super::scratch_allocator)) and returned when the
/// [`TempAllocator`] is dropped. Like [`JumpBlockAllocator`], deallocation
/// does nothing.
///
/// `S` must be a power of two, and at least two pointers in size.
///
/// Not thread-safe.
///
/// [`JumpBlockAllocator`]: super::JumpBlockAllocator
pub struct TempAllocator<'f, const S: usize> {
    buffer: UnsafeCell<[MaybeUninit<u8>; S]>,
    chain: BlockChain<'f>,
}

impl<const S: usize> TempAllocator<'static, S> {
    /// Creates a [`TempAllocator`] falling back to the global scratch
    /// allocator. The memory system must be initialized.
    pub fn new() -> TempAllocator<'static, S> {
        TempAllocator::with_fallback(scratch_allocator())
    }
}

impl<const S: usize> Default for TempAllocator<'static, S> {
    fn default() -> Self {
        TempAllocator::new()
    }
}

impl<'f, const S: usize> TempAllocator<'f, S> {
    pub fn with_fallback(fallback: &'f dyn Allocator) -> TempAllocator<'f, S> {
        const {
            assert!(S.is_power_of_two(), "TempAllocator size must be a power of two");
            assert!(
                S >= 2 * size_of::<*const u8>(),
                "TempAllocator size must be at least two pointers",
            );
        };
        TempAllocator {
            buffer: UnsafeCell::new([MaybeUninit::uninit(); S]),
            chain: BlockChain::new(fallback, S),
        }
    }

    /// The amount of blocks obtained from the fallback allocator so far.
    pub fn num_blocks(&self) -> usize {
        self.chain.num_blocks()
    }
}

impl<const S: usize> Allocator for TempAllocator<'_, S> {
    fn num_allocations(&self) -> usize {
        0
    }

    fn total_size(&self) -> usize {
        SIZE_NOT_TRACKED
    }

    unsafe fn allocation_size(&self, _ptr: *const u8) -> usize {
        SIZE_NOT_TRACKED
    }

    fn allocate(&self, size: usize, align: usize) -> NonNull<u8> {
        // Safety: the buffer is always S bytes and the same region on every
        // call while self stays in place. The returned pointer doesn't borrow
        // self, so dereferencing it after self has moved or dropped is the
        // caller's unsafe responsibility.
        unsafe { self.chain.allocate(self.buffer.get().cast::<u8>(), size, align) }
    }

    unsafe fn deallocate(&self, _ptr: *mut u8) {}
}

impl<const S: usize> Debug for TempAllocator<'_, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TempAllocator")
            .field("size", &S)
            .field("num_blocks", &self.chain.num_blocks())
            .finish_non_exhaustive()
    }
}
