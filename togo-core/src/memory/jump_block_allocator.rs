// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{cell::Cell, fmt::Debug, marker::PhantomData, mem::MaybeUninit, ptr::NonNull};

use tracing::debug;

use super::{checked_alignment, padding_for, Allocator, SIZE_NOT_TRACKED};

/// The minimum size of the blocks a jump-block allocator requests from its
/// fallback allocator.
pub const BLOCK_SIZE_MIN: usize = 4096;

/// The start of every block obtained from the fallback allocator.
#[repr(C)]
struct BlockHeader {
    /// The block that was active before this one, if it was also obtained
    /// from the fallback allocator.
    prev: Option<NonNull<BlockHeader>>,
}

const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Bump allocation state shared by [`JumpBlockAllocator`] and
/// [`TempAllocator`](super::TempAllocator).
///
/// The base block is not stored here, it's passed into
/// [`BlockChain::allocate`] by the owner. That way an owner that stores its
/// base block inline can be moved around (while it's not borrowed) without
/// invalidating anything here. Blocks from the fallback allocator are owned
/// by the chain and returned when it's dropped.
pub(super) struct BlockChain<'f> {
    fallback: &'f dyn Allocator,
    /// The most recently obtained fallback block, which is also the active
    /// block. `None` while still bumping from the base block.
    head: Cell<Option<NonNull<BlockHeader>>>,
    /// Offset of the first unallocated byte in the active block.
    put: Cell<usize>,
    /// Size of the active block.
    end: Cell<usize>,
    num_blocks: Cell<usize>,
}

impl<'f> BlockChain<'f> {
    pub fn new(fallback: &'f dyn Allocator, base_len: usize) -> BlockChain<'f> {
        BlockChain {
            fallback,
            head: Cell::new(None),
            put: Cell::new(0),
            end: Cell::new(base_len),
            num_blocks: Cell::new(0),
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.num_blocks.get()
    }

    /// ### Safety
    ///
    /// `base` must point to the same writable memory region of the base
    /// length passed into [`BlockChain::new`] on every call, and the region
    /// must outlive the allocations made from it.
    pub unsafe fn allocate(&self, base: *mut u8, size: usize, align: usize) -> NonNull<u8> {
        let align = checked_alignment(size, align);
        let block = match self.head.get() {
            Some(header) => header.as_ptr().cast::<u8>(),
            None => base,
        };

        let put = self.put.get();
        let start = put + padding_for(block as usize + put, align);
        if start.saturating_add(size) <= self.end.get() {
            self.put.set(start + size);
            // Safety: the allocation fits within the active block as checked
            // above, and the active block is either the base block (valid per
            // the caller) or a live fallback block.
            return unsafe { NonNull::new_unchecked(block.add(start)) };
        }

        self.jump(size, align)
    }

    /// Obtains a new block from the fallback allocator and allocates from
    /// it. The previous block is never bumped from again.
    #[cold]
    fn jump(&self, size: usize, align: usize) -> NonNull<u8> {
        let block_size = HEADER_SIZE
            .saturating_add(size)
            .saturating_add(align)
            .max(BLOCK_SIZE_MIN);
        let header = self
            .fallback
            .allocate(block_size, align_of::<BlockHeader>())
            .cast::<BlockHeader>();
        // Safety: the new block is at least HEADER_SIZE bytes and aligned for
        // the header.
        unsafe {
            header.as_ptr().write(BlockHeader {
                prev: self.head.get(),
            })
        };
        self.head.set(Some(header));
        self.end.set(block_size);
        self.num_blocks.set(self.num_blocks.get() + 1);
        debug!(block_size, requested = size, "jump block allocator obtained a new block");

        let block = header.as_ptr().cast::<u8>();
        let start = HEADER_SIZE + padding_for(block as usize + HEADER_SIZE, align);
        // The padding is less than `align`, so this fits in the block.
        self.put.set(start + size);
        // Safety: HEADER_SIZE + padding + size <= block_size, see above.
        unsafe { NonNull::new_unchecked(block.add(start)) }
    }
}

impl Drop for BlockChain<'_> {
    fn drop(&mut self) {
        let mut next = self.head.take();
        while let Some(header) = next {
            // Safety: every block in the chain is a live allocation of the
            // fallback allocator, starting with a header written in jump().
            // Nothing allocated from them outlives the chain's owner.
            unsafe {
                next = header.as_ref().prev;
                debug!(block = ?header, "destroying jump block");
                self.fallback.deallocate(header.as_ptr().cast::<u8>());
            }
        }
    }
}

/// Bump allocator that starts from a caller-provided base block, and jumps
/// to new blocks from a fallback allocator when the current block can't fit
/// an allocation.
///
/// New blocks are `max(header + size + align, BLOCK_SIZE_MIN)` bytes. Memory
/// is never reused: [`Allocator::deallocate`] does nothing, and the blocks
/// obtained from the fallback allocator are returned when this allocator is
/// dropped. The base block is only borrowed.
///
/// Not thread-safe.
pub struct JumpBlockAllocator<'a> {
    base: *mut u8,
    chain: BlockChain<'a>,
    _base_borrow: PhantomData<&'a mut [MaybeUninit<u8>]>,
}

impl<'a> JumpBlockAllocator<'a> {
    /// Creates a new [`JumpBlockAllocator`] bumping from `base` first. The
    /// base block may be empty, in which case the first allocation jumps to
    /// a fallback block straight away.
    pub fn new(
        base: &'a mut [MaybeUninit<u8>],
        fallback: &'a dyn Allocator,
    ) -> JumpBlockAllocator<'a> {
        JumpBlockAllocator {
            base: base.as_mut_ptr().cast::<u8>(),
            chain: BlockChain::new(fallback, base.len()),
            _base_borrow: PhantomData,
        }
    }

    /// The amount of blocks obtained from the fallback allocator so far.
    pub fn num_blocks(&self) -> usize {
        self.chain.num_blocks()
    }
}

impl Allocator for JumpBlockAllocator<'_> {
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
        // Safety: `base` is exclusively borrowed for 'a, which outlives self,
        // and it's the same region with the same length on every call.
        unsafe { self.chain.allocate(self.base, size, align) }
    }

    unsafe fn deallocate(&self, _ptr: *mut u8) {}
}

impl Debug for JumpBlockAllocator<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JumpBlockAllocator")
            .field("num_blocks", &self.chain.num_blocks())
            .field("put", &self.chain.put.get())
            .field("end", &self.chain.end.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use core::mem::MaybeUninit;

    use crate::{
        memory::{Allocator, HeapAllocator, JumpBlockAllocator, BLOCK_SIZE_MIN},
        test_support::expect_fatal,
    };

    use super::HEADER_SIZE;

    #[test]
    fn allocates_from_the_base_block_first() {
        let heap = HeapAllocator::new();
        let mut base = [MaybeUninit::<u8>::uninit(); 256];
        let base_range = base.as_ptr_range();
        let (begin, end) = (base_range.start as usize, base_range.end as usize);

        let jump = JumpBlockAllocator::new(&mut base, &heap);
        for (size, align) in [(1, 0), (3, 2), (8, 8), (16, 16), (5, 4), (32, 32)] {
            let ptr = jump.allocate(size, align).as_ptr() as usize;
            assert_eq!(0, ptr % align.max(1));
            assert!(begin <= ptr && ptr + size <= end);
        }
        assert_eq!(0, jump.num_blocks());
        assert_eq!(0, heap.num_allocations());
    }

    #[test]
    fn jumps_to_a_minimum_sized_block_when_full() {
        let heap = HeapAllocator::new();
        let mut base = [MaybeUninit::<u8>::uninit(); 64];
        let jump = JumpBlockAllocator::new(&mut base, &heap);

        jump.allocate(60, 0);
        let ptr = jump.allocate(8, 8);
        assert_eq!(0, ptr.as_ptr() as usize % 8);
        assert_eq!(1, jump.num_blocks());
        assert_eq!(1, heap.num_allocations());
        assert_eq!(BLOCK_SIZE_MIN, heap.total_size());

        // Safety: the whole allocation is writable.
        unsafe { ptr.as_ptr().write_bytes(0xFF, 8) };

        // Keeps bumping from the new block:
        jump.allocate(100, 4);
        assert_eq!(1, jump.num_blocks());

        drop(jump);
        assert_eq!(0, heap.num_allocations());
    }

    #[test]
    fn large_allocations_get_a_block_of_their_own_size() {
        let heap = HeapAllocator::new();
        let jump = JumpBlockAllocator::new(&mut [], &heap);

        let size = BLOCK_SIZE_MIN * 3;
        let ptr = jump.allocate(size, 64);
        assert_eq!(0, ptr.as_ptr() as usize % 64);
        assert_eq!(HEADER_SIZE + size + 64, heap.total_size());
        // Safety: the whole allocation is writable.
        unsafe { ptr.as_ptr().write_bytes(0, size) };

        // The large block is full, the next allocation jumps again.
        jump.allocate(BLOCK_SIZE_MIN, 0);
        assert_eq!(2, jump.num_blocks());
        assert_eq!(2, heap.num_allocations());

        drop(jump);
        assert_eq!(0, heap.num_allocations());
    }

    #[test]
    fn deallocation_does_nothing() {
        let heap = HeapAllocator::new();
        let jump = JumpBlockAllocator::new(&mut [], &heap);
        let a = jump.allocate(16, 0);
        // Safety: allocated from `jump`.
        unsafe { jump.deallocate(a.as_ptr()) };
        let b = jump.allocate(16, 0);
        assert_ne!(a, b, "memory was reused after deallocation");
    }

    #[test]
    fn zero_size_allocation_is_fatal() {
        expect_fatal(module_path!(), "zero_size_allocation_is_fatal", || {
            let heap = HeapAllocator::new();
            let jump = JumpBlockAllocator::new(&mut [], &heap);
            jump.allocate(0, 0);
        });
    }
}
