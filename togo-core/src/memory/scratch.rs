// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{fmt::Debug, ptr::NonNull};

use parking_lot::{const_mutex, Mutex};
use tracing::{debug, trace};

use crate::assert_fatal;

use super::{checked_alignment, padding_for, Allocator};

const WORD: usize = size_of::<usize>();
/// Set in a block header when the block has been freed.
const FREE_FLAG: usize = 1 << (usize::BITS - 1);
/// Fills the words between a block header and the allocation, so that the
/// header can be found from the allocation pointer.
const PAD_WORD: usize = usize::MAX;

/// The ring buffer behind a [`ScratchAllocator`].
///
/// Every allocation is a block of `[header][pad words][data]`, where the
/// header is the size of the whole block. Blocks are handed out in order
/// starting from `allocate`, wrapping around at the end of the buffer, and
/// the span from `free` to `allocate` is in use. Blocks can be freed in any
/// order, but the space is only reclaimed when the block at `free` is freed.
struct Ring {
    /// Null when no buffer is attached.
    buffer: *mut u8,
    capacity: usize,
    /// Offset of the next block.
    allocate: usize,
    /// Offset of the oldest block that hasn't been reclaimed.
    free: usize,
    /// Bytes between `free` and `allocate`, which tells apart a full ring
    /// from an empty one when the two offsets are equal.
    used: usize,
    /// Live allocations, including the ones that spilled into the fallback.
    num_allocations: usize,
}

// Safety: the buffer pointer is only dereferenced while the Ring is locked,
// and the memory it points to is owned by the ring, not tied to any thread.
unsafe impl Send for Ring {}

impl Ring {
    const fn detached() -> Ring {
        Ring {
            buffer: core::ptr::null_mut(),
            capacity: 0,
            allocate: 0,
            free: 0,
            used: 0,
            num_allocations: 0,
        }
    }

    fn contains(&self, ptr: *const u8) -> bool {
        let base = self.buffer as usize;
        !self.buffer.is_null() && base <= ptr as usize && (ptr as usize) < base + self.capacity
    }

    fn word(&self, offset: usize) -> usize {
        debug_assert!(offset % WORD == 0 && offset + WORD <= self.capacity);
        // Safety: headers and pad words are always at word-aligned offsets
        // within the buffer, which is word-aligned.
        unsafe { self.buffer.add(offset).cast::<usize>().read() }
    }

    fn set_word(&mut self, offset: usize, value: usize) {
        debug_assert!(offset % WORD == 0 && offset + WORD <= self.capacity);
        // Safety: see word().
        unsafe { self.buffer.add(offset).cast::<usize>().write(value) };
    }

    /// Returns the offsets of the data and the end of a block placed at
    /// `header`.
    fn place(&self, header: usize, size: usize, align: usize) -> (usize, usize) {
        let unaligned = header + WORD;
        let data = unaligned + padding_for(self.buffer as usize + unaligned, align);
        (data, data.saturating_add(size))
    }

    /// `size` must be a multiple of WORD, `align` at least WORD.
    fn try_allocate(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if self.buffer.is_null() {
            return None;
        }

        // When the in-use span wraps around (or fills the whole ring), the
        // only free space is between `allocate` and `free`.
        let wrapped = self.allocate < self.free || (self.allocate == self.free && self.used > 0);
        let header = self.allocate;
        let (data, end) = self.place(header, size, align);
        let limit = if wrapped { self.free } else { self.capacity };
        if end <= limit {
            return Some(self.commit(header, data, end));
        }
        if wrapped {
            return None;
        }

        // Doesn't fit before the end of the buffer, try the start.
        let (data, end) = self.place(0, size, align);
        if end > self.free {
            return None;
        }
        let tail = self.capacity - header;
        self.set_word(header, tail | FREE_FLAG);
        self.used += tail;
        Some(self.commit(0, data, end))
    }

    fn commit(&mut self, header: usize, data: usize, end: usize) -> NonNull<u8> {
        self.set_word(header, end - header);
        for pad in (header + WORD..data).step_by(WORD) {
            self.set_word(pad, PAD_WORD);
        }
        self.used += end - header;
        self.allocate = if end == self.capacity { 0 } else { end };
        // Safety: `data < end <= capacity`, so this is within the buffer.
        unsafe { NonNull::new_unchecked(self.buffer.add(data)) }
    }

    fn header_of(&self, ptr: *const u8) -> usize {
        let mut header = ptr as usize - self.buffer as usize - WORD;
        while self.word(header) == PAD_WORD {
            header -= WORD;
        }
        header
    }

    fn free_block(&mut self, ptr: *const u8) {
        let header = self.header_of(ptr);
        let block = self.word(header);
        assert_fatal!(
            block & FREE_FLAG == 0,
            "scratch allocation {ptr:p} was already deallocated",
        );
        self.set_word(header, block | FREE_FLAG);

        // Reclaim every freed block from the oldest one onwards.
        while self.used > 0 {
            let block = self.word(self.free);
            if block & FREE_FLAG == 0 {
                break;
            }
            let block_size = block & !FREE_FLAG;
            self.free += block_size;
            self.used -= block_size;
            if self.free == self.capacity {
                self.free = 0;
            }
        }
        if self.used == 0 {
            self.allocate = 0;
            self.free = 0;
        }
    }
}

/// A thread-safe ring buffer allocator for temporary memory.
///
/// Allocations are bumped from a ring buffer obtained from the fallback
/// allocator. They can be freed in any order, but space is only reclaimed
/// from the oldest allocation onwards, so this suits short-lived allocations.
/// When the ring can't fit an allocation, it's passed on to the fallback
/// allocator.
///
/// This is the allocator behind [`scratch_allocator`](super::scratch_allocator).
pub struct ScratchAllocator<'a> {
    fallback: &'a (dyn Allocator + Sync),
    ring: Mutex<Ring>,
}

impl<'a> ScratchAllocator<'a> {
    /// Creates a [`ScratchAllocator`] with a ring buffer of (roughly) `size`
    /// bytes.
    pub fn new(fallback: &'a (dyn Allocator + Sync), size: usize) -> ScratchAllocator<'a> {
        let scratch = ScratchAllocator::detached(fallback);
        scratch.attach(size);
        scratch
    }

    /// Creates a [`ScratchAllocator`] without a ring buffer, which passes
    /// everything to the fallback allocator until [`ScratchAllocator::attach`]
    /// is called.
    pub const fn detached(fallback: &'a (dyn Allocator + Sync)) -> ScratchAllocator<'a> {
        ScratchAllocator {
            fallback,
            ring: const_mutex(Ring::detached()),
        }
    }

    /// Allocates a ring buffer of `size` bytes (rounded down to a multiple of
    /// the pointer size) from the fallback allocator.
    pub fn attach(&self, size: usize) {
        let capacity = size - size % WORD;
        assert_fatal!(capacity >= 2 * WORD, "scratch buffer of {size} bytes is too small");
        let buffer = self.fallback.allocate(capacity, WORD);

        let mut ring = self.ring.lock();
        assert_fatal!(ring.buffer.is_null(), "scratch allocator already has a buffer");
        ring.buffer = buffer.as_ptr();
        ring.capacity = capacity;
        debug!(capacity, "scratch allocator attached a ring buffer");
    }

    /// Returns the ring buffer to the fallback allocator. Aborts if any
    /// allocations from the ring are still live. Does nothing if there's no
    /// ring buffer attached.
    pub fn detach(&self) {
        let mut ring = self.ring.lock();
        if ring.buffer.is_null() {
            return;
        }
        assert_fatal!(
            ring.used == 0,
            "scratch allocator detached with {} bytes still allocated",
            ring.used,
        );
        let buffer = ring.buffer;
        let num_allocations = ring.num_allocations;
        *ring = Ring::detached();
        ring.num_allocations = num_allocations;
        // Safety: the buffer was allocated from the fallback in attach(), and
        // there are no live allocations in it.
        unsafe { self.fallback.deallocate(buffer) };
        debug!("scratch allocator detached its ring buffer");
    }

    /// The size of the ring buffer, 0 if detached.
    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity
    }
}

impl Allocator for ScratchAllocator<'_> {
    fn num_allocations(&self) -> usize {
        self.ring.lock().num_allocations
    }

    /// The bytes held in the ring buffer, block headers and padding included.
    fn total_size(&self) -> usize {
        self.ring.lock().used
    }

    unsafe fn allocation_size(&self, ptr: *const u8) -> usize {
        if ptr.is_null() {
            return 0;
        }
        let ring = self.ring.lock();
        if ring.contains(ptr) {
            let header = ring.header_of(ptr);
            let data = ptr as usize - ring.buffer as usize;
            (ring.word(header) & !FREE_FLAG) - (data - header)
        } else {
            drop(ring);
            // Safety: guaranteed by the caller, since anything not in the
            // ring came from the fallback.
            unsafe { self.fallback.allocation_size(ptr) }
        }
    }

    fn allocate(&self, size: usize, align: usize) -> NonNull<u8> {
        let align = checked_alignment(size, align).max(WORD);
        let mut ring = self.ring.lock();
        ring.num_allocations += 1;
        if let Some(block_size) = size.checked_next_multiple_of(WORD) {
            if let Some(ptr) = ring.try_allocate(block_size, align) {
                return ptr;
            }
        }
        drop(ring);

        trace!(size, align, "scratch ring is full, allocating from the fallback");
        self.fallback.allocate(size, align)
    }

    unsafe fn deallocate(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let mut ring = self.ring.lock();
        assert_fatal!(ring.num_allocations > 0, "deallocating from an empty scratch allocator");
        ring.num_allocations -= 1;
        if ring.contains(ptr) {
            ring.free_block(ptr);
        } else {
            drop(ring);
            // Safety: guaranteed by the caller, since anything not in the
            // ring came from the fallback.
            unsafe { self.fallback.deallocate(ptr) };
        }
    }
}

impl Drop for ScratchAllocator<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.detach();
        }
    }
}

impl Debug for ScratchAllocator<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("ScratchAllocator")
            .field("capacity", &ring.capacity)
            .field("used", &ring.used)
            .field("num_allocations", &ring.num_allocations)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        memory::{Allocator, HeapAllocator, ScratchAllocator},
        test_support::expect_fatal,
    };

    #[test]
    fn allocates_from_the_ring() {
        let heap = HeapAllocator::new();
        let scratch = ScratchAllocator::new(&heap, 1024);
        assert_eq!(1, heap.num_allocations(), "only the ring should be allocated");

        let mut ptrs = Vec::new();
        for (size, align) in [(1, 0), (13, 4), (8, 8), (32, 32), (100, 16)] {
            let ptr = scratch.allocate(size, align);
            assert_eq!(0, ptr.as_ptr() as usize % align.max(1));
            // Safety: live allocation of `scratch`.
            assert!(size <= unsafe { scratch.allocation_size(ptr.as_ptr()) });
            ptrs.push(ptr);
        }
        assert_eq!(1, heap.num_allocations());
        assert_eq!(5, scratch.num_allocations());

        for ptr in ptrs.into_iter().rev() {
            // Safety: live allocation of `scratch`.
            unsafe { scratch.deallocate(ptr.as_ptr()) };
        }
        assert_eq!(0, scratch.num_allocations());
        assert_eq!(0, scratch.total_size());
    }

    #[test]
    fn space_is_reclaimed_from_the_oldest_allocation() {
        let heap = HeapAllocator::new();
        let scratch = ScratchAllocator::new(&heap, 1024);
        let a = scratch.allocate(16, 0);
        let b = scratch.allocate(16, 0);
        let c = scratch.allocate(16, 0);
        let used = scratch.total_size();

        // Safety (all the deallocations): live allocations of `scratch`.
        unsafe { scratch.deallocate(b.as_ptr()) };
        assert_eq!(used, scratch.total_size(), "b is not the oldest allocation");
        unsafe { scratch.deallocate(a.as_ptr()) };
        assert!(scratch.total_size() < used / 2, "both a and b should be reclaimed");
        unsafe { scratch.deallocate(c.as_ptr()) };
        assert_eq!(0, scratch.total_size());
    }

    #[test]
    fn wraps_around_when_the_end_is_reached() {
        let heap = HeapAllocator::new();
        let scratch = ScratchAllocator::new(&heap, 512);

        let mut live = std::collections::VecDeque::new();
        for _ in 0..100 {
            live.push_back(scratch.allocate(64, 8));
            if live.len() > 3 {
                let oldest = live.pop_front().unwrap();
                // Safety: live allocation of `scratch`.
                unsafe { scratch.deallocate(oldest.as_ptr()) };
            }
        }
        assert_eq!(1, heap.num_allocations(), "nothing should've spilled over");

        for ptr in live {
            // Safety: live allocation of `scratch`.
            unsafe { scratch.deallocate(ptr.as_ptr()) };
        }
        assert_eq!(0, scratch.total_size());
    }

    #[test]
    fn spills_into_the_fallback_when_full() {
        let heap = HeapAllocator::new();
        let scratch = ScratchAllocator::new(&heap, 256);
        let big = scratch.allocate(1000, 0);
        assert_eq!(2, heap.num_allocations());
        // Safety: live allocation of `scratch`.
        unsafe {
            assert_eq!(1000, scratch.allocation_size(big.as_ptr()));
            scratch.deallocate(big.as_ptr());
        }
        assert_eq!(1, heap.num_allocations());
        assert_eq!(0, scratch.num_allocations());
    }

    #[test]
    fn detached_scratch_passes_everything_to_the_fallback() {
        let heap = HeapAllocator::new();
        let scratch = ScratchAllocator::detached(&heap);
        let ptr = scratch.allocate(16, 0);
        assert_eq!(1, heap.num_allocations());
        // Safety: live allocation of `scratch`.
        unsafe { scratch.deallocate(ptr.as_ptr()) };
        assert_eq!(0, heap.num_allocations());
    }

    #[test]
    fn double_free_is_fatal() {
        expect_fatal(module_path!(), "double_free_is_fatal", || {
            let heap = HeapAllocator::new();
            let scratch = ScratchAllocator::new(&heap, 256);
            let _keep_ring_busy = scratch.allocate(8, 0);
            let ptr = scratch.allocate(8, 0);
            // Safety: the second deallocation is the misuse being tested, it
            // aborts before touching anything.
            unsafe {
                scratch.deallocate(ptr.as_ptr());
                scratch.deallocate(ptr.as_ptr());
            }
        });
    }

    #[test]
    fn detaching_with_live_allocations_is_fatal() {
        expect_fatal(module_path!(), "detaching_with_live_allocations_is_fatal", || {
            let heap = HeapAllocator::new();
            let scratch = ScratchAllocator::new(&heap, 256);
            scratch.allocate(8, 0);
            scratch.detach();
        });
    }
}
