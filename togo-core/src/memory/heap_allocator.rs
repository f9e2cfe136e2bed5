// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{fmt::Debug, ptr::NonNull};
use std::{
    alloc::{self, Layout},
    thread,
};

use parking_lot::{const_mutex, Mutex};

use crate::{assert_fatal, fatal};

use super::{checked_alignment, Allocator};

/// Stored right before every allocation, so that deallocation and
/// [`Allocator::allocation_size`] don't need to be told the size.
#[derive(Clone, Copy)]
#[repr(C)]
struct Header {
    size: usize,
    align: usize,
}

const HEADER_SIZE: usize = size_of::<Header>();

struct HeapStats {
    num_allocations: usize,
    total_size: usize,
}

/// A thread-safe general purpose allocator on top of the system allocator,
/// which keeps count of its live allocations.
///
/// Dropping a [`HeapAllocator`] which still has live allocations is a fatal
/// error.
pub struct HeapAllocator {
    stats: Mutex<HeapStats>,
}

impl HeapAllocator {
    pub const fn new() -> HeapAllocator {
        HeapAllocator {
            stats: const_mutex(HeapStats {
                num_allocations: 0,
                total_size: 0,
            }),
        }
    }

    /// Returns the layout of the whole system allocation, and the offset of
    /// the user's allocation within it.
    fn layout(size: usize, align: usize) -> Option<(Layout, usize)> {
        let align = align.max(align_of::<Header>());
        let offset = HEADER_SIZE.next_multiple_of(align);
        let layout = Layout::from_size_align(offset.checked_add(size)?, align).ok()?;
        Some((layout, offset))
    }

    /// ### Safety
    ///
    /// `ptr` must be a live allocation of a [`HeapAllocator`].
    unsafe fn header(ptr: *const u8) -> Header {
        // Safety: allocate() writes the header right before the pointer it
        // returns, and the header stays there until deallocation.
        unsafe { ptr.sub(HEADER_SIZE).cast::<Header>().read() }
    }
}

impl Default for HeapAllocator {
    fn default() -> Self {
        HeapAllocator::new()
    }
}

impl Allocator for HeapAllocator {
    fn num_allocations(&self) -> usize {
        self.stats.lock().num_allocations
    }

    fn total_size(&self) -> usize {
        self.stats.lock().total_size
    }

    unsafe fn allocation_size(&self, ptr: *const u8) -> usize {
        if ptr.is_null() {
            return 0;
        }
        // Safety: guaranteed by the caller.
        unsafe { HeapAllocator::header(ptr) }.size
    }

    fn allocate(&self, size: usize, align: usize) -> NonNull<u8> {
        let align = checked_alignment(size, align);
        let Some((layout, offset)) = HeapAllocator::layout(size, align) else {
            fatal!("allocation is too large: size = {size}, align = {align}");
        };

        // Safety: the layout is never zero-sized, `size` is non-zero.
        let base = unsafe { alloc::alloc(layout) };
        if base.is_null() {
            fatal!("allocation failed: size = {size}, align = {align}");
        }

        // Safety: `offset` is within the allocation (`size` bytes come after
        // it), and it's at least HEADER_SIZE, so the header fits before it.
        // The header is aligned because `offset` is a multiple of the layout
        // alignment, which is at least the header's alignment.
        let ptr = unsafe {
            let ptr = base.add(offset);
            ptr.sub(HEADER_SIZE).cast::<Header>().write(Header {
                size,
                align: layout.align(),
            });
            ptr
        };

        let mut stats = self.stats.lock();
        stats.num_allocations += 1;
        stats.total_size += size;

        // Safety: offsetting a non-null allocation doesn't make it null.
        unsafe { NonNull::new_unchecked(ptr) }
    }

    unsafe fn deallocate(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        // Safety: guaranteed by the caller.
        let header = unsafe { HeapAllocator::header(ptr) };
        let Some((layout, offset)) = HeapAllocator::layout(header.size, header.align) else {
            fatal!("corrupted heap allocation header at {ptr:p}");
        };

        {
            let mut stats = self.stats.lock();
            assert_fatal!(stats.num_allocations > 0, "deallocating from an empty heap");
            stats.num_allocations -= 1;
            stats.total_size -= header.size;
        }

        // Safety: the same layout was used to allocate the memory starting
        // `offset` bytes before `ptr`.
        unsafe { alloc::dealloc(ptr.sub(offset), layout) };
    }
}

impl Drop for HeapAllocator {
    fn drop(&mut self) {
        // Leaks are reported as a fatal error, unless we're already unwinding
        // from a failed test, which would hide the original failure.
        if !thread::panicking() {
            let num_allocations = self.stats.get_mut().num_allocations;
            assert_fatal!(
                num_allocations == 0,
                "allocator destroyed with {num_allocations} active allocations",
            );
        }
    }
}

impl Debug for HeapAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let stats = self.stats.lock();
        f.debug_struct("HeapAllocator")
            .field("num_allocations", &stats.num_allocations)
            .field("total_size", &stats.total_size)
            .finish()
    }
}
