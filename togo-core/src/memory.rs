// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! The [`Allocator`] capability, its strategies, and the process-wide
//! default and scratch allocators.
//!
//! Allocators are never owned by the things they allocate for: collections
//! and arenas hold a `&dyn Allocator` which must outlive them. Failing to
//! allocate is always fatal, there's no recoverable out-of-memory path.

mod assert_allocator;
mod fixed_allocator;
mod global;
mod heap_allocator;
mod jump_block_allocator;
mod scratch;
mod temp_allocator;

use core::{mem, ptr::NonNull};

use crate::{assert_fatal, fatal};

pub use assert_allocator::AssertAllocator;
pub use fixed_allocator::FixedAllocator;
pub use global::{
    default_allocator, init, init_default, is_initialized, scratch_allocator, scratch_size,
    shutdown, SCRATCH_ALLOCATOR_SIZE_DEFAULT, SCRATCH_ALLOCATOR_SIZE_MINIMUM,
};
pub use heap_allocator::HeapAllocator;
pub use jump_block_allocator::{JumpBlockAllocator, BLOCK_SIZE_MIN};
pub use scratch::ScratchAllocator;
pub use temp_allocator::TempAllocator;

/// The alignment used when a caller has no particular requirement.
pub const DEFAULT_ALIGNMENT: usize = 4;

/// Returned by the introspection functions of allocators which don't keep
/// track of the requested value.
pub const SIZE_NOT_TRACKED: usize = usize::MAX;

/// A source of raw memory.
///
/// The methods take `&self`, implementations that need mutable state use
/// interior mutability. Whether an allocator can be shared between threads
/// is expressed with [`Sync`]: the arena strategies are not, the global
/// allocators are.
pub trait Allocator {
    /// The amount of live allocations, or 0 if not tracked.
    fn num_allocations(&self) -> usize;

    /// The total size of the memory currently allocated, or
    /// [`SIZE_NOT_TRACKED`].
    fn total_size(&self) -> usize;

    /// The size of the allocation `ptr` points to, or [`SIZE_NOT_TRACKED`].
    ///
    /// ### Safety
    ///
    /// `ptr` must be null, or a live allocation of this allocator.
    unsafe fn allocation_size(&self, ptr: *const u8) -> usize;

    /// Allocates `size` bytes aligned to `align`. An `align` of 0 means no
    /// alignment requirement. Aborts if `size` is 0, if `align` is not a
    /// power of two, or if the memory can't be provided.
    fn allocate(&self, size: usize, align: usize) -> NonNull<u8>;

    /// Frees the allocation. Does nothing if `ptr` is null.
    ///
    /// ### Safety
    ///
    /// `ptr` must be null, or a pointer returned by [`Allocator::allocate`]
    /// of this allocator, which has not been deallocated yet. The memory must
    /// not be accessed after this.
    unsafe fn deallocate(&self, ptr: *mut u8);
}

/// Checks the size and alignment of an allocation request, and returns the
/// alignment to actually use.
pub(crate) fn checked_alignment(size: usize, align: usize) -> usize {
    assert_fatal!(size != 0, "allocation size must be non-zero");
    let align = align.max(1);
    assert_fatal!(
        align.is_power_of_two(),
        "allocation alignment must be a power of two, got {align}",
    );
    align
}

/// Returns the amount of bytes to add to `addr` to make it a multiple of
/// `align`, which must be a power of two.
pub(crate) fn padding_for(addr: usize, align: usize) -> usize {
    addr.wrapping_neg() & (align - 1)
}

/// Allocates uninitialized storage for `count` values of `T`.
///
/// Storage for zero bytes (zero `count` or a zero-sized `T`) doesn't touch
/// the allocator, a dangling pointer is returned instead.
pub fn allocate_array<T>(allocator: &dyn Allocator, count: usize) -> NonNull<T> {
    let Some(size) = mem::size_of::<T>().checked_mul(count) else {
        fatal!(
            "array allocation of {count} elements of {} bytes overflows",
            mem::size_of::<T>(),
        );
    };
    if size == 0 {
        return NonNull::dangling();
    }
    allocator.allocate(size, mem::align_of::<T>()).cast::<T>()
}

/// Frees storage allocated with [`allocate_array`].
///
/// ### Safety
///
/// `ptr` and `count` must be the pointer and count of an [`allocate_array`]
/// call on the same allocator, and the storage must not have been freed yet.
/// Any values in the storage are not dropped.
pub unsafe fn deallocate_array<T>(allocator: &dyn Allocator, ptr: NonNull<T>, count: usize) {
    if mem::size_of::<T>() * count != 0 {
        // Safety: the pointer came from the same allocator, guaranteed by the
        // caller, and non-zero-sized arrays are always real allocations.
        unsafe { allocator.deallocate(ptr.as_ptr().cast::<u8>()) };
    }
}
