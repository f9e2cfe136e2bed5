// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! The process-wide allocators, set up with [`init`] and torn down with
//! [`shutdown`].

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::debug;

use crate::{assert_fatal, debug_assert_fatal};

use super::{Allocator, HeapAllocator, ScratchAllocator};

/// The smallest scratch size accepted by [`init`] (8 KiB).
pub const SCRATCH_ALLOCATOR_SIZE_MINIMUM: usize = 8 * 1024;
/// The scratch size used by [`init_default`] (4 MiB).
pub const SCRATCH_ALLOCATOR_SIZE_DEFAULT: usize = 4 * 1024 * 1024;

static DEFAULT_HEAP: HeapAllocator = HeapAllocator::new();
static SCRATCH: ScratchAllocator<'static> = ScratchAllocator::detached(&DEFAULT_HEAP);
static ACTIVE: AtomicBool = AtomicBool::new(false);
static SCRATCH_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Initializes the global allocators, with a scratch ring buffer of
/// `scratch_size` bytes allocated from the default allocator.
///
/// Aborts if the memory system is already initialized, or if `scratch_size`
/// is less than [`SCRATCH_ALLOCATOR_SIZE_MINIMUM`].
pub fn init(scratch_size: usize) {
    assert_fatal!(
        ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok(),
        "memory system has already been initialized",
    );
    assert_fatal!(
        scratch_size >= SCRATCH_ALLOCATOR_SIZE_MINIMUM,
        "scratch size must be at least {SCRATCH_ALLOCATOR_SIZE_MINIMUM} bytes, got {scratch_size}",
    );
    SCRATCH.attach(scratch_size);
    SCRATCH_SIZE.store(scratch_size, Ordering::Release);
    debug!(scratch_size, "memory system initialized");
}

/// [`init`] with [`SCRATCH_ALLOCATOR_SIZE_DEFAULT`].
pub fn init_default() {
    init(SCRATCH_ALLOCATOR_SIZE_DEFAULT);
}

/// Tears down the global allocators. Aborts if the memory system is not
/// initialized, or if the global allocators still have live allocations.
pub fn shutdown() {
    assert_fatal!(
        ACTIVE.swap(false, Ordering::AcqRel),
        "memory system has not been initialized",
    );
    SCRATCH.detach();
    assert_fatal!(
        SCRATCH.num_allocations() == 0,
        "scratch allocator has {} live allocations at shutdown",
        SCRATCH.num_allocations(),
    );
    assert_fatal!(
        DEFAULT_HEAP.num_allocations() == 0,
        "default allocator has {} live allocations at shutdown",
        DEFAULT_HEAP.num_allocations(),
    );
    SCRATCH_SIZE.store(0, Ordering::Release);
    debug!("memory system shut down");
}

pub fn is_initialized() -> bool {
    ACTIVE.load(Ordering::Acquire)
}

/// The scratch size passed to [`init`], or 0 if not initialized.
pub fn scratch_size() -> usize {
    SCRATCH_SIZE.load(Ordering::Acquire)
}

/// The thread-safe growing heap allocator.
pub fn default_allocator() -> &'static (dyn Allocator + Sync) {
    debug_assert_fatal!(is_initialized(), "memory system has not been initialized");
    &DEFAULT_HEAP
}

/// The thread-safe allocator for temporary memory, see
/// [`ScratchAllocator`]. This is the default fallback of
/// [`TempAllocator`](super::TempAllocator).
pub fn scratch_allocator() -> &'static (dyn Allocator + Sync) {
    debug_assert_fatal!(is_initialized(), "memory system has not been initialized");
    &SCRATCH
}

#[cfg(test)]
mod tests {
    use crate::{
        memory::{self, SCRATCH_ALLOCATOR_SIZE_MINIMUM},
        test_support::{expect_clean_exit, expect_fatal},
    };

    #[test]
    fn init_and_shutdown() {
        expect_clean_exit(module_path!(), "init_and_shutdown", || {
            assert!(!memory::is_initialized());
            memory::init(SCRATCH_ALLOCATOR_SIZE_MINIMUM);
            assert!(memory::is_initialized());
            assert_eq!(SCRATCH_ALLOCATOR_SIZE_MINIMUM, memory::scratch_size());

            let a = memory::default_allocator().allocate(64, 8);
            let b = memory::scratch_allocator().allocate(64, 8);
            // Safety: live allocations of the respective allocators.
            unsafe {
                memory::scratch_allocator().deallocate(b.as_ptr());
                memory::default_allocator().deallocate(a.as_ptr());
            }

            memory::shutdown();
            assert!(!memory::is_initialized());

            // Can be initialized again after a shutdown.
            memory::init_default();
            memory::shutdown();
        });
    }

    #[test]
    fn double_init_is_fatal() {
        let stderr = expect_fatal(module_path!(), "double_init_is_fatal", || {
            memory::init_default();
            memory::init_default();
        });
        assert!(stderr.contains("already been initialized"), "unexpected stderr: {stderr}");
    }

    #[test]
    fn too_small_scratch_size_is_fatal() {
        expect_fatal(module_path!(), "too_small_scratch_size_is_fatal", || {
            memory::init(SCRATCH_ALLOCATOR_SIZE_MINIMUM - 1);
        });
    }

    #[test]
    fn shutdown_without_init_is_fatal() {
        expect_fatal(module_path!(), "shutdown_without_init_is_fatal", || {
            memory::shutdown();
        });
    }

    #[test]
    fn shutdown_with_leaks_is_fatal() {
        let stderr = expect_fatal(module_path!(), "shutdown_with_leaks_is_fatal", || {
            memory::init_default();
            memory::default_allocator().allocate(8, 0);
            memory::shutdown();
        });
        assert!(stderr.contains("live allocations"), "unexpected stderr: {stderr}");
    }
}
