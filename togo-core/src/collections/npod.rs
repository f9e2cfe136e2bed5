// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Element lifecycle dispatch for the collections.
//!
//! Every collection is written once against the four primitives in this
//! module: [`construct`], [`destruct`], [`copy`] and [`remove_over`]. The
//! element type picks their implementation at compile time through
//! [`CollectionValue::Lifecycle`]:
//!
//! - [`Trivial`] for plain old data (`Copy + Zeroable`): destruction is a
//!   no-op and copies are raw byte copies.
//! - [`Managed`] for types with real construction, destruction and copy
//!   semantics (`Default + Clone`): every element is explicitly
//!   default-constructed, dropped, cloned and `clone_from`-assigned.
//!
//! All the functions operate on raw element ranges, tracking which elements
//! are initialized is up to the collection.

use core::ptr;

use bytemuck::Zeroable;

/// Selects the [`ElementLifecycle`] of a type stored in the collections.
///
/// Implemented for the primitives (as [`Trivial`]) and for [`String`] and
/// [`Vec`] (as [`Managed`]). Other types can opt in with
/// [`trivial_collection_values!`](crate::trivial_collection_values) or
/// [`managed_collection_values!`](crate::managed_collection_values).
pub trait CollectionValue: Sized {
    type Lifecycle: ElementLifecycle<Self>;
}

/// The four primitives every collection operation is built from.
///
/// All functions are unsafe, since they work on raw pointers to partially
/// initialized storage. Zero-length ranges are always no-ops.
pub trait ElementLifecycle<T> {
    /// Default-constructs every element in `data[..len]`.
    ///
    /// ### Safety
    ///
    /// `data[..len]` must be valid for writes and uninitialized (or not need
    /// dropping).
    unsafe fn construct(data: *mut T, len: usize);

    /// Destroys every element in `data[..len]`.
    ///
    /// ### Safety
    ///
    /// `data[..len]` must be initialized, and is considered uninitialized
    /// afterwards.
    unsafe fn destruct(data: *mut T, len: usize);

    /// Makes `dst` a copy of `src`, where `dst` currently has `dst_len`
    /// initialized elements: excess elements of `dst` are destroyed, the
    /// overlapping prefix is assigned to, and any further elements are
    /// copy-constructed. Afterwards `dst[..src_len]` is initialized.
    ///
    /// ### Safety
    ///
    /// `dst[..dst_len]` must be initialized, `dst` must have room for
    /// `src_len` elements, `src[..src_len]` must be initialized, and the two
    /// ranges must not overlap.
    unsafe fn copy(dst: *mut T, dst_len: usize, src: *const T, src_len: usize);

    /// Swap-remove: destroys `data[i]` and moves the last element,
    /// `data[new_len]`, into its place. The slot at `new_len` is considered
    /// uninitialized afterwards (when `i == new_len`, the element is just
    /// destroyed).
    ///
    /// ### Safety
    ///
    /// `data[..=new_len]` must be initialized and `i <= new_len`.
    unsafe fn remove_over(data: *mut T, new_len: usize, i: usize);
}

/// Lifecycle of plain old data, see the [module documentation](self).
///
/// Construction zero-fills the elements instead of leaving the memory as is,
/// so a resized collection never hands out uninitialized values.
pub enum Trivial {}

/// Lifecycle of types with real construction, destruction and copying, see
/// the [module documentation](self).
pub enum Managed {}

impl<T: Copy + Zeroable> ElementLifecycle<T> for Trivial {
    unsafe fn construct(data: *mut T, len: usize) {
        // Zeroed memory is a valid T, so the storage is always initialized
        // for reads.
        // Safety: guaranteed by the caller.
        unsafe { ptr::write_bytes(data, 0, len) };
    }

    unsafe fn destruct(_data: *mut T, _len: usize) {}

    unsafe fn copy(dst: *mut T, _dst_len: usize, src: *const T, src_len: usize) {
        // Safety: guaranteed by the caller.
        unsafe { ptr::copy_nonoverlapping(src, dst, src_len) };
    }

    unsafe fn remove_over(data: *mut T, new_len: usize, i: usize) {
        // Safety: guaranteed by the caller.
        unsafe { *data.add(i) = *data.add(new_len) };
    }
}

impl<T: Default + Clone> ElementLifecycle<T> for Managed {
    unsafe fn construct(data: *mut T, len: usize) {
        for i in 0..len {
            // Safety: guaranteed by the caller.
            unsafe { data.add(i).write(T::default()) };
        }
    }

    unsafe fn destruct(data: *mut T, len: usize) {
        // Safety: guaranteed by the caller.
        unsafe { ptr::drop_in_place(ptr::slice_from_raw_parts_mut(data, len)) };
    }

    unsafe fn copy(dst: *mut T, dst_len: usize, src: *const T, src_len: usize) {
        let assigned = dst_len.min(src_len);
        // Safety (all the blocks): guaranteed by the caller. The excess is
        // destroyed first, then `dst[..assigned]` is initialized and
        // `dst[assigned..src_len]` is not.
        if dst_len > src_len {
            unsafe { Managed::destruct(dst.add(src_len), dst_len - src_len) };
        }
        for i in 0..assigned {
            unsafe { (*dst.add(i)).clone_from(&*src.add(i)) };
        }
        for i in assigned..src_len {
            unsafe { dst.add(i).write((*src.add(i)).clone()) };
        }
    }

    unsafe fn remove_over(data: *mut T, new_len: usize, i: usize) {
        // Safety: guaranteed by the caller. After the drop, the slot at `i`
        // is uninitialized, and the raw copy moves the last element into it,
        // leaving the last slot logically uninitialized.
        unsafe {
            ptr::drop_in_place(data.add(i));
            if i < new_len {
                ptr::copy_nonoverlapping(data.add(new_len), data.add(i), 1);
            }
        }
    }
}

/// See [`ElementLifecycle::construct`].
///
/// ### Safety
///
/// See [`ElementLifecycle::construct`].
pub unsafe fn construct<T: CollectionValue>(data: *mut T, len: usize) {
    // Safety: guaranteed by the caller.
    unsafe { T::Lifecycle::construct(data, len) }
}

/// See [`ElementLifecycle::destruct`].
///
/// ### Safety
///
/// See [`ElementLifecycle::destruct`].
pub unsafe fn destruct<T: CollectionValue>(data: *mut T, len: usize) {
    // Safety: guaranteed by the caller.
    unsafe { T::Lifecycle::destruct(data, len) }
}

/// See [`ElementLifecycle::copy`].
///
/// ### Safety
///
/// See [`ElementLifecycle::copy`].
pub unsafe fn copy<T: CollectionValue>(dst: *mut T, dst_len: usize, src: *const T, src_len: usize) {
    // Safety: guaranteed by the caller.
    unsafe { T::Lifecycle::copy(dst, dst_len, src, src_len) }
}

/// See [`ElementLifecycle::remove_over`].
///
/// ### Safety
///
/// See [`ElementLifecycle::remove_over`].
pub unsafe fn remove_over<T: CollectionValue>(data: *mut T, new_len: usize, i: usize) {
    // Safety: guaranteed by the caller.
    unsafe { T::Lifecycle::remove_over(data, new_len, i) }
}

/// Implements [`CollectionValue`] with the [`Trivial`] lifecycle for the
/// given `Copy + Zeroable` types.
#[macro_export]
macro_rules! trivial_collection_values {
    ($($t:ty),+ $(,)?) => {
        $(
            impl $crate::collections::CollectionValue for $t {
                type Lifecycle = $crate::collections::Trivial;
            }
        )+
    };
}

/// Implements [`CollectionValue`] with the [`Managed`] lifecycle for the
/// given `Default + Clone` types.
#[macro_export]
macro_rules! managed_collection_values {
    ($($t:ty),+ $(,)?) => {
        $(
            impl $crate::collections::CollectionValue for $t {
                type Lifecycle = $crate::collections::Managed;
            }
        )+
    };
}

crate::trivial_collection_values!(
    u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, bool, char,
);
crate::managed_collection_values!(String);

impl<T: Clone> CollectionValue for Vec<T> {
    type Lifecycle = Managed;
}
