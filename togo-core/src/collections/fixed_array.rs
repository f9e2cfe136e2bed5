// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{
    fmt::Debug,
    ops::{Deref, DerefMut},
};

use arrayvec::ArrayVec;
use bytemuck::Zeroable;

use crate::{assert_fatal, fatal};

/// Inline array of up to `N` trivial values. Never allocates.
///
/// Exceeding the capacity is a fatal error.
#[derive(Clone)]
pub struct FixedArray<T: Copy, const N: usize> {
    inner: ArrayVec<T, N>,
}

impl<T: Copy, const N: usize> FixedArray<T, N> {
    pub const fn new() -> FixedArray<T, N> {
        FixedArray {
            inner: ArrayVec::new_const(),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn space(&self) -> usize {
        N - self.inner.len()
    }

    pub fn any(&self) -> bool {
        !self.inner.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }

    /// Appends the value. Aborts if the array is full.
    pub fn push_back(&mut self, value: T) {
        if self.inner.try_push(value).is_err() {
            fatal!("FixedArray<{N}> is full");
        }
    }

    pub fn pop_back(&mut self) -> Option<T> {
        self.inner.pop()
    }

    pub fn front(&self) -> &T {
        assert_fatal!(self.any(), "front() called on an empty FixedArray");
        &self.inner[0]
    }

    pub fn back(&self) -> &T {
        assert_fatal!(self.any(), "back() called on an empty FixedArray");
        &self.inner[self.inner.len() - 1]
    }

    /// Moves the last element over the one at `index`.
    pub fn remove_over(&mut self, index: usize) {
        assert_fatal!(
            index < self.inner.len(),
            "FixedArray index {index} out of bounds (length {})",
            self.inner.len(),
        );
        self.inner.swap_remove(index);
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

impl<T: Copy + Zeroable, const N: usize> FixedArray<T, N> {
    /// Changes the length, zeroing new elements. Aborts if `new_len > N`.
    pub fn resize(&mut self, new_len: usize) {
        assert_fatal!(new_len <= N, "cannot resize FixedArray<{N}> to {new_len}");
        self.inner.truncate(new_len);
        while self.inner.len() < new_len {
            self.inner.push(T::zeroed());
        }
    }
}

impl<T: Copy, const N: usize> Default for FixedArray<T, N> {
    fn default() -> Self {
        FixedArray::new()
    }
}

impl<T: Copy, const N: usize> Deref for FixedArray<T, N> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T: Copy, const N: usize> DerefMut for FixedArray<T, N> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl<T: Copy + Debug, const N: usize> Debug for FixedArray<T, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.inner.iter()).finish()
    }
}
