// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Core systems of the togo engine: allocators, allocator-backed
//! collections, and the task manager.
//!
//! Misuse of anything in this crate (allocating zero bytes, popping an id
//! that isn't alive, overfilling a fixed-capacity allocator) is a programming
//! error, and is reported through [`error::error_abort`], which terminates the
//! process. Conditions a caller is expected to check for are represented with
//! `bool`s and [`Option`]s instead.

pub mod collections;
pub mod error;
pub mod hash;
pub mod memory;
pub mod threading;

#[cfg(any(test, feature = "test-support"))]
#[doc(hidden)]
pub mod test_support;
