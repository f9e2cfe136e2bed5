// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Allocator-backed collections.
//!
//! The collections which allocate borrow a `&dyn Allocator` and give their
//! memory back to it when dropped. Their element types implement
//! [`CollectionValue`], which picks how elements are constructed, destroyed
//! and copied, see [`npod`].

mod array;
mod fixed_array;
mod hash_map;
pub mod npod;
mod priority_queue;
mod queue;

pub use array::Array;
pub use fixed_array::FixedArray;
pub use hash_map::{HashKey, HashMap, Node};
pub use npod::{CollectionValue, Managed, Trivial};
pub use priority_queue::PriorityQueue;
pub use queue::Queue;
