// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{fmt::Debug, ptr};

use bytemuck::Zeroable;

use crate::{assert_fatal, memory::Allocator};

use super::{
    npod::{CollectionValue, ElementLifecycle},
    Array,
};

/// Terminates a bucket chain.
const END: u32 = u32::MAX;
const MAX_LOAD_FACTOR: f32 = 0.7;

/// A hash value usable as a [`HashMap`] key. Keys are expected to already
/// be well-distributed hashes (see [`hash`](crate::hash)), they're only
/// reduced modulo the partition count.
pub trait HashKey: Copy + Eq + Zeroable + Debug {
    fn bucket(self, partitions: u32) -> u32;
}

impl HashKey for u32 {
    fn bucket(self, partitions: u32) -> u32 {
        self % partitions
    }
}

impl HashKey for u64 {
    fn bucket(self, partitions: u32) -> u32 {
        (self % partitions as u64) as u32
    }
}

/// A key-value pair of a [`HashMap`], linked to the next node of the same
/// bucket.
#[derive(Debug, Clone)]
pub struct Node<K, T> {
    pub key: K,
    next: u32,
    pub value: T,
}

impl<K: HashKey, T: CollectionValue> CollectionValue for Node<K, T> {
    type Lifecycle = NodeLifecycle;
}

/// Lifecycle of [`Node`]s: the key and link are plain data, the value uses
/// its own lifecycle.
pub enum NodeLifecycle {}

impl<K: HashKey, T: CollectionValue> ElementLifecycle<Node<K, T>> for NodeLifecycle {
    unsafe fn construct(data: *mut Node<K, T>, len: usize) {
        for i in 0..len {
            // Safety: guaranteed by the caller, each field is written once.
            unsafe {
                let node = data.add(i);
                ptr::addr_of_mut!((*node).key).write(K::zeroed());
                ptr::addr_of_mut!((*node).next).write(END);
                T::Lifecycle::construct(ptr::addr_of_mut!((*node).value), 1);
            }
        }
    }

    unsafe fn destruct(data: *mut Node<K, T>, len: usize) {
        for i in 0..len {
            // Safety: guaranteed by the caller. The key and link don't need
            // dropping.
            unsafe { T::Lifecycle::destruct(ptr::addr_of_mut!((*data.add(i)).value), 1) };
        }
    }

    unsafe fn copy(dst: *mut Node<K, T>, dst_len: usize, src: *const Node<K, T>, src_len: usize) {
        // Safety (all the blocks): guaranteed by the caller.
        if dst_len > src_len {
            unsafe { Self::destruct(dst.add(src_len), dst_len - src_len) };
        }
        for i in 0..src_len {
            let initialized = usize::from(i < dst_len);
            unsafe {
                let (to, from) = (dst.add(i), src.add(i));
                ptr::addr_of_mut!((*to).key).write((*from).key);
                ptr::addr_of_mut!((*to).next).write((*from).next);
                T::Lifecycle::copy(
                    ptr::addr_of_mut!((*to).value),
                    initialized,
                    ptr::addr_of!((*from).value),
                    1,
                );
            }
        }
    }

    unsafe fn remove_over(data: *mut Node<K, T>, new_len: usize, i: usize) {
        // Safety: guaranteed by the caller. The node is moved bitwise, which
        // is a valid move for any T.
        unsafe {
            Self::destruct(data.add(i), 1);
            if i < new_len {
                ptr::copy_nonoverlapping(data.add(new_len), data.add(i), 1);
            }
        }
    }
}

/// Chained hash multi-map from hash values to `T`.
///
/// Nodes are stored contiguously in one array, and each bucket (partition)
/// holds the index of the first node of its chain. A key can have multiple
/// values: [`HashMap::push`] adds one in front of the previous ones, and
/// [`HashMap::find_node`] + [`HashMap::next_node`] walk them from the most
/// recent to the oldest.
///
/// When the load factor would exceed 0.7, the partition count grows to
/// `partitions * 2 + 16` and every node is relinked.
pub struct HashMap<'a, K: HashKey, T: CollectionValue> {
    head: Array<'a, u32>,
    data: Array<'a, Node<K, T>>,
}

impl<'a, K: HashKey, T: CollectionValue> HashMap<'a, K, T> {
    pub fn new(allocator: &'a dyn Allocator) -> HashMap<'a, K, T> {
        HashMap {
            head: Array::new(allocator),
            data: Array::new(allocator),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn any(&self) -> bool {
        self.data.any()
    }

    /// The amount of nodes that can be added before the node storage grows.
    pub fn space(&self) -> usize {
        self.data.space()
    }

    pub fn partitions(&self) -> usize {
        self.head.len()
    }

    /// All the nodes, in storage order.
    pub fn nodes(&self) -> &[Node<K, T>] {
        &self.data
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> {
        self.data.iter().map(|node| (node.key, &node.value))
    }

    /// Makes room for `count` nodes without rehashing.
    pub fn reserve(&mut self, count: usize) {
        let partitions = (count as f32 / MAX_LOAD_FACTOR).ceil() as usize;
        if partitions > self.head.len() {
            self.rehash(partitions);
        }
        self.data.reserve(count);
    }

    /// Removes every node, keeping the partitions and capacity.
    pub fn clear(&mut self) {
        self.data.clear();
        self.head.fill(END);
    }

    /// Sets the value of the key: the most recent value is overwritten if
    /// the key exists, otherwise a node is added.
    pub fn set(&mut self, key: K, value: T) {
        match self.find_index(key) {
            Some(i) => self.data[i].value = value,
            None => self.push(key, value),
        }
    }

    /// Adds a value for the key, in front of any existing values.
    pub fn push(&mut self, key: K, value: T) {
        if self.is_full() {
            self.rehash(self.head.len() * 2 + 16);
        }
        let index = self.data.len();
        assert_fatal!(index < END as usize, "HashMap node count exceeds {END}");
        let bucket = self.bucket_of(key);
        let next = self.head[bucket];
        self.data.push_back(Node { key, next, value });
        self.head[bucket] = index as u32;
    }

    /// The most recent value of the key.
    pub fn find(&self, key: K) -> Option<&T> {
        self.find_index(key).map(|i| &self.data[i].value)
    }

    pub fn find_mut(&mut self, key: K) -> Option<&mut T> {
        self.find_index(key).map(|i| &mut self.data[i].value)
    }

    /// The most recent node with the key.
    pub fn find_node(&self, key: K) -> Option<&Node<K, T>> {
        self.find_index(key).map(|i| &self.data[i])
    }

    /// The next (older) node with the same key as `node`, which must be a
    /// node of this map.
    pub fn next_node(&self, node: &Node<K, T>) -> Option<&Node<K, T>> {
        self.walk(node.next, node.key).map(|i| &self.data[i])
    }

    /// The storage index of the most recent node with the key.
    pub fn find_index(&self, key: K) -> Option<usize> {
        if self.head.is_empty() {
            return None;
        }
        self.walk(self.head[self.bucket_of(key)], key)
    }

    pub fn has(&self, key: K) -> bool {
        self.find_index(key).is_some()
    }

    /// The amount of values the key has.
    pub fn count(&self, key: K) -> usize {
        let mut count = 0;
        let mut node = self.find_node(key);
        while let Some(current) = node {
            count += 1;
            node = self.next_node(current);
        }
        count
    }

    /// Removes the most recent value of the key. Returns false if the key
    /// had no values.
    pub fn remove(&mut self, key: K) -> bool {
        match self.find_index(key) {
            Some(i) => {
                self.remove_node(i);
                true
            }
            None => false,
        }
    }

    /// Removes the node at the storage index. The last node is moved into its
    /// place, so indices of the last node change. Aborts if the index is out
    /// of bounds.
    pub fn remove_node(&mut self, index: usize) {
        assert_fatal!(
            index < self.data.len(),
            "HashMap node index {index} out of bounds (length {})",
            self.data.len(),
        );
        let next = self.data[index].next;
        self.relink(index, next);

        let last = self.data.len() - 1;
        if index != last {
            self.relink(last, index as u32);
        }
        self.data.remove_over(index);
    }

    /// Replaces the link pointing at node `from` with `to`.
    fn relink(&mut self, from: usize, to: u32) {
        let bucket = self.bucket_of(self.data[from].key);
        if self.head[bucket] as usize == from {
            self.head[bucket] = to;
            return;
        }
        let mut i = self.head[bucket];
        while i != END {
            let node = &mut self.data[i as usize];
            if node.next as usize == from {
                node.next = to;
                return;
            }
            i = node.next;
        }
    }

    fn walk(&self, mut i: u32, key: K) -> Option<usize> {
        while i != END {
            let node = &self.data[i as usize];
            if node.key == key {
                return Some(i as usize);
            }
            i = node.next;
        }
        None
    }

    fn bucket_of(&self, key: K) -> usize {
        key.bucket(self.head.len() as u32) as usize
    }

    fn is_full(&self) -> bool {
        self.data.len() as f32 >= self.head.len() as f32 * MAX_LOAD_FACTOR
    }

    /// Relinks every node into `partitions` buckets. Each chain's relative
    /// order is kept, so values of a key stay most recent first.
    fn rehash(&mut self, partitions: usize) {
        assert_fatal!(
            partitions < END as usize,
            "HashMap partition count exceeds {END}",
        );
        let allocator = self.head.allocator();
        let mut head = Array::<u32>::with_capacity(allocator, partitions);
        head.resize(partitions);
        head.fill(END);
        let mut tails = Array::<u32>::with_capacity(allocator, partitions);
        tails.resize(partitions);
        tails.fill(END);

        for old_bucket in 0..self.head.len() {
            let mut i = self.head[old_bucket];
            while i != END {
                let node = &mut self.data[i as usize];
                let next = node.next;
                node.next = END;
                let bucket = node.key.bucket(partitions as u32) as usize;
                match tails[bucket] {
                    END => head[bucket] = i,
                    tail => self.data[tail as usize].next = i,
                }
                tails[bucket] = i;
                i = next;
            }
        }
        self.head = head;
    }
}

impl<K: HashKey, T: CollectionValue> Clone for HashMap<'_, K, T> {
    fn clone(&self) -> Self {
        HashMap {
            head: self.head.clone(),
            data: self.data.clone(),
        }
    }
}

impl<K: HashKey, T: CollectionValue + Debug> Debug for HashMap<'_, K, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map()
            .entries(self.data.iter().map(|node| (node.key, &node.value)))
            .finish()
    }
}
