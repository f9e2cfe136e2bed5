// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use togo_core::{
    assert_fatal,
    collections::{Array, Queue},
    memory::Allocator,
};
use tracing::debug;

use super::EntityId;

/// Freed indices are only reused once more than this many have been freed,
/// so that the generation of a single index doesn't wrap around quickly.
pub const MIN_FREE_INDICES: usize = 1024;

/// Hands out [`EntityId`]s and tracks which of them are alive.
///
/// Each index ever handed out has a generation byte, which is bumped when
/// the entity at that index is destroyed. An id is alive if its generation
/// matches the current one of its index. Since the generation is 8 bits, an
/// id can alias a new entity after its index has been reused 256 times.
pub struct EntityManager<'a> {
    generation: Array<'a, u8>,
    free_indices: Queue<'a, u32>,
    num_alive: usize,
}

impl<'a> EntityManager<'a> {
    pub fn new(allocator: &'a dyn Allocator) -> EntityManager<'a> {
        let mut generation = Array::new(allocator);
        generation.reserve(4 * 1024);
        let mut free_indices = Queue::new(allocator);
        free_indices.reserve(MIN_FREE_INDICES);
        EntityManager {
            generation,
            free_indices,
            num_alive: 0,
        }
    }

    pub fn num_alive(&self) -> usize {
        self.num_alive
    }

    pub fn alive(&self, id: EntityId) -> bool {
        let index = id.index() as usize;
        index < self.generation.len() && self.generation[index] == id.generation()
    }

    /// Creates a new entity. Aborts if every index is in use.
    pub fn create(&mut self) -> EntityId {
        let reused = if self.free_indices.len() > MIN_FREE_INDICES {
            self.free_indices.pop_front()
        } else {
            None
        };
        let index = match reused {
            Some(index) => index,
            None => {
                let index = self.generation.len();
                assert_fatal!(
                    index < EntityId::MAX_INDICES as usize,
                    "entity index space is exhausted",
                );
                self.generation.push_back(0);
                index as u32
            }
        };
        self.num_alive += 1;
        EntityId::new(index, self.generation[index as usize])
    }

    /// Destroys the entity, invalidating the id. Aborts if the entity is not
    /// alive.
    ///
    /// When the last alive entity is destroyed, every index is forgotten, and
    /// indices are handed out from zero again.
    pub fn destroy(&mut self, id: EntityId) {
        assert_fatal!(self.alive(id), "{id:?} is not alive");
        let index = id.index();
        let generation = &mut self.generation[index as usize];
        *generation = generation.wrapping_add(1);
        self.num_alive -= 1;
        if self.num_alive > 0 {
            self.free_indices.push_back(index);
        } else {
            debug!(indices = self.generation.len(), "no entities alive, resetting indices");
            self.generation.clear();
            self.free_indices.clear();
        }
    }

    /// Forgets every entity.
    pub fn shutdown(&mut self) {
        self.free_indices.clear();
        self.generation.clear();
        self.num_alive = 0;
    }
}

#[cfg(test)]
mod tests {
    use togo_core::{memory::HeapAllocator, test_support::expect_fatal};

    use super::{EntityManager, MIN_FREE_INDICES};

    #[test]
    fn created_entities_are_alive_until_destroyed() {
        let heap = HeapAllocator::new();
        let mut em = EntityManager::new(&heap);
        let a = em.create();
        let b = em.create();
        assert_ne!(a, b);
        assert!(em.alive(a));
        assert!(em.alive(b));
        assert_eq!(2, em.num_alive());

        em.destroy(a);
        assert!(!em.alive(a));
        assert!(em.alive(b));
        assert_eq!(1, em.num_alive());
    }

    #[test]
    fn indices_are_reused_only_past_the_threshold() {
        let heap = HeapAllocator::new();
        let mut em = EntityManager::new(&heap);
        let keeper = em.create();
        let ids = (0..=MIN_FREE_INDICES).map(|_| em.create()).collect::<Vec<_>>();

        for id in &ids[..MIN_FREE_INDICES] {
            em.destroy(*id);
        }
        // Exactly MIN_FREE_INDICES free: a fresh index is used.
        let fresh = em.create();
        assert_eq!(MIN_FREE_INDICES as u32 + 2, fresh.index());
        assert_eq!(0, fresh.generation());

        em.destroy(ids[MIN_FREE_INDICES]);
        em.destroy(fresh);
        // Now more than MIN_FREE_INDICES are free: the oldest freed index is
        // reused, with a new generation.
        let reused = em.create();
        assert_eq!(ids[0].index(), reused.index());
        assert_eq!(1, reused.generation());
        assert_ne!(ids[0], reused);
        assert!(!em.alive(ids[0]));
        assert!(em.alive(reused));
        assert!(em.alive(keeper));
    }

    #[test]
    fn destroying_the_last_entity_resets_indices() {
        let heap = HeapAllocator::new();
        let mut em = EntityManager::new(&heap);
        let ids = [em.create(), em.create(), em.create()];
        for id in ids {
            em.destroy(id);
        }
        assert_eq!(0, em.num_alive());
        for id in ids {
            assert!(!em.alive(id));
        }

        let id = em.create();
        assert_eq!(0, id.index());
        assert_eq!(0, id.generation());
    }

    #[test]
    fn shutdown_forgets_everything() {
        let heap = HeapAllocator::new();
        let mut em = EntityManager::new(&heap);
        let id = em.create();
        em.shutdown();
        assert!(!em.alive(id));
        assert_eq!(0, em.num_alive());
    }

    #[test]
    fn destroying_a_dead_entity_is_fatal() {
        let stderr = expect_fatal(module_path!(), "destroying_a_dead_entity_is_fatal", || {
            let heap = HeapAllocator::new();
            let mut em = EntityManager::new(&heap);
            let _keeper = em.create();
            let id = em.create();
            em.destroy(id);
            em.destroy(id);
        });
        assert!(stderr.contains("is not alive"), "unexpected stderr: {stderr}");
    }
}
