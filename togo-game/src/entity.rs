// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Entity identifiers: generation-counted indices which can be checked for
//! staleness.

mod entity_manager;

use core::fmt;

use bytemuck::{Pod, Zeroable};
use togo_core::{
    assert_fatal,
    collections::{CollectionValue, Trivial},
};

pub use entity_manager::{EntityManager, MIN_FREE_INDICES};

/// Identifies an entity of an [`EntityManager`].
///
/// The low [`EntityId::INDEX_BITS`] bits are the index of the entity, and
/// the high 8 bits are the generation of the index when the entity was
/// created. This layout is stable, and can be serialized as is with
/// [`EntityId::raw`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Zeroable, Pod)]
#[repr(transparent)]
pub struct EntityId(u32);

impl EntityId {
    pub const INDEX_BITS: u32 = 24;
    pub const INDEX_MASK: u32 = (1 << EntityId::INDEX_BITS) - 1;
    /// The amount of distinct indices.
    pub const MAX_INDICES: u32 = 1 << EntityId::INDEX_BITS;

    /// Packs the index and generation. Aborts if the index doesn't fit in
    /// [`EntityId::INDEX_BITS`].
    pub fn new(index: u32, generation: u8) -> EntityId {
        assert_fatal!(
            index < EntityId::MAX_INDICES,
            "entity index {index} does not fit in {} bits",
            EntityId::INDEX_BITS,
        );
        EntityId(index | ((generation as u32) << EntityId::INDEX_BITS))
    }

    pub const fn from_raw(raw: u32) -> EntityId {
        EntityId(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn index(self) -> u32 {
        self.0 & EntityId::INDEX_MASK
    }

    pub const fn generation(self) -> u8 {
        (self.0 >> EntityId::INDEX_BITS) as u8
    }
}

impl CollectionValue for EntityId {
    type Lifecycle = Trivial;
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}v{})", self.index(), self.generation())
    }
}

#[cfg(test)]
mod tests {
    use togo_core::test_support::expect_fatal;

    use super::EntityId;

    #[test]
    fn index_and_generation_survive_packing() {
        for index in [0, 1, 0xABCD, EntityId::MAX_INDICES - 1] {
            for generation in [0, 1, 0x7F, 0xFF] {
                let id = EntityId::new(index, generation);
                assert_eq!(index, id.index());
                assert_eq!(generation, id.generation());
                assert_eq!(index | ((generation as u32) << 24), id.raw());
                assert_eq!(id, EntityId::from_raw(id.raw()));
            }
        }
    }

    #[test]
    fn index_past_24_bits_is_fatal() {
        expect_fatal(module_path!(), "index_past_24_bits_is_fatal", || {
            EntityId::new(EntityId::MAX_INDICES, 0);
        });
    }
}
