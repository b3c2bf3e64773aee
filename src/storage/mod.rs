//! The archetype and chunk storage model.
//!
//! Entities sharing an identical component signature are grouped into an
//! [Archetype](archetype::Archetype), and each archetype stores its entities
//! in fixed-capacity columnar [Chunk](chunk::Chunk)s carved out of a pooled
//! [ChunkAllocator](alloc::ChunkAllocator). Grouping by exact component set
//! means queries filter whole archetypes against bit signatures and then
//! iterate dense component columns with perfect locality.

pub mod alloc;
pub mod archetype;
pub mod chunk;
pub mod component;

pub use alloc::{ChunkAllocator, ChunkAllocatorStats, CHUNK_BLOCK_SIZE};
pub use archetype::{Archetype, ArchetypeIndex, ArchetypeLayout, MAX_ROWS_PER_CHUNK};
pub use chunk::Chunk;
pub use component::{
    Component, ComponentId, ComponentKind, ComponentMeta, ComponentRegistry, ComponentTypeId,
};

use fnv::FnvHashMap;
use itertools::Itertools;
use smallvec::SmallVec;

/// The arena of all archetypes in a world.
///
/// Archetypes are created lazily the first time their signature is seen and
/// are never destroyed, so an [ArchetypeIndex] stays valid for the lifetime
/// of the world and query caches can extend monotonically.
#[derive(Default)]
pub struct Archetypes {
    archetypes: Vec<Archetype>,
    by_components: FnvHashMap<SmallVec<[ComponentId; 8]>, ArchetypeIndex>,
}

impl Archetypes {
    /// Constructs an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of archetypes created so far.
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    /// Returns `true` if no archetype has been created.
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// All archetypes, ordered by creation.
    pub fn as_slice(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [Archetype] {
        &mut self.archetypes
    }

    /// Returns the archetype at the given index.
    pub fn get(&self, index: ArchetypeIndex) -> &Archetype {
        &self.archetypes[index]
    }

    pub(crate) fn get_mut(&mut self, index: ArchetypeIndex) -> &mut Archetype {
        &mut self.archetypes[index]
    }

    pub(crate) fn get2_mut(
        &mut self,
        a: ArchetypeIndex,
        b: ArchetypeIndex,
    ) -> (&mut Archetype, &mut Archetype) {
        assert_ne!(a, b);
        let (a, b) = (a.0 as usize, b.0 as usize);
        if a < b {
            let (left, right) = self.archetypes.split_at_mut(b);
            (&mut left[a], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(a);
            (&mut right[0], &mut left[b])
        }
    }

    /// Returns the archetype for the given component set, creating it on
    /// first use.
    ///
    /// The lookup is order-independent and idempotent: the ids are sorted
    /// and deduplicated before being used as the identity key, so any
    /// permutation of the same set resolves to the same archetype.
    pub fn find_or_create(
        &mut self,
        components: impl IntoIterator<Item = ComponentId>,
        registry: &ComponentRegistry,
    ) -> ArchetypeIndex {
        let components: SmallVec<[ComponentId; 8]> =
            components.into_iter().sorted().dedup().collect();

        if let Some(&index) = self.by_components.get(&components) {
            return index;
        }

        let index = ArchetypeIndex(self.archetypes.len() as u32);
        self.archetypes
            .push(Archetype::new(index, components.clone(), registry));
        self.by_components.insert(components, index);
        index
    }

    /// Iterates over all archetypes.
    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }
}
