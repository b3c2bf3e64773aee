//! Archetypes are sets of entities which all contain exactly the same set of
//! component types.
//!
//! Entities in the same archetype have all of their components stored next
//! to each other in fixed-capacity chunks, one contiguous column per
//! component type, allowing components to be accessed as zipped slices.
//! Filtering decisions are made at the archetype level against precomputed
//! bit signatures; they are never made per-entity.
//!
//! Archetypes form an implicit graph: adding or removing one component type
//! deterministically identifies a neighbouring archetype. Edges are recorded
//! the first time a transition is taken so repeated structural changes reach
//! their destination without recomputing the component set.

use super::alloc::{ChunkAllocator, BLOCK_ALIGN, CHUNK_BLOCK_SIZE};
use super::chunk::Chunk;
use super::component::{ComponentId, ComponentKind, ComponentMeta, ComponentRegistry};
use crate::entity::Entity;
use crate::signature::Signature;
use fnv::FnvHashMap;
use smallvec::SmallVec;
use std::ops::{Index, IndexMut};

/// The maximum number of rows a chunk may hold.
pub const MAX_ROWS_PER_CHUNK: u16 = 512;

/// The index of an archetype in a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct ArchetypeIndex(pub u32);

impl Index<ArchetypeIndex> for [Archetype] {
    type Output = Archetype;

    fn index(&self, index: ArchetypeIndex) -> &Self::Output {
        &self[index.0 as usize]
    }
}

impl IndexMut<ArchetypeIndex> for [Archetype] {
    fn index_mut(&mut self, index: ArchetypeIndex) -> &mut Self::Output {
        &mut self[index.0 as usize]
    }
}

impl Index<ArchetypeIndex> for Vec<Archetype> {
    type Output = Archetype;

    fn index(&self, index: ArchetypeIndex) -> &Self::Output {
        &self[index.0 as usize]
    }
}

impl IndexMut<ArchetypeIndex> for Vec<Archetype> {
    fn index_mut(&mut self, index: ArchetypeIndex) -> &mut Self::Output {
        &mut self[index.0 as usize]
    }
}

/// Placement of one component type within an archetype's chunks: a column
/// for per-entity components, a single slot for per-chunk components.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ColumnInfo {
    pub comp: ComponentId,
    pub offset: u32,
    pub meta: ComponentMeta,
}

/// The memory layout shared by every chunk of one archetype.
#[derive(Debug)]
pub struct ArchetypeLayout {
    entity_comps: Vec<ColumnInfo>,
    chunk_comps: Vec<ColumnInfo>,
    capacity: u16,
}

impl ArchetypeLayout {
    /// Computes column offsets and the chunk capacity for the given
    /// component partition. Capacity is the largest power of two, at most
    /// [MAX_ROWS_PER_CHUNK], whose full layout fits one chunk block.
    fn compute(
        entity_metas: &[(ComponentId, ComponentMeta)],
        chunk_metas: &[(ComponentId, ComponentMeta)],
    ) -> Self {
        for (_, meta) in entity_metas.iter().chain(chunk_metas.iter()) {
            assert!(
                meta.align() <= BLOCK_ALIGN,
                "component alignment {} exceeds chunk block alignment {}",
                meta.align(),
                BLOCK_ALIGN
            );
        }

        let mut capacity = MAX_ROWS_PER_CHUNK;
        loop {
            if let Some((entity_comps, chunk_comps)) =
                Self::try_offsets(capacity, entity_metas, chunk_metas)
            {
                return Self {
                    entity_comps,
                    chunk_comps,
                    capacity,
                };
            }
            assert!(capacity > 1, "component set too large for a single chunk");
            capacity /= 2;
        }
    }

    fn try_offsets(
        capacity: u16,
        entity_metas: &[(ComponentId, ComponentMeta)],
        chunk_metas: &[(ComponentId, ComponentMeta)],
    ) -> Option<(Vec<ColumnInfo>, Vec<ColumnInfo>)> {
        fn align_up(value: usize, align: usize) -> usize {
            (value + align - 1) & !(align - 1)
        }

        // The entity handle column always sits at offset zero.
        let mut cursor = std::mem::size_of::<Entity>() * capacity as usize;

        let mut entity_comps = Vec::with_capacity(entity_metas.len());
        for &(comp, meta) in entity_metas {
            cursor = align_up(cursor, meta.align().max(1));
            entity_comps.push(ColumnInfo {
                comp,
                offset: cursor as u32,
                meta,
            });
            cursor += meta.size() * capacity as usize;
        }

        let mut chunk_comps = Vec::with_capacity(chunk_metas.len());
        for &(comp, meta) in chunk_metas {
            cursor = align_up(cursor, meta.align().max(1));
            chunk_comps.push(ColumnInfo {
                comp,
                offset: cursor as u32,
                meta,
            });
            cursor += meta.size();
        }

        if cursor <= CHUNK_BLOCK_SIZE {
            Some((entity_comps, chunk_comps))
        } else {
            None
        }
    }

    /// The number of rows each chunk of this archetype can hold.
    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    pub(crate) fn entity_comps(&self) -> &[ColumnInfo] {
        &self.entity_comps
    }

    pub(crate) fn chunk_comps(&self) -> &[ColumnInfo] {
        &self.chunk_comps
    }

    /// The column for a per-entity component, if present.
    pub(crate) fn column(&self, comp: ComponentId) -> Option<&ColumnInfo> {
        self.entity_comps
            .binary_search_by_key(&comp, |info| info.comp)
            .ok()
            .map(|i| &self.entity_comps[i])
    }

    /// The slot for a per-chunk component, if present.
    pub(crate) fn chunk_slot(&self, comp: ComponentId) -> Option<&ColumnInfo> {
        self.chunk_comps
            .binary_search_by_key(&comp, |info| info.comp)
            .ok()
            .map(|i| &self.chunk_comps[i])
    }
}

/// A collection of entities which all have identical component types,
/// stored across a set of fixed-capacity chunks.
#[derive(Debug)]
pub struct Archetype {
    index: ArchetypeIndex,
    /// The full sorted component id set; the archetype's identity.
    components: SmallVec<[ComponentId; 8]>,
    signature: Signature,
    chunk_signature: Signature,
    layout: ArchetypeLayout,
    chunks: Vec<Chunk>,
    edges_add: FnvHashMap<ComponentId, ArchetypeIndex>,
    edges_remove: FnvHashMap<ComponentId, ArchetypeIndex>,
}

impl Archetype {
    /// Constructs the archetype for the given sorted component id set.
    pub(crate) fn new(
        index: ArchetypeIndex,
        components: SmallVec<[ComponentId; 8]>,
        registry: &ComponentRegistry,
    ) -> Self {
        debug_assert!(components.windows(2).all(|w| w[0] < w[1]));

        let mut entity_metas = Vec::new();
        let mut chunk_metas = Vec::new();
        let mut signature = Signature::new();
        let mut chunk_signature = Signature::new();

        for &comp in &components {
            let info = registry.info(comp);
            match info.kind() {
                ComponentKind::Entity => {
                    signature.set(comp.bit());
                    entity_metas.push((comp, *info.meta()));
                }
                ComponentKind::Chunk => {
                    chunk_signature.set(comp.bit());
                    chunk_metas.push((comp, *info.meta()));
                }
            }
        }

        let layout = ArchetypeLayout::compute(&entity_metas, &chunk_metas);

        Self {
            index,
            components,
            signature,
            chunk_signature,
            layout,
            chunks: Vec::new(),
            edges_add: FnvHashMap::default(),
            edges_remove: FnvHashMap::default(),
        }
    }

    /// Returns the index of the archetype.
    pub fn index(&self) -> ArchetypeIndex {
        self.index
    }

    /// The sorted component id set identifying this archetype.
    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }

    /// The bit signature over per-entity component ordinals.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// The bit signature over per-chunk component ordinals.
    pub fn chunk_signature(&self) -> &Signature {
        &self.chunk_signature
    }

    /// The chunk memory layout shared by this archetype's chunks.
    pub fn layout(&self) -> &ArchetypeLayout {
        &self.layout
    }

    /// The archetype's chunks.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub(crate) fn chunk(&self, index: u32) -> &Chunk {
        &self.chunks[index as usize]
    }

    /// Splits the archetype into its layout and chunk list, allowing chunks
    /// to be mutated while the layout is read.
    pub(crate) fn layout_and_chunks_mut(&mut self) -> (&ArchetypeLayout, &mut [Chunk]) {
        (&self.layout, &mut self.chunks)
    }

    /// The total number of entities across all chunks.
    pub fn entity_count(&self) -> usize {
        self.chunks.iter().map(|c| c.len() as usize).sum()
    }

    /// Returns `true` if the component id is part of this archetype.
    pub fn has_component(&self, comp: ComponentId) -> bool {
        self.components.binary_search(&comp).is_ok()
    }

    /// The recorded neighbour reached by adding `comp`, if the transition
    /// has been taken before.
    pub(crate) fn edge_add(&self, comp: ComponentId) -> Option<ArchetypeIndex> {
        self.edges_add.get(&comp).copied()
    }

    pub(crate) fn set_edge_add(&mut self, comp: ComponentId, target: ArchetypeIndex) {
        self.edges_add.insert(comp, target);
    }

    /// The recorded neighbour reached by removing `comp`, if the transition
    /// has been taken before.
    pub(crate) fn edge_remove(&self, comp: ComponentId) -> Option<ArchetypeIndex> {
        self.edges_remove.get(&comp).copied()
    }

    pub(crate) fn set_edge_remove(&mut self, comp: ComponentId, target: ArchetypeIndex) {
        self.edges_remove.insert(comp, target);
    }

    /// Allocates a row for `entity`, appending to the last chunk or opening
    /// a new one when the last chunk is full. Per-entity component columns
    /// at the returned row are uninitialized; the caller must fill them.
    /// Per-chunk component slots are default-constructed when a chunk is
    /// opened.
    pub(crate) fn alloc_row(
        &mut self,
        allocator: &mut ChunkAllocator,
        entity: Entity,
    ) -> (u32, u16) {
        let capacity = self.layout.capacity;
        let needs_chunk = self
            .chunks
            .last()
            .map_or(true, |chunk| chunk.len() >= capacity);

        if needs_chunk {
            let (block, data) = allocator.alloc_block();
            let chunk = Chunk::new(data, block);
            for slot in &self.layout.chunk_comps {
                // Safety: the slot offset is inside the block and meets the
                // component's alignment.
                unsafe {
                    slot.meta.construct(chunk.base().add(slot.offset as usize));
                }
            }
            self.chunks.push(chunk);
        }

        let chunk_index = (self.chunks.len() - 1) as u32;
        let row = self.chunks[chunk_index as usize].push_row(entity, capacity);
        (chunk_index, row)
    }

    /// Drops every per-entity component value at the given row.
    pub(crate) fn drop_row(&mut self, chunk: u32, row: u16) {
        let chunk = &mut self.chunks[chunk as usize];
        for col in &self.layout.entity_comps {
            // Safety: the row holds initialized values which are not
            // accessed again before being overwritten or discarded.
            unsafe {
                let ptr = chunk.column_ptr(col.offset, col.meta.size(), row);
                col.meta.drop(ptr);
            }
        }
    }

    /// Removes the given row by moving the last row of the chunk into its
    /// place, keeping rows dense. Component values at the removed row must
    /// already have been dropped or moved out by the caller.
    ///
    /// Returns the handle of the entity that was relocated into `row`, if
    /// any; the caller must redirect that entity's record.
    pub(crate) fn swap_remove_row(&mut self, chunk: u32, row: u16) -> Option<Entity> {
        let chunk = &mut self.chunks[chunk as usize];
        debug_assert!(chunk.len() > 0);
        let last = chunk.len() - 1;

        let swapped = if row != last {
            for col in &self.layout.entity_comps {
                // Safety: both rows are within the initialized prefix of the
                // column and do not overlap.
                unsafe {
                    let src = chunk.column_ptr(col.offset, col.meta.size(), last);
                    let dst = chunk.column_ptr(col.offset, col.meta.size(), row);
                    std::ptr::copy_nonoverlapping(src, dst, col.meta.size());
                }
            }
            let moved = chunk.entity_at(last);
            chunk.set_entity(row, moved);
            Some(moved)
        } else {
            None
        };

        chunk.pop_row();
        swapped
    }

    /// Releases an empty chunk back to the allocator, dropping its per-chunk
    /// component slots.
    ///
    /// The chunk list is compacted with a swap-remove; when that relocates
    /// another chunk into `chunk_index`, the relocated chunk's former index
    /// is returned and the caller must redirect the records of every entity
    /// it contains.
    pub(crate) fn release_chunk(
        &mut self,
        allocator: &mut ChunkAllocator,
        chunk_index: u32,
    ) -> Option<u32> {
        let chunk = &mut self.chunks[chunk_index as usize];
        assert!(chunk.is_empty(), "release of non-empty chunk");

        for slot in &self.layout.chunk_comps {
            // Safety: slots were constructed when the chunk was opened and
            // are not accessed after release.
            unsafe {
                slot.meta.drop(chunk.base().add(slot.offset as usize));
            }
        }

        let block = chunk.block();
        allocator.free_block(block);
        self.chunks.swap_remove(chunk_index as usize);

        if (chunk_index as usize) < self.chunks.len() {
            Some(self.chunks.len() as u32)
        } else {
            None
        }
    }

    /// Drops all component values and releases every chunk. Used when the
    /// world is cleared or dropped.
    pub(crate) fn clear(&mut self, allocator: &mut ChunkAllocator) {
        for chunk in &mut self.chunks {
            for row in 0..chunk.len() {
                for col in &self.layout.entity_comps {
                    // Safety: every occupied row holds initialized values.
                    unsafe {
                        let ptr = chunk.column_ptr(col.offset, col.meta.size(), row);
                        col.meta.drop(ptr);
                    }
                }
            }
            for slot in &self.layout.chunk_comps {
                // Safety: slots are constructed for every open chunk.
                unsafe {
                    slot.meta.drop(chunk.base().add(slot.offset as usize));
                }
            }
            allocator.free_block(chunk.block());
        }
        self.chunks.clear();
    }
}
