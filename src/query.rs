//! Queries which select archetypes and chunks by signature predicates.
//!
//! A query is an immutable predicate over component signatures: `all`
//! components which must be present, `any` of which at least one must be
//! present, and `none` which must be absent, each with a chunk-level
//! counterpart tested against per-chunk component signatures.
//!
//! Because archetypes are created rarely relative to query execution and are
//! never destroyed, each [Query] caches the archetypes it has matched and a
//! high-water mark of how many archetypes it has inspected. Re-running a
//! query only evaluates archetypes created since the last run, so steady
//! state query cost is proportional to *new* archetypes rather than to the
//! total archetype count.

use crate::entity::Entity;
use crate::signature::Signature;
use crate::storage::archetype::ArchetypeLayout;
use crate::storage::{
    Archetype, ArchetypeIndex, Archetypes, Chunk, Component, ComponentKind, ComponentRegistry,
};
use crate::world::World;

#[cfg(feature = "par-iter")]
use rayon::prelude::*;

/// The signature predicates evaluated against each archetype.
#[derive(Debug, Clone, Default)]
pub struct QueryDesc {
    all: Signature,
    any: Signature,
    none: Signature,
    chunk_all: Signature,
    chunk_any: Signature,
    chunk_none: Signature,
}

impl QueryDesc {
    /// Tests the predicates against an archetype's signatures.
    pub fn matches(&self, archetype: &Archetype) -> bool {
        let signature = archetype.signature();
        let chunk_signature = archetype.chunk_signature();

        signature.contains_all(&self.all)
            && (self.any.is_empty() || signature.intersects(&self.any))
            && signature.is_disjoint(&self.none)
            && chunk_signature.contains_all(&self.chunk_all)
            && (self.chunk_any.is_empty() || chunk_signature.intersects(&self.chunk_any))
            && chunk_signature.is_disjoint(&self.chunk_none)
    }
}

/// Builds a [Query] against a world, registering referenced component types
/// as needed.
pub struct QueryBuilder<'a> {
    world: &'a mut World,
    desc: QueryDesc,
}

impl<'a> QueryBuilder<'a> {
    pub(crate) fn new(world: &'a mut World) -> Self {
        Self {
            world,
            desc: QueryDesc::default(),
        }
    }

    /// Requires matched entities to have a `T` component.
    pub fn with_all<T: Component>(mut self) -> Self {
        let comp = self
            .world
            .registry_mut()
            .get_or_register::<T>(ComponentKind::Entity);
        self.desc.all.set(comp.bit());
        self
    }

    /// Requires matched entities to have at least one of the components
    /// named by repeated `with_any` calls.
    pub fn with_any<T: Component>(mut self) -> Self {
        let comp = self
            .world
            .registry_mut()
            .get_or_register::<T>(ComponentKind::Entity);
        self.desc.any.set(comp.bit());
        self
    }

    /// Excludes entities which have a `T` component.
    pub fn with_none<T: Component>(mut self) -> Self {
        let comp = self
            .world
            .registry_mut()
            .get_or_register::<T>(ComponentKind::Entity);
        self.desc.none.set(comp.bit());
        self
    }

    /// Requires matched chunks to carry a per-chunk `T` value.
    pub fn with_chunk_all<T: Component>(mut self) -> Self {
        let comp = self
            .world
            .registry_mut()
            .get_or_register::<T>(ComponentKind::Chunk);
        self.desc.chunk_all.set(comp.bit());
        self
    }

    /// Requires matched chunks to carry at least one of the per-chunk
    /// components named by repeated `with_chunk_any` calls.
    pub fn with_chunk_any<T: Component>(mut self) -> Self {
        let comp = self
            .world
            .registry_mut()
            .get_or_register::<T>(ComponentKind::Chunk);
        self.desc.chunk_any.set(comp.bit());
        self
    }

    /// Excludes chunks which carry a per-chunk `T` value.
    pub fn with_chunk_none<T: Component>(mut self) -> Self {
        let comp = self
            .world
            .registry_mut()
            .get_or_register::<T>(ComponentKind::Chunk);
        self.desc.chunk_none.set(comp.bit());
        self
    }

    /// Finishes the builder, producing a query with an empty match cache.
    pub fn build(self) -> Query {
        Query {
            desc: self.desc,
            matched: Vec::new(),
            seen: 0,
        }
    }
}

/// A cached query.
///
/// The query owns its predicate and the list of archetypes it has matched so
/// far. It may be executed against its world any number of times; executions
/// after the first only inspect archetypes created in between.
pub struct Query {
    desc: QueryDesc,
    matched: Vec<ArchetypeIndex>,
    seen: usize,
}

impl Query {
    /// The query's predicates.
    pub fn desc(&self) -> &QueryDesc {
        &self.desc
    }

    /// Extends the match cache over archetypes created since the last
    /// evaluation.
    fn evaluate(&mut self, archetypes: &Archetypes) {
        let slice = archetypes.as_slice();
        for archetype in &slice[self.seen..] {
            if self.desc.matches(archetype) {
                self.matched.push(archetype.index());
            }
        }
        self.seen = slice.len();
    }

    /// The archetypes currently matched by this query.
    pub fn matched_archetypes(&mut self, world: &World) -> &[ArchetypeIndex] {
        self.evaluate(world.archetypes());
        &self.matched
    }

    /// Iterates over the non-empty chunks of every matched archetype.
    ///
    /// The iteration is lazy and restartable; its length is bounded by the
    /// archetype and chunk count at call time.
    pub fn iter_chunks<'a>(&'a mut self, world: &'a World) -> ChunkIter<'a> {
        self.evaluate(world.archetypes());
        ChunkIter {
            world,
            matched: self.matched.iter(),
            current: None,
        }
    }

    /// Calls `f` for each non-empty chunk of every matched archetype.
    pub fn for_each_chunk<F>(&mut self, world: &World, mut f: F)
    where
        F: FnMut(ChunkView),
    {
        for chunk in self.iter_chunks(world) {
            f(chunk);
        }
    }

    /// Calls `f` for each non-empty chunk of every matched archetype,
    /// granting mutable access to component columns.
    pub fn for_each_chunk_mut<F>(&mut self, world: &mut World, mut f: F)
    where
        F: FnMut(ChunkViewMut),
    {
        self.evaluate(world.archetypes());
        let (registry, archetypes) = world.storage_mut();
        for &index in &self.matched {
            let archetype = archetypes.get_mut(index);
            let (layout, chunks) = archetype.layout_and_chunks_mut();
            for chunk in chunks.iter_mut().filter(|chunk| !chunk.is_empty()) {
                f(ChunkViewMut {
                    registry,
                    layout,
                    archetype: index,
                    chunk,
                });
            }
        }
    }

    /// Fans the matched chunks out across the rayon thread pool for shared
    /// reads. Chunks handed to different workers never overlap.
    #[cfg(feature = "par-iter")]
    pub fn par_for_each_chunk<F>(&mut self, world: &World, f: F)
    where
        F: Fn(ChunkView) + Send + Sync,
    {
        self.evaluate(world.archetypes());
        let registry = world.registry();
        let views: Vec<ChunkView> = self
            .matched
            .iter()
            .flat_map(|&index| {
                let archetype = world.archetypes().get(index);
                let layout = archetype.layout();
                archetype
                    .chunks()
                    .iter()
                    .filter(|chunk| !chunk.is_empty())
                    .map(move |chunk| ChunkView {
                        registry,
                        layout,
                        archetype: index,
                        chunk,
                    })
            })
            .collect();
        views.into_par_iter().for_each(f);
    }

    /// Fans the matched chunks out across the rayon thread pool with
    /// exclusive access to each chunk. A chunk is owned by exactly one
    /// worker for the duration of its slice.
    #[cfg(feature = "par-iter")]
    pub fn par_for_each_chunk_mut<F>(&mut self, world: &mut World, f: F)
    where
        F: Fn(ChunkViewMut) + Send + Sync,
    {
        self.evaluate(world.archetypes());
        let matched = &self.matched;
        let (registry, archetypes) = world.storage_mut();
        let views: Vec<ChunkViewMut> = archetypes
            .as_mut_slice()
            .iter_mut()
            .enumerate()
            .filter(|(index, _)| {
                matched
                    .binary_search(&ArchetypeIndex(*index as u32))
                    .is_ok()
            })
            .flat_map(|(index, archetype)| {
                let (layout, chunks) = Archetype::layout_and_chunks_mut(archetype);
                chunks
                    .iter_mut()
                    .filter(|chunk| !chunk.is_empty())
                    .map(move |chunk| ChunkViewMut {
                        registry,
                        layout,
                        archetype: ArchetypeIndex(index as u32),
                        chunk,
                    })
            })
            .collect();
        views.into_par_iter().for_each(f);
    }
}

/// Iterator over the non-empty chunks of a query's matched archetypes.
pub struct ChunkIter<'a> {
    world: &'a World,
    matched: std::slice::Iter<'a, ArchetypeIndex>,
    current: Option<(ArchetypeIndex, &'a Archetype, u32)>,
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = ChunkView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((index, archetype, next_chunk)) = self.current {
                if (next_chunk as usize) < archetype.chunks().len() {
                    self.current = Some((index, archetype, next_chunk + 1));
                    let chunk = archetype.chunk(next_chunk);
                    if chunk.is_empty() {
                        continue;
                    }
                    return Some(ChunkView {
                        registry: self.world.registry(),
                        layout: archetype.layout(),
                        archetype: index,
                        chunk,
                    });
                }
            }

            let index = *self.matched.next()?;
            let archetype = self.world.archetypes().get(index);
            self.current = Some((index, archetype, 0));
        }
    }
}

/// Shared access to one chunk of a matched archetype.
pub struct ChunkView<'a> {
    registry: &'a ComponentRegistry,
    layout: &'a ArchetypeLayout,
    archetype: ArchetypeIndex,
    chunk: &'a Chunk,
}

impl<'a> ChunkView<'a> {
    /// The archetype this chunk belongs to.
    pub fn archetype(&self) -> ArchetypeIndex {
        self.archetype
    }

    /// The number of entities in the chunk.
    pub fn len(&self) -> usize {
        self.chunk.len() as usize
    }

    /// Returns `true` if the chunk holds no entities.
    pub fn is_empty(&self) -> bool {
        self.chunk.is_empty()
    }

    /// The handles of the entities in this chunk, in row order.
    pub fn entities(&self) -> &'a [Entity] {
        self.chunk.entities()
    }

    /// The chunk's `T` column as a slice, indexed by row.
    pub fn component_slice<T: Component>(&self) -> Option<&'a [T]> {
        let comp = self.registry.get::<T>()?;
        let col = self.layout.column(comp)?;
        debug_assert_eq!(col.meta.size(), std::mem::size_of::<T>());
        // Safety: the column holds `len` initialized values of `T`, and the
        // shared world borrow keeps them immutable.
        unsafe {
            let ptr = self.chunk.column_ptr(col.offset, col.meta.size(), 0);
            Some(std::slice::from_raw_parts(
                ptr as *const T,
                self.chunk.len() as usize,
            ))
        }
    }

    /// The per-chunk `T` value shared by every row of this chunk.
    pub fn chunk_component<T: Component>(&self) -> Option<&'a T> {
        let comp = self.registry.get::<T>()?;
        let slot = self.layout.chunk_slot(comp)?;
        // Safety: chunk slots are constructed when the chunk is opened.
        unsafe {
            let ptr = self.chunk.base().add(slot.offset as usize);
            Some(&*(ptr as *const T))
        }
    }
}

/// Exclusive access to one chunk of a matched archetype.
pub struct ChunkViewMut<'a> {
    registry: &'a ComponentRegistry,
    layout: &'a ArchetypeLayout,
    archetype: ArchetypeIndex,
    chunk: &'a mut Chunk,
}

impl<'a> ChunkViewMut<'a> {
    /// The archetype this chunk belongs to.
    pub fn archetype(&self) -> ArchetypeIndex {
        self.archetype
    }

    /// The number of entities in the chunk.
    pub fn len(&self) -> usize {
        self.chunk.len() as usize
    }

    /// Returns `true` if the chunk holds no entities.
    pub fn is_empty(&self) -> bool {
        self.chunk.is_empty()
    }

    /// The handles of the entities in this chunk, in row order.
    pub fn entities(&self) -> &[Entity] {
        self.chunk.entities()
    }

    /// The chunk's `T` column as a slice, indexed by row.
    pub fn component_slice<T: Component>(&self) -> Option<&[T]> {
        let comp = self.registry.get::<T>()?;
        let col = self.layout.column(comp)?;
        debug_assert_eq!(col.meta.size(), std::mem::size_of::<T>());
        // Safety: the view owns the chunk exclusively.
        unsafe {
            let ptr = self.chunk.column_ptr(col.offset, col.meta.size(), 0);
            Some(std::slice::from_raw_parts(
                ptr as *const T,
                self.chunk.len() as usize,
            ))
        }
    }

    /// The chunk's `T` column as a mutable slice, indexed by row.
    pub fn component_slice_mut<T: Component>(&mut self) -> Option<&mut [T]> {
        let comp = self.registry.get::<T>()?;
        let col = self.layout.column(comp)?;
        debug_assert_eq!(col.meta.size(), std::mem::size_of::<T>());
        // Safety: the view owns the chunk exclusively, and the mutable
        // borrow of self prevents a second slice of the same column.
        unsafe {
            let ptr = self.chunk.column_ptr(col.offset, col.meta.size(), 0);
            Some(std::slice::from_raw_parts_mut(
                ptr as *mut T,
                self.chunk.len() as usize,
            ))
        }
    }

    /// The `A` column as a mutable slice alongside the `B` column as a
    /// shared slice. The two component types must be distinct.
    pub fn component_slices_mut<A: Component, B: Component>(
        &mut self,
    ) -> Option<(&mut [A], &[B])> {
        assert_ne!(
            std::any::TypeId::of::<A>(),
            std::any::TypeId::of::<B>(),
            "component_slices_mut requires two distinct component types"
        );
        let a = self.registry.get::<A>()?;
        let b = self.registry.get::<B>()?;
        let a_col = self.layout.column(a)?;
        let b_col = self.layout.column(b)?;
        // Safety: the view owns the chunk exclusively and the two columns
        // are distinct, so the slices do not alias.
        unsafe {
            let a_ptr = self.chunk.column_ptr(a_col.offset, a_col.meta.size(), 0);
            let b_ptr = self.chunk.column_ptr(b_col.offset, b_col.meta.size(), 0);
            Some((
                std::slice::from_raw_parts_mut(a_ptr as *mut A, self.chunk.len() as usize),
                std::slice::from_raw_parts(b_ptr as *const B, self.chunk.len() as usize),
            ))
        }
    }

    /// The per-chunk `T` value shared by every row of this chunk.
    pub fn chunk_component<T: Component>(&self) -> Option<&T> {
        let comp = self.registry.get::<T>()?;
        let slot = self.layout.chunk_slot(comp)?;
        // Safety: chunk slots are constructed when the chunk is opened.
        unsafe {
            let ptr = self.chunk.base().add(slot.offset as usize);
            Some(&*(ptr as *const T))
        }
    }

    /// Mutable access to the per-chunk `T` value shared by every row of
    /// this chunk.
    pub fn chunk_component_mut<T: Component>(&mut self) -> Option<&mut T> {
        let comp = self.registry.get::<T>()?;
        let slot = self.layout.chunk_slot(comp)?;
        // Safety: the view owns the chunk exclusively.
        unsafe {
            let ptr = self.chunk.base().add(slot.offset as usize);
            Some(&mut *(ptr as *mut T))
        }
    }
}
