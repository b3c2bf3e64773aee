//! Contains types related to the [World] entity collection.

use crate::entity::{Entity, EntityLocation, EntityTable};
use crate::query::QueryBuilder;
use crate::storage::{
    ArchetypeIndex, Archetypes, ChunkAllocator, ChunkAllocatorStats, Component, ComponentId,
    ComponentKind, ComponentRegistry, ComponentTypeId,
};
use smallvec::SmallVec;
use std::iter::once;
use thiserror::Error;
use tracing::{debug, trace};

/// An error which may occur when operating on an entity's components.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComponentError {
    /// The entity handle is stale or was never issued.
    #[error("entity {0:?} is not alive")]
    DeadEntity(Entity),
    /// The component is already attached to the entity.
    #[error("entity {entity:?} already has component {component}")]
    AlreadyPresent {
        /// The entity being mutated.
        entity: Entity,
        /// The duplicate component type.
        component: ComponentTypeId,
    },
    /// The component is not attached to the entity.
    #[error("entity {entity:?} does not have component {component}")]
    NotPresent {
        /// The entity being mutated.
        entity: Entity,
        /// The missing component type.
        component: ComponentTypeId,
    },
}

/// A point-in-time snapshot of a world's storage health, for operational
/// visibility. Not on any hot path.
#[derive(Debug, Clone, Copy)]
pub struct WorldDiag {
    /// The number of live entities.
    pub entities: usize,
    /// The number of freed handle slots awaiting reuse.
    pub free_slots: u32,
    /// The number of archetypes created so far.
    pub archetypes: usize,
    /// The number of open chunks across all archetypes.
    pub chunks: usize,
    /// Mean fraction of each open chunk's capacity that is occupied.
    pub chunk_occupancy: f32,
    /// Chunk allocator usage.
    pub allocator: ChunkAllocatorStats,
}

/// A collection of entities, each with an arbitrary dynamically-changing set
/// of typed components.
///
/// Entities sharing an identical component set are grouped into archetypes
/// and stored in columnar chunks. Structural mutation (spawning, despawning,
/// adding and removing components) requires `&mut World`; queries over the
/// stored data borrow the world immutably and may fan out across threads.
pub struct World {
    entities: EntityTable,
    registry: ComponentRegistry,
    archetypes: Archetypes,
    allocator: ChunkAllocator,
    root: ArchetypeIndex,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Constructs an empty world.
    pub fn new() -> Self {
        let registry = ComponentRegistry::new();
        let mut archetypes = Archetypes::new();
        let root = archetypes.find_or_create(Vec::new(), &registry);
        Self {
            entities: EntityTable::new(),
            registry,
            archetypes,
            allocator: ChunkAllocator::new(),
            root,
        }
    }

    /// The number of live entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if the world holds no live entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns `true` if the handle refers to a live entity.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    pub(crate) fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut ComponentRegistry {
        &mut self.registry
    }

    /// The world's archetypes.
    pub fn archetypes(&self) -> &Archetypes {
        &self.archetypes
    }

    pub(crate) fn storage_mut(&mut self) -> (&ComponentRegistry, &mut Archetypes) {
        (&self.registry, &mut self.archetypes)
    }

    /// The handle table backing this world.
    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }

    /// Registers `T` as a per-entity component without attaching it to
    /// anything. Registration otherwise happens on first use.
    pub fn register<T: Component>(&mut self) -> ComponentId {
        self.registry.get_or_register::<T>(ComponentKind::Entity)
    }

    /// Registers `T` as a per-chunk component: one value per chunk, shared
    /// by every entity stored in that chunk.
    pub fn register_chunk<T: Component>(&mut self) -> ComponentId {
        self.registry.get_or_register::<T>(ComponentKind::Chunk)
    }

    /// Creates a new empty entity.
    pub fn spawn(&mut self) -> Entity {
        let entity = self.entities.alloc();
        let root = self.root;
        let (chunk, row) = self
            .archetypes
            .get_mut(root)
            .alloc_row(&mut self.allocator, entity);
        self.entities
            .set_location(entity.id(), EntityLocation::new(root, chunk, row));
        trace!(?entity, "spawned entity");
        entity
    }

    /// Creates `count` new empty entities.
    pub fn spawn_batch(&mut self, count: usize) -> Vec<Entity> {
        (0..count).map(|_| self.spawn()).collect()
    }

    /// Destroys an entity, dropping its component values and retiring its
    /// handle.
    ///
    /// Returns `false` if the handle is already stale. Callers are expected
    /// to rule that case out with [is_alive](Self::is_alive).
    pub fn despawn(&mut self, entity: Entity) -> bool {
        let location = match self.entities.location(entity) {
            Some(location) => location,
            None => return false,
        };

        let archetype = self.archetypes.get_mut(location.archetype);
        archetype.drop_row(location.chunk, location.row);
        if let Some(swapped) = archetype.swap_remove_row(location.chunk, location.row) {
            self.entities.set_location(swapped.id(), location);
        }
        self.release_chunk_if_empty(location.archetype, location.chunk);
        self.entities.free(entity);
        trace!(?entity, "despawned entity");
        true
    }

    /// Attaches a component to an entity, moving it to the archetype for its
    /// extended component set.
    ///
    /// Panics if the entity is dead or already has the component; both are
    /// contract violations which callers guard with
    /// [is_alive](Self::is_alive) and [has_component](Self::has_component).
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) {
        if let Err(error) = self.try_add_component(entity, value) {
            panic!("add_component: {}", error);
        }
    }

    /// Attaches a component to an entity, reporting contract violations as
    /// errors instead of panicking.
    pub fn try_add_component<T: Component>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<(), ComponentError> {
        let comp = self.registry.get_or_register::<T>(ComponentKind::Entity);
        self.attach(entity, comp)?;
        *self
            .get_component_mut::<T>(entity)
            .expect("moved entity must have the added component") = value;
        Ok(())
    }

    /// Attaches a per-chunk component to an entity.
    ///
    /// The entity moves to an archetype whose chunks carry one `T` slot;
    /// the written value is shared with every other entity in the
    /// destination chunk.
    pub fn try_add_chunk_component<T: Component>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<(), ComponentError> {
        let comp = self.registry.get_or_register::<T>(ComponentKind::Chunk);
        self.attach(entity, comp)?;
        self.try_set_chunk_component(entity, value)
    }

    /// Detaches a component from an entity, moving it to the archetype for
    /// its reduced component set and dropping the removed value.
    ///
    /// Panics if the entity is dead or does not have the component.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) {
        if let Err(error) = self.try_remove_component::<T>(entity) {
            panic!("remove_component: {}", error);
        }
    }

    /// Detaches a component from an entity, reporting contract violations as
    /// errors instead of panicking.
    pub fn try_remove_component<T: Component>(
        &mut self,
        entity: Entity,
    ) -> Result<(), ComponentError> {
        let location = self
            .entities
            .location(entity)
            .ok_or(ComponentError::DeadEntity(entity))?;
        let comp = self
            .registry
            .get::<T>()
            .filter(|&comp| self.archetypes.get(location.archetype).has_component(comp))
            .ok_or_else(|| ComponentError::NotPresent {
                entity,
                component: ComponentTypeId::of::<T>(),
            })?;

        let source = location.archetype;
        let destination = match self.archetypes.get(source).edge_remove(comp) {
            Some(destination) => destination,
            None => {
                let components: SmallVec<[ComponentId; 8]> = self
                    .archetypes
                    .get(source)
                    .components()
                    .iter()
                    .copied()
                    .filter(|&c| c != comp)
                    .collect();
                let destination = self.archetypes.find_or_create(components, &self.registry);
                self.archetypes
                    .get_mut(source)
                    .set_edge_remove(comp, destination);
                self.archetypes
                    .get_mut(destination)
                    .set_edge_add(comp, source);
                destination
            }
        };

        self.move_entity(entity, location, destination);
        trace!(?entity, component = %ComponentTypeId::of::<T>(), "removed component");
        Ok(())
    }

    /// Moves `entity` into the archetype extended by `comp`. The new
    /// component value is default-constructed; callers overwrite it
    /// afterwards.
    fn attach(&mut self, entity: Entity, comp: ComponentId) -> Result<(), ComponentError> {
        let location = self
            .entities
            .location(entity)
            .ok_or(ComponentError::DeadEntity(entity))?;
        if self.archetypes.get(location.archetype).has_component(comp) {
            return Err(ComponentError::AlreadyPresent {
                entity,
                component: self.registry.info(comp).type_id(),
            });
        }

        let source = location.archetype;
        let destination = match self.archetypes.get(source).edge_add(comp) {
            Some(destination) => destination,
            None => {
                let components: SmallVec<[ComponentId; 8]> = self
                    .archetypes
                    .get(source)
                    .components()
                    .iter()
                    .copied()
                    .chain(once(comp))
                    .collect();
                let destination = self.archetypes.find_or_create(components, &self.registry);
                self.archetypes
                    .get_mut(source)
                    .set_edge_add(comp, destination);
                self.archetypes
                    .get_mut(destination)
                    .set_edge_remove(comp, source);
                destination
            }
        };

        self.move_entity(entity, location, destination);
        trace!(?entity, component = %self.registry.info(comp).type_id(), "added component");
        Ok(())
    }

    /// Moves an entity's row between archetypes: copies every component the
    /// two archetypes share, default-constructs newly gained components,
    /// drops lost ones, swap-removes the source row and fixes up the records
    /// of both the moved entity and the entity swapped into its old row.
    fn move_entity(
        &mut self,
        entity: Entity,
        source: EntityLocation,
        destination: ArchetypeIndex,
    ) -> EntityLocation {
        debug_assert_ne!(source.archetype, destination);

        let (src_arch, dst_arch) = self.archetypes.get2_mut(source.archetype, destination);
        let (dst_chunk_index, dst_row) = dst_arch.alloc_row(&mut self.allocator, entity);

        {
            let src_chunk = src_arch.chunk(source.chunk);
            let dst_chunk = dst_arch.chunk(dst_chunk_index);
            let src_cols = src_arch.layout().entity_comps();
            let dst_cols = dst_arch.layout().entity_comps();

            // Both column lists are sorted by component id; merge-walk them
            // to partition into shared, lost and gained components.
            let (mut i, mut j) = (0, 0);
            while i < src_cols.len() || j < dst_cols.len() {
                if j == dst_cols.len()
                    || (i < src_cols.len() && src_cols[i].comp < dst_cols[j].comp)
                {
                    let col = &src_cols[i];
                    // Safety: the source row holds an initialized value
                    // which is not accessed again after the swap-remove.
                    unsafe {
                        let ptr = src_chunk.column_ptr(col.offset, col.meta.size(), source.row);
                        col.meta.drop(ptr);
                    }
                    i += 1;
                } else if i == src_cols.len() || dst_cols[j].comp < src_cols[i].comp {
                    let col = &dst_cols[j];
                    // Safety: the destination row was just allocated and its
                    // columns are uninitialized.
                    unsafe {
                        let ptr = dst_chunk.column_ptr(col.offset, col.meta.size(), dst_row);
                        col.meta.construct(ptr);
                    }
                    j += 1;
                } else {
                    let src_col = &src_cols[i];
                    let dst_col = &dst_cols[j];
                    // Safety: both rows are in bounds; the source value is
                    // relocated, not duplicated, because its old location is
                    // never dropped or read after the swap-remove.
                    unsafe {
                        let src =
                            src_chunk.column_ptr(src_col.offset, src_col.meta.size(), source.row);
                        let dst =
                            dst_chunk.column_ptr(dst_col.offset, dst_col.meta.size(), dst_row);
                        std::ptr::copy_nonoverlapping(src, dst, src_col.meta.size());
                    }
                    i += 1;
                    j += 1;
                }
            }
        }

        if let Some(swapped) = src_arch.swap_remove_row(source.chunk, source.row) {
            self.entities.set_location(swapped.id(), source);
        }

        let location = EntityLocation::new(destination, dst_chunk_index, dst_row);
        self.entities.set_location(entity.id(), location);
        self.release_chunk_if_empty(source.archetype, source.chunk);
        location
    }

    /// Releases a chunk which has become empty, redirecting the records of
    /// any chunk relocated by the compaction.
    fn release_chunk_if_empty(&mut self, archetype: ArchetypeIndex, chunk: u32) {
        let arch = self.archetypes.get_mut(archetype);
        if (chunk as usize) >= arch.chunks().len() || !arch.chunk(chunk).is_empty() {
            return;
        }

        let relocated = arch.release_chunk(&mut self.allocator, chunk).is_some();
        if relocated {
            let arch = self.archetypes.get(archetype);
            let fixups: Vec<(u32, u16)> = arch
                .chunk(chunk)
                .entities()
                .iter()
                .enumerate()
                .map(|(row, e)| (e.id(), row as u16))
                .collect();
            for (id, row) in fixups {
                self.entities
                    .set_location(id, EntityLocation::new(archetype, chunk, row));
            }
        }
    }

    /// Returns `true` if the entity is alive and has a `T` component,
    /// per-entity or per-chunk.
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        let comp = match self.registry.get::<T>() {
            Some(comp) => comp,
            None => return false,
        };
        self.entities
            .location(entity)
            .map_or(false, |location| {
                self.archetypes.get(location.archetype).has_component(comp)
            })
    }

    /// Returns a reference to the entity's `T` component.
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        let comp = self.registry.get::<T>()?;
        let location = self.entities.location(entity)?;
        let archetype = self.archetypes.get(location.archetype);
        let col = archetype.layout().column(comp)?;
        debug_assert_eq!(col.meta.size(), std::mem::size_of::<T>());
        // Safety: the component id maps back to `T` through the registry,
        // and the row is live.
        unsafe {
            let ptr = archetype
                .chunk(location.chunk)
                .column_ptr(col.offset, col.meta.size(), location.row);
            Some(&*(ptr as *const T))
        }
    }

    /// Returns a mutable reference to the entity's `T` component.
    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let comp = self.registry.get::<T>()?;
        let location = self.entities.location(entity)?;
        let archetype = self.archetypes.get(location.archetype);
        let col = archetype.layout().column(comp)?;
        debug_assert_eq!(col.meta.size(), std::mem::size_of::<T>());
        // Safety: `&mut self` guarantees exclusive access to all chunks.
        unsafe {
            let ptr = archetype
                .chunk(location.chunk)
                .column_ptr(col.offset, col.meta.size(), location.row);
            Some(&mut *(ptr as *mut T))
        }
    }

    /// Overwrites the entity's `T` component.
    ///
    /// Panics if the entity is dead or does not have the component.
    pub fn set_component<T: Component>(&mut self, entity: Entity, value: T) {
        match self.get_component_mut::<T>(entity) {
            Some(slot) => *slot = value,
            None => panic!(
                "set_component: entity {:?} does not have component {}",
                entity,
                ComponentTypeId::of::<T>()
            ),
        }
    }

    /// Returns a reference to the per-chunk `T` value shared by the
    /// entity's chunk.
    pub fn get_chunk_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        let comp = self.registry.get::<T>()?;
        let location = self.entities.location(entity)?;
        let archetype = self.archetypes.get(location.archetype);
        let slot = archetype.layout().chunk_slot(comp)?;
        // Safety: chunk slots are constructed when a chunk is opened.
        unsafe {
            let ptr = archetype
                .chunk(location.chunk)
                .base()
                .add(slot.offset as usize);
            Some(&*(ptr as *const T))
        }
    }

    /// Overwrites the per-chunk `T` value shared by the entity's chunk,
    /// affecting every entity stored in that chunk.
    pub fn try_set_chunk_component<T: Component>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<(), ComponentError> {
        let comp = self
            .registry
            .get::<T>()
            .ok_or_else(|| ComponentError::NotPresent {
                entity,
                component: ComponentTypeId::of::<T>(),
            })?;
        let location = self
            .entities
            .location(entity)
            .ok_or(ComponentError::DeadEntity(entity))?;
        let archetype = self.archetypes.get(location.archetype);
        let slot = archetype
            .layout()
            .chunk_slot(comp)
            .ok_or_else(|| ComponentError::NotPresent {
                entity,
                component: ComponentTypeId::of::<T>(),
            })?;
        // Safety: the slot holds an initialized `T`; assignment through the
        // reference drops the previous value.
        unsafe {
            let ptr = archetype
                .chunk(location.chunk)
                .base()
                .add(slot.offset as usize);
            *(ptr as *mut T) = value;
        }
        Ok(())
    }

    /// Marks an entity as enabled or disabled. The flag is bookkeeping only;
    /// disabled entities still match queries, and callers filter them where
    /// it matters.
    pub fn set_enabled(&mut self, entity: Entity, enabled: bool) {
        if let Some(record) = self.entities.record_mut(entity) {
            record.enabled = enabled;
        }
    }

    /// Returns `true` if the entity is alive and enabled.
    pub fn is_enabled(&self, entity: Entity) -> bool {
        self.entities
            .record(entity)
            .map_or(false, |record| record.enabled)
    }

    /// Starts building a query against this world.
    pub fn query(&mut self) -> QueryBuilder {
        QueryBuilder::new(self)
    }

    /// Destroys every entity and releases all chunk memory. Registered
    /// component types and archetypes are retained.
    pub fn clear(&mut self) {
        for archetype in self.archetypes.as_mut_slice() {
            archetype.clear(&mut self.allocator);
        }
        self.entities.clear();
        debug!("cleared world");
    }

    /// Captures storage statistics and emits them as a `tracing` event.
    pub fn diag(&self) -> WorldDiag {
        let chunks: usize = self
            .archetypes
            .iter()
            .map(|archetype| archetype.chunks().len())
            .sum();
        let occupancy = if chunks == 0 {
            0.0
        } else {
            let total: f32 = self
                .archetypes
                .iter()
                .flat_map(|archetype| {
                    let capacity = archetype.layout().capacity() as f32;
                    archetype
                        .chunks()
                        .iter()
                        .map(move |chunk| chunk.len() as f32 / capacity)
                })
                .sum();
            total / chunks as f32
        };

        let diag = WorldDiag {
            entities: self.entities.len(),
            free_slots: self.entities.free_count(),
            archetypes: self.archetypes.len(),
            chunks,
            chunk_occupancy: occupancy,
            allocator: self.allocator.stats(),
        };
        debug!(
            entities = diag.entities,
            free_slots = diag.free_slots,
            archetypes = diag.archetypes,
            chunks = diag.chunks,
            occupancy = f64::from(diag.chunk_occupancy),
            "world diagnostics"
        );
        diag
    }
}

impl Drop for World {
    fn drop(&mut self) {
        for archetype in self.archetypes.as_mut_slice() {
            archetype.clear(&mut self.allocator);
        }
    }
}
