//! Entity handles and the generational handle table.
//!
//! An [Entity] is a 32-bit value packing a slot index, a generation counter
//! and a small set of kind flags. The [EntityTable] owns one [EntityRecord]
//! per slot and recycles freed slots through an implicit free list: a freed
//! record's `idx` field is reused to store the index of the next free slot,
//! and its generation is incremented so any handle issued before the free
//! fails validation afterwards.

use crate::storage::archetype::ArchetypeIndex;
use std::fmt;

/// Number of bits in the handle's slot index.
pub const ENTITY_ID_BITS: u32 = 20;
/// Number of bits in the handle's generation counter.
pub const ENTITY_GEN_BITS: u32 = 8;

const ID_MASK: u32 = (1 << ENTITY_ID_BITS) - 1;
const GEN_MASK: u32 = (1 << ENTITY_GEN_BITS) - 1;
const GEN_SHIFT: u32 = ENTITY_ID_BITS;

const FLAG_ENTITY: u32 = 1 << 28;
const FLAG_PAIR: u32 = 1 << 29;
const FLAG_KIND: u32 = 1 << 30;
const FLAG_DISABLED: u32 = 1 << 31;

/// The maximum number of entity slots a table can hold.
pub const MAX_ENTITIES: usize = 1 << ENTITY_ID_BITS;

/// Marks the end of the free chain.
const FREE_END: u32 = u32::MAX;

/// The kind of data a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// Regular data, stored once per entity.
    Gen,
    /// Unique data, stored once per chunk and shared by all rows in it.
    Uni,
}

/// An opaque, generational identifier for an entity.
///
/// Two handles are equal only if all 32 bits match. A handle is *alive* only
/// while its generation matches the generation stored in its slot's record;
/// freeing the slot increments the stored generation, which retires every
/// previously issued handle for that slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct Entity(u32);

impl Entity {
    /// The reserved null handle.
    pub const NULL: Entity = Entity(ID_MASK);

    /// The reserved "not yet assigned" handle.
    pub const INVALID: Entity = Entity(u32::MAX);

    pub(crate) fn new(id: u32, gen: u32) -> Self {
        debug_assert!(id < MAX_ENTITIES as u32);
        Entity(id | ((gen & GEN_MASK) << GEN_SHIFT) | FLAG_ENTITY)
    }

    /// Reconstructs a handle from its raw bit representation.
    pub fn from_raw(raw: u32) -> Self {
        Entity(raw)
    }

    /// Returns the handle's raw bit representation.
    pub fn to_raw(self) -> u32 {
        self.0
    }

    /// The slot index portion of the handle.
    #[inline]
    pub fn id(self) -> u32 {
        self.0 & ID_MASK
    }

    /// The generation portion of the handle.
    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> GEN_SHIFT) & GEN_MASK
    }

    /// Returns `true` if the handle names an entity rather than a
    /// component-type identifier.
    pub fn is_entity(self) -> bool {
        self.0 & FLAG_ENTITY != 0
    }

    /// Returns `true` if the handle encodes a relationship pair.
    pub fn is_pair(self) -> bool {
        self.0 & FLAG_PAIR != 0
    }

    /// The component kind bit carried by the handle.
    pub fn kind(self) -> EntityKind {
        if self.0 & FLAG_KIND != 0 {
            EntityKind::Uni
        } else {
            EntityKind::Gen
        }
    }

    /// Returns `true` if the handle carries the disabled flag.
    pub fn is_disabled(self) -> bool {
        self.0 & FLAG_DISABLED != 0
    }
}

impl Default for Entity {
    fn default() -> Self {
        Entity::NULL
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Entity::NULL {
            write!(f, "Entity(null)")
        } else if *self == Entity::INVALID {
            write!(f, "Entity(invalid)")
        } else {
            write!(f, "Entity({}v{})", self.id(), self.generation())
        }
    }
}

/// The storage location of a live entity's row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    /// The archetype holding the entity.
    pub archetype: ArchetypeIndex,
    /// The chunk within the archetype.
    pub chunk: u32,
    /// The row within the chunk.
    pub row: u16,
}

impl EntityLocation {
    pub(crate) fn new(archetype: ArchetypeIndex, chunk: u32, row: u16) -> Self {
        Self {
            archetype,
            chunk,
            row,
        }
    }
}

/// One slot of the handle table.
///
/// `idx` has two meanings. While the slot is live it holds the record's own
/// index. While the slot is freed it holds the index of the next free slot,
/// forming an implicit singly linked free list without any extra memory; the
/// bumped generation is what marks the slot as dead in the meantime.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub(crate) idx: u32,
    pub(crate) gen: u32,
    pub(crate) location: Option<EntityLocation>,
    pub(crate) enabled: bool,
}

impl EntityRecord {
    fn new(idx: u32) -> Self {
        Self {
            idx,
            gen: 0,
            location: None,
            enabled: true,
        }
    }
}

/// The generational handle allocator.
///
/// Allocation and freeing are O(1). Freed slots are recycled in LIFO order
/// through the implicit free chain described on [EntityRecord].
#[derive(Default)]
pub struct EntityTable {
    records: Vec<EntityRecord>,
    next_free: Option<u32>,
    free_count: u32,
}

impl EntityTable {
    /// Constructs an empty table.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            next_free: None,
            free_count: 0,
        }
    }

    /// The number of live entities.
    pub fn len(&self) -> usize {
        self.records.len() - self.free_count as usize
    }

    /// Returns `true` if no entity is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of freed slots awaiting reuse.
    pub fn free_count(&self) -> u32 {
        self.free_count
    }

    /// Allocates a handle, reusing a freed slot when one is available.
    ///
    /// Panics when the 20-bit id space is exhausted; running out of handle
    /// space is an unrecoverable configuration error.
    pub fn alloc(&mut self) -> Entity {
        if let Some(idx) = self.next_free {
            let record = &mut self.records[idx as usize];
            self.next_free = match record.idx {
                FREE_END => None,
                next => Some(next),
            };
            record.idx = idx;
            record.enabled = true;
            self.free_count -= 1;
            Entity::new(idx, record.gen)
        } else {
            let idx = self.records.len();
            assert!(
                idx < MAX_ENTITIES,
                "entity id space exhausted ({} slots)",
                MAX_ENTITIES
            );
            self.records.push(EntityRecord::new(idx as u32));
            Entity::new(idx as u32, 0)
        }
    }

    /// Frees the handle's slot and retires the handle.
    ///
    /// Returns `false` if the handle is already stale; freeing a stale
    /// handle is a caller error which callers are expected to rule out with
    /// [is_alive](Self::is_alive) beforehand.
    pub fn free(&mut self, entity: Entity) -> bool {
        let id = entity.id() as usize;
        match self.records.get_mut(id) {
            Some(record) if record.gen == entity.generation() && record.location.is_some() => {
                record.gen = (record.gen + 1) & GEN_MASK;
                record.location = None;
                record.idx = self.next_free.unwrap_or(FREE_END);
                self.next_free = Some(id as u32);
                self.free_count += 1;
                true
            }
            _ => {
                debug_assert!(false, "free of dead handle {:?}", entity);
                false
            }
        }
    }

    /// Returns `true` if the handle's generation matches its slot.
    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.records
            .get(entity.id() as usize)
            .map_or(false, |record| {
                record.gen == entity.generation() && record.location.is_some()
            })
    }

    /// Returns the record of a live handle.
    pub fn record(&self, entity: Entity) -> Option<&EntityRecord> {
        self.records
            .get(entity.id() as usize)
            .filter(|record| record.gen == entity.generation() && record.location.is_some())
    }

    /// Returns the mutable record of a live handle.
    pub fn record_mut(&mut self, entity: Entity) -> Option<&mut EntityRecord> {
        self.records
            .get_mut(entity.id() as usize)
            .filter(|record| record.gen == entity.generation() && record.location.is_some())
    }

    /// Returns the location of a live handle's row.
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.record(entity).and_then(|record| record.location)
    }

    /// Updates the location of a slot by index, bypassing generation checks.
    ///
    /// Used by structural moves to fix up the record of an entity whose row
    /// was relocated by a swap-remove.
    pub(crate) fn set_location(&mut self, id: u32, location: EntityLocation) {
        self.records[id as usize].location = Some(location);
    }

    /// Walks the free chain and asserts its structural consistency: every
    /// link must point at a freed slot, the chain must terminate at the
    /// sentinel, and its length must equal the free count.
    ///
    /// Intended for debug builds and diagnostics; not on any hot path.
    pub fn validate(&self) {
        let mut steps = 0u32;
        let mut cursor = self.next_free;
        while let Some(idx) = cursor {
            assert!(
                (idx as usize) < self.records.len(),
                "free chain link {} out of bounds",
                idx
            );
            let record = &self.records[idx as usize];
            assert!(
                record.location.is_none(),
                "free chain passes through live slot {}",
                idx
            );
            steps += 1;
            assert!(
                steps <= self.free_count,
                "free chain longer than free count ({})",
                self.free_count
            );
            cursor = match record.idx {
                FREE_END => None,
                next => Some(next),
            };
        }
        assert_eq!(steps, self.free_count, "free chain length mismatch");
    }

    /// Iterates over the handles of all live entities.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.location.is_some())
            .map(|(id, record)| Entity::new(id as u32, record.gen))
    }

    /// Frees every live slot. Generations are preserved and bumped, so
    /// handles issued before the clear stay detectably stale.
    pub fn clear(&mut self) {
        for idx in 0..self.records.len() as u32 {
            let record = &mut self.records[idx as usize];
            if record.location.is_some() {
                record.gen = (record.gen + 1) & GEN_MASK;
                record.location = None;
                record.idx = self.next_free.unwrap_or(FREE_END);
                self.next_free = Some(idx);
                self.free_count += 1;
            }
        }
    }
}
