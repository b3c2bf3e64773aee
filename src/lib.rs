//! Cohort is a high performance archetype-based entity storage and query
//! engine.
//!
//! Entities are uniquely identified by generational handles and carry an
//! arbitrary, dynamically-changing set of typed components. Entities which
//! share exactly the same component set are grouped into *archetypes* and
//! stored together in fixed-capacity columnar *chunks*, so iterating the
//! results of a query touches densely packed, cache-friendly memory.
//! Queries are bit-signature predicates over component sets and cache their
//! matches, making repeated execution proportional to the number of *new*
//! archetypes rather than to the size of the world.
//!
//! # Getting Started
//!
//! ```rust
//! use cohort::prelude::*;
//!
//! // Define our component types
//! #[derive(Clone, Copy, Debug, Default, PartialEq)]
//! struct Position {
//!     x: f32,
//!     y: f32,
//! }
//!
//! #[derive(Clone, Copy, Debug, Default, PartialEq)]
//! struct Velocity {
//!     dx: f32,
//!     dy: f32,
//! }
//!
//! // Create a world to store our entities
//! let mut world = World::new();
//!
//! // Create entities with `Position` and `Velocity` data
//! for _ in 0..999 {
//!     let entity = world.spawn();
//!     world.add_component(entity, Position { x: 0.0, y: 0.0 });
//!     world.add_component(entity, Velocity { dx: 0.1, dy: 0.1 });
//! }
//!
//! // Create a query which finds all entities with `Position` and `Velocity`
//! let mut query = world
//!     .query()
//!     .with_all::<Position>()
//!     .with_all::<Velocity>()
//!     .build();
//!
//! // Iterate through all matched chunks and integrate positions
//! query.for_each_chunk_mut(&mut world, |mut chunk| {
//!     let (positions, velocities) = chunk.component_slices_mut::<Position, Velocity>().unwrap();
//!     for (pos, vel) in positions.iter_mut().zip(velocities.iter()) {
//!         pos.x += vel.dx;
//!         pos.y += vel.dy;
//!     }
//! });
//! ```
//!
//! # Structural changes
//!
//! Adding or removing a component moves an entity between archetypes: the
//! components the two archetypes share are relocated into a chunk of the
//! destination, and the vacated row is filled by swapping in the last row of
//! its chunk, keeping every chunk densely packed. Handles remain stable
//! across moves; stale handles (those freed and recycled) are detected by
//! their generation and refuse to resolve.
//!
//! # Parallel iteration
//!
//! With the default `par-iter` feature, [Query::par_for_each_chunk] and
//! [Query::par_for_each_chunk_mut] fan matched chunks out across the rayon
//! thread pool. Chunks handed to different workers never overlap, and each
//! chunk is either shared for reads or exclusively owned by one worker for
//! the duration of its slice. The lower level blocking primitives used to
//! build custom schedulers live in the [sync] module.

pub mod entity;
pub mod hash;
pub mod query;
pub mod serialize;
pub mod signature;
pub mod storage;
pub mod sync;
pub mod world;

pub use crate::entity::{Entity, EntityKind, EntityLocation, EntityTable, MAX_ENTITIES};
pub use crate::query::{ChunkIter, ChunkView, ChunkViewMut, Query, QueryBuilder, QueryDesc};
pub use crate::signature::{FixedSignature, Signature};
pub use crate::storage::{
    Archetype, ArchetypeIndex, ChunkAllocatorStats, Component, ComponentId, ComponentKind,
    ComponentRegistry, ComponentTypeId,
};
pub use crate::world::{ComponentError, World, WorldDiag};

/// Prelude module containing common types.
pub mod prelude {
    pub use crate::entity::Entity;
    pub use crate::query::{ChunkView, ChunkViewMut, Query};
    pub use crate::storage::Component;
    pub use crate::world::World;
}
