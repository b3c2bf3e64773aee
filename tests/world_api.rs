use cohort::prelude::*;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Pos(f32, f32, f32);
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Vel(f32, f32, f32);
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Health(u32);
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
struct Model(u32);

#[test]
fn spawn_and_despawn() {
    let mut world = World::new();
    let entity = world.spawn();
    assert!(world.is_alive(entity));
    assert_eq!(world.len(), 1);

    assert!(world.despawn(entity));
    assert!(!world.is_alive(entity));
    assert_eq!(world.len(), 0);
}

#[test]
fn despawn_of_stale_handle_is_refused() {
    let mut world = World::new();
    let entity = world.spawn();
    assert!(world.despawn(entity));
    assert!(!world.despawn(entity));
}

#[test]
fn generational_safety() {
    let mut world = World::new();
    let first = world.spawn();
    world.despawn(first);

    // The slot is recycled with a strictly greater generation.
    let second = world.spawn();
    assert_eq!(second.id(), first.id());
    assert!(second.generation() > first.generation());

    // The old handle never becomes valid again.
    assert!(!world.is_alive(first));
    assert!(world.is_alive(second));

    // Component access through the stale handle resolves to nothing.
    world.add_component(second, Pos(1.0, 2.0, 3.0));
    assert_eq!(world.get_component::<Pos>(first), None);
    assert_eq!(world.get_component::<Pos>(second), Some(&Pos(1.0, 2.0, 3.0)));
}

#[test]
fn add_and_get_component() {
    let mut world = World::new();
    let entity = world.spawn();
    world.add_component(entity, Pos(1.0, 2.0, 3.0));

    assert!(world.has_component::<Pos>(entity));
    assert!(!world.has_component::<Vel>(entity));
    assert_eq!(world.get_component::<Pos>(entity), Some(&Pos(1.0, 2.0, 3.0)));
    assert_eq!(world.get_component::<Vel>(entity), None);
}

#[test]
fn set_component_overwrites() {
    let mut world = World::new();
    let entity = world.spawn();
    world.add_component(entity, Health(10));
    world.set_component(entity, Health(3));
    assert_eq!(world.get_component::<Health>(entity), Some(&Health(3)));

    if let Some(health) = world.get_component_mut::<Health>(entity) {
        health.0 += 1;
    }
    assert_eq!(world.get_component::<Health>(entity), Some(&Health(4)));
}

#[test]
fn duplicate_add_is_an_error() {
    let mut world = World::new();
    let entity = world.spawn();
    world.add_component(entity, Pos(0.0, 0.0, 0.0));
    assert!(world.try_add_component(entity, Pos(1.0, 1.0, 1.0)).is_err());
}

#[test]
fn remove_of_absent_component_is_an_error() {
    let mut world = World::new();
    let entity = world.spawn();
    assert!(world.try_remove_component::<Pos>(entity).is_err());
}

#[test]
fn operations_on_dead_entities_are_errors() {
    let mut world = World::new();
    let entity = world.spawn();
    world.despawn(entity);

    assert!(world.try_add_component(entity, Pos::default()).is_err());
    assert!(world.try_remove_component::<Pos>(entity).is_err());
    assert_eq!(world.get_component::<Pos>(entity), None);
}

#[test]
fn component_values_survive_archetype_moves() {
    let mut world = World::new();
    let entity = world.spawn();
    world.add_component(entity, Pos(1.0, 2.0, 3.0));
    world.add_component(entity, Vel(0.1, 0.2, 0.3));

    // Adding a third component moves the entity to a new archetype; the
    // previously written values must move with it.
    world.add_component(entity, Health(100));
    assert_eq!(world.get_component::<Pos>(entity), Some(&Pos(1.0, 2.0, 3.0)));
    assert_eq!(world.get_component::<Vel>(entity), Some(&Vel(0.1, 0.2, 0.3)));
    assert_eq!(world.get_component::<Health>(entity), Some(&Health(100)));

    // Removing one moves it again.
    world.remove_component::<Vel>(entity);
    assert!(!world.has_component::<Vel>(entity));
    assert_eq!(world.get_component::<Pos>(entity), Some(&Pos(1.0, 2.0, 3.0)));
    assert_eq!(world.get_component::<Health>(entity), Some(&Health(100)));
}

#[test]
fn removed_row_is_reoccupied_by_swapped_last_entity() {
    let mut world = World::new();

    let a = world.spawn();
    let b = world.spawn();
    let c = world.spawn();
    for (i, entity) in [a, b, c].iter().enumerate() {
        world.add_component(*entity, Pos(i as f32, 0.0, 0.0));
        world.add_component(*entity, Vel(0.0, i as f32, 0.0));
    }

    let a_location = world.entities().location(a).unwrap();
    let c_location = world.entities().location(c).unwrap();
    assert_eq!(a_location.row, 0);
    assert_eq!(c_location.row, 2);

    // Moving `a` out of {Pos, Vel} vacates row 0; the last row (`c`) is
    // swapped into it and its record must follow.
    world.remove_component::<Vel>(a);

    let c_location = world.entities().location(c).unwrap();
    assert_eq!(c_location.row, 0);

    let archetype = world.archetypes().get(c_location.archetype);
    let chunk = &archetype.chunks()[c_location.chunk as usize];
    assert_eq!(chunk.len(), 2);
    assert_eq!(chunk.entities()[0], c);
    assert_eq!(chunk.entities()[1], b);

    assert_eq!(world.get_component::<Pos>(c), Some(&Pos(2.0, 0.0, 0.0)));
    assert_eq!(world.get_component::<Vel>(c), Some(&Vel(0.0, 2.0, 0.0)));
}

#[test]
fn chunks_stay_dense() {
    let mut world = World::new();
    let entities: Vec<Entity> = (0..100)
        .map(|i| {
            let entity = world.spawn();
            world.add_component(entity, Pos(i as f32, 0.0, 0.0));
            entity
        })
        .collect();

    // Remove every third entity and verify the dense-chunk invariant: rows
    // are packed from zero and each live record points at the row storing
    // its own handle.
    for entity in entities.iter().step_by(3) {
        world.despawn(*entity);
    }

    for entity in entities.iter().filter(|e| world.is_alive(**e)) {
        let location = world.entities().location(*entity).unwrap();
        let archetype = world.archetypes().get(location.archetype);
        let chunk = &archetype.chunks()[location.chunk as usize];
        assert!(location.row < chunk.len());
        assert_eq!(chunk.entities()[location.row as usize], *entity);
    }

    for archetype in world.archetypes().iter() {
        for chunk in archetype.chunks() {
            assert!(!chunk.is_empty(), "empty chunks must be released");
        }
    }
}

#[test]
fn many_entities_span_multiple_chunks() {
    let mut world = World::new();
    let count = 2000;
    let entities: Vec<Entity> = (0..count)
        .map(|i| {
            let entity = world.spawn();
            world.add_component(entity, Pos(i as f32, i as f32, i as f32));
            entity
        })
        .collect();

    let location = world.entities().location(entities[0]).unwrap();
    let archetype = world.archetypes().get(location.archetype);
    assert!(archetype.chunks().len() > 1);
    assert_eq!(archetype.entity_count(), count);

    for (i, entity) in entities.iter().enumerate() {
        let expected = Pos(i as f32, i as f32, i as f32);
        assert_eq!(world.get_component::<Pos>(*entity), Some(&expected));
    }
}

#[test]
fn chunk_components_are_shared_per_chunk() {
    let mut world = World::new();
    let a = world.spawn();
    let b = world.spawn();
    world.add_component(a, Pos::default());
    world.add_component(b, Pos::default());

    world.try_add_chunk_component(a, Model(5)).unwrap();
    world.try_add_chunk_component(b, Model(9)).unwrap();

    // Both entities share the archetype {Pos, Model} and land in the same
    // chunk, so the last written value is visible through both.
    assert_eq!(world.get_chunk_component::<Model>(a), Some(&Model(9)));
    assert_eq!(world.get_chunk_component::<Model>(b), Some(&Model(9)));

    world.try_set_chunk_component(a, Model(7)).unwrap();
    assert_eq!(world.get_chunk_component::<Model>(b), Some(&Model(7)));
}

#[test]
fn zero_sized_marker_components() {
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    struct Frozen;

    let mut world = World::new();
    let tagged = world.spawn();
    world.add_component(tagged, Pos::default());
    world.add_component(tagged, Frozen);

    let plain = world.spawn();
    world.add_component(plain, Pos::default());

    assert!(world.has_component::<Frozen>(tagged));
    assert!(!world.has_component::<Frozen>(plain));

    let mut query = world
        .query()
        .with_all::<Pos>()
        .with_none::<Frozen>()
        .build();
    let mut matched = Vec::new();
    query.for_each_chunk(&world, |chunk| matched.extend_from_slice(chunk.entities()));
    assert_eq!(matched, vec![plain]);

    world.remove_component::<Frozen>(tagged);
    assert!(!world.has_component::<Frozen>(tagged));
    assert_eq!(world.get_component::<Pos>(tagged), Some(&Pos::default()));
}

#[test]
fn enable_disable_flags() {
    let mut world = World::new();
    let entity = world.spawn();
    assert!(world.is_enabled(entity));

    world.set_enabled(entity, false);
    assert!(!world.is_enabled(entity));

    world.set_enabled(entity, true);
    assert!(world.is_enabled(entity));

    world.despawn(entity);
    assert!(!world.is_enabled(entity));
}

#[test]
fn clear_destroys_everything() {
    let mut world = World::new();
    for _ in 0..10 {
        let entity = world.spawn();
        world.add_component(entity, Pos::default());
    }
    assert_eq!(world.len(), 10);

    world.clear();
    assert_eq!(world.len(), 0);
    assert_eq!(world.diag().chunks, 0);

    // The world remains usable.
    let entity = world.spawn();
    world.add_component(entity, Pos(1.0, 1.0, 1.0));
    assert_eq!(world.get_component::<Pos>(entity), Some(&Pos(1.0, 1.0, 1.0)));
}

#[test]
fn drop_components_are_dropped() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Tracked(Option<Arc<AtomicUsize>>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            if let Some(counter) = &self.0 {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    let drops = Arc::new(AtomicUsize::new(0));
    let mut world = World::new();

    let a = world.spawn();
    let b = world.spawn();
    world.add_component(a, Tracked(Some(drops.clone())));
    world.add_component(b, Tracked(Some(drops.clone())));

    // Despawning drops the entity's values. The default-constructed value
    // displaced by each add carries no counter, so only real values count.
    world.despawn(a);
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    // Moving an entity must not double-drop; removal drops the removed
    // value exactly once.
    world.add_component(b, Pos::default());
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    world.remove_component::<Tracked>(b);
    assert_eq!(drops.load(Ordering::SeqCst), 2);

    drop(world);
    assert_eq!(drops.load(Ordering::SeqCst), 2);
}

#[test]
fn diag_reports_storage_shape() {
    let mut world = World::new();
    for _ in 0..100 {
        let entity = world.spawn();
        world.add_component(entity, Pos::default());
    }

    let diag = world.diag();
    assert_eq!(diag.entities, 100);
    assert!(diag.archetypes >= 2);
    assert!(diag.chunks > 0);
    assert!(diag.chunk_occupancy > 0.0);
    assert!(diag.allocator.blocks_used > 0);

    world.entities().validate();
}

#[test]
fn save_and_load_round_trips_component_data() {
    use cohort::serialize::{load_components, save_components, RawBuffer, RawRead};

    let mut world = World::new();
    let entities: Vec<Entity> = (0..10)
        .map(|i| {
            let entity = world.spawn();
            world.add_component(entity, Pos(i as f32, 0.0, 0.0));
            world.add_component(entity, Health(i));
            entity
        })
        .collect();

    let mut buffer = RawBuffer::new();
    save_components(&world, &mut buffer).unwrap();

    // Scramble the live data, then restore it from the stream.
    for entity in &entities {
        world.set_component(*entity, Pos(-1.0, -1.0, -1.0));
        world.set_component(*entity, Health(999));
    }

    RawRead::reset(&mut buffer);
    load_components(&mut world, &mut buffer).unwrap();

    for (i, entity) in entities.iter().enumerate() {
        assert_eq!(
            world.get_component::<Pos>(*entity),
            Some(&Pos(i as f32, 0.0, 0.0))
        );
        assert_eq!(world.get_component::<Health>(*entity), Some(&Health(i as u32)));
    }
}

#[test]
fn non_trivial_components_are_rejected_by_serialization() {
    use cohort::serialize::{save_components, RawBuffer, SerializeError};

    let mut world = World::new();
    let entity = world.spawn();
    world.add_component(entity, vec![1u32, 2, 3]);

    let mut buffer = RawBuffer::new();
    match save_components(&world, &mut buffer) {
        Err(SerializeError::NonTrivial(_)) => {}
        other => panic!("expected NonTrivial error, got {:?}", other),
    }
}
