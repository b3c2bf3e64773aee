use cohort::prelude::*;
use std::collections::HashSet;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct C0(u32);
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct C1(u32);
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct C2(u32);
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct C3(u32);
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct C4(u32);
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct C5(u32);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Pos(f32, f32);
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Vel(f32, f32);
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
struct Zone(u32);
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
struct Biome(u32);

const BITS: u32 = 6;

fn add_by_bit(world: &mut World, entity: Entity, bit: u32) {
    match bit {
        0 => world.add_component(entity, C0::default()),
        1 => world.add_component(entity, C1::default()),
        2 => world.add_component(entity, C2::default()),
        3 => world.add_component(entity, C3::default()),
        4 => world.add_component(entity, C4::default()),
        5 => world.add_component(entity, C5::default()),
        _ => unreachable!(),
    }
}

fn build_query(world: &mut World, all: u32, any: u32, none: u32) -> Query {
    let mut builder = world.query();
    for bit in 0..BITS {
        let mask = 1 << bit;
        if all & mask != 0 {
            builder = match bit {
                0 => builder.with_all::<C0>(),
                1 => builder.with_all::<C1>(),
                2 => builder.with_all::<C2>(),
                3 => builder.with_all::<C3>(),
                4 => builder.with_all::<C4>(),
                _ => builder.with_all::<C5>(),
            };
        }
        if any & mask != 0 {
            builder = match bit {
                0 => builder.with_any::<C0>(),
                1 => builder.with_any::<C1>(),
                2 => builder.with_any::<C2>(),
                3 => builder.with_any::<C3>(),
                4 => builder.with_any::<C4>(),
                _ => builder.with_any::<C5>(),
            };
        }
        if none & mask != 0 {
            builder = match bit {
                0 => builder.with_none::<C0>(),
                1 => builder.with_none::<C1>(),
                2 => builder.with_none::<C2>(),
                3 => builder.with_none::<C3>(),
                4 => builder.with_none::<C4>(),
                _ => builder.with_none::<C5>(),
            };
        }
    }
    builder.build()
}

fn collect_entities(query: &mut Query, world: &World) -> HashSet<Entity> {
    let mut entities = HashSet::new();
    for chunk in query.iter_chunks(world) {
        entities.extend(chunk.entities().iter().copied());
    }
    entities
}

fn brute_force(mask: u32, all: u32, any: u32, none: u32) -> bool {
    mask & all == all && (any == 0 || mask & any != 0) && mask & none == 0
}

/// Minimal xorshift generator so the randomized comparison is deterministic.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

#[test]
fn matches_agree_with_brute_force_evaluation() {
    let mut world = World::new();
    let mut rng = Rng(0x9E37_79B9_7F4A_7C15);

    // Entities with random component subsets; remember each entity's mask.
    let entities: Vec<(Entity, u32)> = (0..200)
        .map(|_| {
            let mask = (rng.next() & ((1 << BITS) - 1)) as u32;
            let entity = world.spawn();
            for bit in 0..BITS {
                if mask & (1 << bit) != 0 {
                    add_by_bit(&mut world, entity, bit);
                }
            }
            (entity, mask)
        })
        .collect();

    // Random predicates, plus the degenerate empty query.
    let mut predicates: Vec<(u32, u32, u32)> = (0..40)
        .map(|_| {
            let all = (rng.next() & 0x3) as u32;
            let any = ((rng.next() >> 8) & 0xC) as u32;
            let none = ((rng.next() >> 16) & 0x30) as u32;
            (all, any, none)
        })
        .collect();
    predicates.push((0, 0, 0));

    for (all, any, none) in predicates {
        let mut query = build_query(&mut world, all, any, none);
        let matched = collect_entities(&mut query, &world);

        let expected: HashSet<Entity> = entities
            .iter()
            .filter(|(_, mask)| brute_force(*mask, all, any, none))
            .map(|(entity, _)| *entity)
            .collect();

        assert_eq!(
            matched, expected,
            "all={:#x} any={:#x} none={:#x}",
            all, any, none
        );
    }
}

#[test]
fn query_cache_extends_over_new_archetypes() {
    let mut world = World::new();

    let a = world.spawn();
    world.add_component(a, Pos::default());

    let mut query = world.query().with_all::<Pos>().build();
    assert_eq!(query.matched_archetypes(&world).len(), 1);

    // A new archetype created after the first evaluation must be picked up
    // by the next one.
    let b = world.spawn();
    world.add_component(b, Pos::default());
    world.add_component(b, Vel::default());

    assert_eq!(query.matched_archetypes(&world).len(), 2);
    let matched = collect_entities(&mut query, &world);
    assert!(matched.contains(&a));
    assert!(matched.contains(&b));

    // Re-running without structural changes yields identical results.
    let again = collect_entities(&mut query, &world);
    assert_eq!(matched, again);
}

#[test]
fn empty_match_set_is_a_no_op() {
    let mut world = World::new();
    let entity = world.spawn();
    world.add_component(entity, Pos::default());

    let mut query = world.query().with_all::<Vel>().build();
    assert_eq!(query.iter_chunks(&world).count(), 0);
    assert!(collect_entities(&mut query, &world).is_empty());
}

#[test]
fn chunk_level_predicates() {
    let mut world = World::new();

    let zoned = world.spawn();
    world.add_component(zoned, Pos::default());
    world.try_add_chunk_component(zoned, Zone(1)).unwrap();

    let biomed = world.spawn();
    world.add_component(biomed, Pos::default());
    world.try_add_chunk_component(biomed, Biome(2)).unwrap();

    let plain = world.spawn();
    world.add_component(plain, Pos::default());

    let mut with_zone = world
        .query()
        .with_all::<Pos>()
        .with_chunk_all::<Zone>()
        .build();
    assert_eq!(
        collect_entities(&mut with_zone, &world),
        [zoned].iter().copied().collect()
    );

    let mut without_zone = world
        .query()
        .with_all::<Pos>()
        .with_chunk_none::<Zone>()
        .build();
    assert_eq!(
        collect_entities(&mut without_zone, &world),
        [biomed, plain].iter().copied().collect()
    );

    let mut any_region = world
        .query()
        .with_all::<Pos>()
        .with_chunk_any::<Zone>()
        .with_chunk_any::<Biome>()
        .build();
    assert_eq!(
        collect_entities(&mut any_region, &world),
        [zoned, biomed].iter().copied().collect()
    );
}

#[test]
fn chunk_views_expose_columns() {
    let mut world = World::new();
    for i in 0..10 {
        let entity = world.spawn();
        world.add_component(entity, Pos(i as f32, 0.0));
        world.add_component(entity, Vel(1.0, 0.0));
    }

    let mut query = world.query().with_all::<Pos>().with_all::<Vel>().build();

    // Mutate through chunk views.
    query.for_each_chunk_mut(&mut world, |mut chunk| {
        let (positions, velocities) = chunk.component_slices_mut::<Pos, Vel>().unwrap();
        for (pos, vel) in positions.iter_mut().zip(velocities.iter()) {
            pos.0 += vel.0;
            pos.1 += vel.1;
        }
    });

    // Observe through read-only views.
    let mut total = 0.0;
    query.for_each_chunk(&world, |chunk| {
        let positions = chunk.component_slice::<Pos>().unwrap();
        assert_eq!(positions.len(), chunk.len());
        assert_eq!(chunk.entities().len(), chunk.len());
        total += positions.iter().map(|p| p.0).sum::<f32>();
    });

    // Each position gained 1.0: sum = (0+1) + (1+1) + ... + (9+1).
    assert_eq!(total, 55.0);
}

#[cfg(feature = "par-iter")]
#[test]
fn parallel_iteration_matches_serial() {
    use std::sync::atomic::{AtomicU64, Ordering};

    let mut world = World::new();
    for i in 0..3000u32 {
        let entity = world.spawn();
        world.add_component(entity, Pos(0.0, 0.0));
        world.add_component(entity, C0(i));
    }

    let mut query = world.query().with_all::<Pos>().with_all::<C0>().build();

    let mut serial = 0u64;
    query.for_each_chunk(&world, |chunk| {
        serial += chunk
            .component_slice::<C0>()
            .unwrap()
            .iter()
            .map(|c| u64::from(c.0))
            .sum::<u64>();
    });

    let parallel = AtomicU64::new(0);
    query.par_for_each_chunk(&world, |chunk| {
        let sum: u64 = chunk
            .component_slice::<C0>()
            .unwrap()
            .iter()
            .map(|c| u64::from(c.0))
            .sum();
        parallel.fetch_add(sum, Ordering::Relaxed);
    });

    assert_eq!(serial, parallel.load(Ordering::Relaxed));
}

#[cfg(feature = "par-iter")]
#[test]
fn parallel_mutation_touches_every_row_once() {
    let mut world = World::new();
    let entities: Vec<Entity> = (0..3000)
        .map(|_| {
            let entity = world.spawn();
            world.add_component(entity, C0(0));
            entity
        })
        .collect();

    let mut query = world.query().with_all::<C0>().build();
    query.par_for_each_chunk_mut(&mut world, |mut chunk| {
        for value in chunk.component_slice_mut::<C0>().unwrap() {
            value.0 += 1;
        }
    });

    for entity in entities {
        assert_eq!(world.get_component::<C0>(entity), Some(&C0(1)));
    }
}
