use swarm_ecs::prelude::*;
use swarm_ecs::{BatchCallback, BatchContext, ErasedPtr};

#[derive(Clone, Copy, Debug, PartialEq)]
struct Position {
    x: i32,
    y: i32,
}

impl Component for Position {
    const ID: ComponentId = 101;
    const FREQUENCY: Frequency = Frequency::Freq3;
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Health {
    current: f64,
    max: f64,
}

impl Component for Health {
    const ID: ComponentId = 303;
    const FREQUENCY: Frequency = Frequency::Freq5;
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Marker;

impl Component for Marker {
    const ID: ComponentId = 1003;
    const FREQUENCY: Frequency = Frequency::Frequent;
}

const COUNTS: [u32; 7] = [1, 2, 10, 100, 200, 1000, 30_000];

fn world() -> Registry {
    let mut registry = Registry::new();
    registry.define_component::<Position>().unwrap();
    registry.define_component::<Health>().unwrap();
    registry.define_component::<Marker>().unwrap();
    registry
}

fn count_matching<Q: swarm_ecs::QueryTuple>(registry: &mut Registry) -> u32 {
    let mut visited = 0;
    registry
        .run_system::<Q, _>(0, |ctx, _| visited += ctx.len() as u32)
        .unwrap();
    visited
}

#[test]
fn define_component_rejects_duplicates() {
    let mut registry = world();
    assert!(matches!(
        registry.define_component::<Position>(),
        Err(EcsError::AlreadyDefined { id: 101 })
    ));
    // The original arena is untouched.
    let entity = registry.spawn(Position { x: 1, y: 2 }).unwrap();
    assert_eq!(
        registry.get_component::<Position>(entity),
        Some(&Position { x: 1, y: 2 })
    );
}

#[test]
fn system_iteration_counts() {
    let mut registry = world();
    let mut pairs = 0;
    let mut markers = 0;
    let mut mixed = 0;
    for count in COUNTS {
        registry
            .create_entities(count, |_| (Position { x: 0, y: 0 }, Health { current: 1.0, max: 1.0 }))
            .unwrap();
        pairs += count;
        registry.create_entities(count, |_| Marker).unwrap();
        markers += count;
        registry
            .create_entities(count, |_| (Position { x: 1, y: 1 }, Marker))
            .unwrap();
        mixed += count;

        assert_eq!(count_matching::<(Position,)>(&mut registry), pairs + mixed);
        assert_eq!(
            count_matching::<(Position, Health)>(&mut registry),
            pairs
        );
        assert_eq!(count_matching::<(Marker,)>(&mut registry), markers + mixed);
        assert_eq!(
            count_matching::<(Position, Marker)>(&mut registry),
            mixed
        );
        assert_eq!(registry.alive_count(), pairs + markers + mixed);
    }
}

#[test]
fn batch_create_delivers_pointers_in_declaration_order() {
    let mut registry = world();
    let mut previous = 0;
    for count in COUNTS {
        let mut issued = 0;
        registry
            .create_entities(count, |_| {
                issued += 1;
                (
                    Health {
                        current: f64::from(issued * 3),
                        max: f64::from(issued * 4),
                    },
                    Position {
                        x: issued as i32,
                        y: issued as i32 * 2,
                    },
                )
            })
            .unwrap();
        assert_eq!(issued, count);
        assert_eq!(
            count_matching::<(Position, Health)>(&mut registry),
            previous + count
        );
        previous += count;
    }

    let mut checked = 0;
    registry
        .for_each::<(Position, Health), _>(0, |_, (position, health)| {
            assert_eq!(position.y, position.x * 2);
            assert_eq!(health.max, health.current / 3.0 * 4.0);
            checked += 1;
        })
        .unwrap();
    assert_eq!(checked, previous);
}

#[test]
fn batches_respect_chunk_boundaries() {
    let mut registry = world();
    registry
        .create_entities(1000, |_| Position { x: 0, y: 0 })
        .unwrap();

    let chunk_capacity = Frequency::Freq3.chunk_capacity();
    let mut total = 0u32;
    registry
        .run_system::<(Position,), _>(0, |ctx, (positions,)| {
            assert_eq!(ctx.len(), positions.len());
            assert!(positions.len() as u32 <= chunk_capacity);
            total += positions.len() as u32;
        })
        .unwrap();
    assert_eq!(total, 1000);
}

#[test]
fn spawn_extend_and_values() {
    let mut registry = world();
    let entity = registry
        .spawn((Position { x: 7, y: 9 }, Health { current: 3.0, max: 8.0 }))
        .unwrap();
    assert_eq!(
        registry.get_component::<Position>(entity),
        Some(&Position { x: 7, y: 9 })
    );
    assert_eq!(
        registry.get_component::<Health>(entity),
        Some(&Health { current: 3.0, max: 8.0 })
    );

    let bundles: Vec<(Position, Health)> = (0..100)
        .map(|i| {
            (
                Position { x: i, y: -i },
                Health {
                    current: f64::from(i),
                    max: 100.0,
                },
            )
        })
        .collect();
    registry.extend(bundles).unwrap();
    assert_eq!(registry.alive_count(), 101);

    let mut seen = 0;
    registry
        .for_each::<(Position,), _>(0, |_, (position,)| {
            if position.x >= 0 {
                seen += 1;
            }
        })
        .unwrap();
    assert_eq!(seen, 101);
}

#[test]
fn destroy_invalidates_and_reuses_slot() {
    let mut registry = world();
    let pair = (Position { x: 0, y: 0 }, Health { current: 1.0, max: 1.0 });
    let e0 = registry.spawn(pair).unwrap();
    let e1 = registry.spawn(pair).unwrap();
    let e2 = registry.spawn(pair).unwrap();

    assert!(registry.deref(e1).is_some());
    assert!(registry.destroy(e1));
    assert!(registry.deref(e1).is_none());
    assert!(!registry.destroy(e1));

    let e1b = registry.spawn(pair).unwrap();
    assert!(registry.deref(e1).is_none());
    assert!(registry.deref(e1b).is_some());
    assert_eq!(e1b.index, e1.index);
    assert_ne!(e1b.generation, e1.generation);

    let mut order = Vec::new();
    registry
        .for_each::<(Position, Health), _>(0, |ptr, _| order.push(ptr.index))
        .unwrap();
    assert_eq!(order, vec![e0.index, e1b.index, e2.index]);
}

#[test]
fn destroy_batch_tolerates_stale_and_duplicate_handles() {
    let mut registry = world();
    let mut handles = Vec::new();
    registry
        .create_entities(10, |ptr| {
            handles.push(ptr);
            (Position { x: 0, y: 0 }, Health { current: 1.0, max: 1.0 })
        })
        .unwrap();

    let mut doomed = handles[3..8].to_vec();
    doomed.push(handles[5]); // duplicate
    doomed.push(EntityPtr {
        generation: 999,
        index: 0,
    }); // stale
    assert_eq!(registry.destroy_batch(&doomed), 5);
    assert_eq!(registry.alive_count(), 5);
    assert_eq!(count_matching::<(Position, Health)>(&mut registry), 5);
}

#[test]
fn add_remove_get_component() {
    let mut registry = world();
    let entity = registry.spawn(Position { x: 1, y: 2 }).unwrap();

    assert!(registry.get_component::<Health>(entity).is_none());
    let health = registry
        .add_component(entity, Health { current: 5.0, max: 10.0 })
        .unwrap();
    health.current = 6.0;
    assert_eq!(
        registry.get_component::<Health>(entity),
        Some(&Health { current: 6.0, max: 10.0 })
    );
    assert!(matches!(
        registry.add_component(entity, Health { current: 0.0, max: 0.0 }),
        Err(EcsError::AlreadyPresent { id: 303 })
    ));
    assert_eq!(count_matching::<(Position, Health)>(&mut registry), 1);

    registry.remove_component::<Health>(entity).unwrap();
    assert!(registry.get_component::<Health>(entity).is_none());
    assert!(matches!(
        registry.remove_component::<Health>(entity),
        Err(EcsError::NotPresent { id: 303 })
    ));
    assert_eq!(count_matching::<(Position, Health)>(&mut registry), 0);
    assert_eq!(count_matching::<(Position,)>(&mut registry), 1);

    let replaced = registry
        .get_component_mut::<Position>(entity)
        .unwrap();
    replaced.x = 42;
    assert_eq!(
        registry.get_component::<Position>(entity),
        Some(&Position { x: 42, y: 2 })
    );
}

#[test]
fn stale_handles_fail_every_operation() {
    let mut registry = world();
    let entity = registry.spawn(Position { x: 0, y: 0 }).unwrap();
    assert!(registry.destroy(entity));

    assert!(registry.deref(entity).is_none());
    assert!(registry.get_component::<Position>(entity).is_none());
    assert!(matches!(
        registry.add_component(entity, Health { current: 0.0, max: 0.0 }),
        Err(EcsError::StaleHandle)
    ));
    assert!(matches!(
        registry.remove_component::<Position>(entity),
        Err(EcsError::StaleHandle)
    ));
}

#[test]
fn undefined_component_is_reported() {
    #[derive(Clone, Copy)]
    struct Unregistered(#[allow(dead_code)] u8);
    impl Component for Unregistered {
        const ID: ComponentId = 77;
    }

    let mut registry = world();
    assert!(matches!(
        registry.create_entities(1, |_| Unregistered(0)),
        Err(EcsError::NotDefined { id: 77 })
    ));
    let entity = registry.spawn(Position { x: 0, y: 0 }).unwrap();
    assert!(matches!(
        registry.add_component(entity, Unregistered(0)),
        Err(EcsError::NotDefined { id: 77 })
    ));
    assert!(matches!(
        registry.for_each::<(Unregistered,), _>(0, |_, _| {}),
        Err(EcsError::NotDefined { id: 77 })
    ));

    let list = ComponentsList::new(&[Position::ID, 77]).unwrap();
    assert!(!registry.check_components(&list));
    let list = ComponentsList::new(&[Position::ID, Health::ID]).unwrap();
    assert!(registry.check_components(&list));
}

#[test]
fn cleanup_reclaims_emptied_chunks() {
    let mut registry = world();
    let entity = registry
        .spawn((Position { x: 0, y: 0 }, Health { current: 1.0, max: 1.0 }))
        .unwrap();

    let job = registry.prepare_cleanup();
    assert!(job.is_empty());
    assert!(!registry.cleanup_pending());
    registry.cleanup(job);

    registry.remove_component::<Position>(entity).unwrap();
    assert!(registry.cleanup_pending());
    let job = registry.prepare_cleanup();
    assert_eq!(job.len(), 1);
    registry.cleanup(job);
    assert!(!registry.cleanup_pending());

    // The slot is reusable after reclamation.
    registry
        .add_component(entity, Position { x: 3, y: 4 })
        .unwrap();
    assert_eq!(
        registry.get_component::<Position>(entity),
        Some(&Position { x: 3, y: 4 })
    );
}

#[test]
fn destroy_marks_cleanup_pending() {
    let mut registry = world();
    let entity = registry
        .spawn((Position { x: 0, y: 0 }, Health { current: 1.0, max: 1.0 }))
        .unwrap();
    assert!(registry.destroy(entity));
    assert!(registry.cleanup_pending());
    let job = registry.prepare_cleanup();
    assert_eq!(job.len(), 2);
    registry.cleanup(job);
}

#[test]
fn flags_filter_system_visits() {
    let mut registry = world();
    let flagged = registry.spawn(Position { x: 1, y: 0 }).unwrap();
    let _plain = registry.spawn(Position { x: 2, y: 0 }).unwrap();

    registry.deref_mut(flagged).unwrap().set_flags(0b01);

    let mut visited = Vec::new();
    registry
        .for_each::<(Position,), _>(0b01, |ptr, _| visited.push(ptr))
        .unwrap();
    assert_eq!(visited, vec![flagged]);

    let mut all = 0;
    registry
        .for_each::<(Position,), _>(0, |_, _| all += 1)
        .unwrap();
    assert_eq!(all, 2);

    // Flags are also readable and writable from inside a batch.
    registry
        .run_system::<(Position,), _>(0, |ctx, _| {
            for offset in 0..ctx.len() {
                let flags = ctx.records()[offset].flags();
                ctx.record_mut(offset).set_flags(flags | 0b10);
            }
        })
        .unwrap();
    let mut both = 0;
    registry
        .for_each::<(Position,), _>(0b10, |_, _| both += 1)
        .unwrap();
    assert_eq!(both, 2);
}

#[test]
fn add_component_restores_mask_on_group_overflow() {
    #[derive(Clone, Copy)]
    struct G0;
    #[derive(Clone, Copy)]
    struct G1;
    #[derive(Clone, Copy)]
    struct G2;
    #[derive(Clone, Copy)]
    struct G3;
    #[derive(Clone, Copy)]
    struct G4;
    impl Component for G0 {
        const ID: ComponentId = 1;
        const FREQUENCY: Frequency = Frequency::Rare;
    }
    impl Component for G1 {
        const ID: ComponentId = 33;
        const FREQUENCY: Frequency = Frequency::Rare;
    }
    impl Component for G2 {
        const ID: ComponentId = 65;
        const FREQUENCY: Frequency = Frequency::Rare;
    }
    impl Component for G3 {
        const ID: ComponentId = 97;
        const FREQUENCY: Frequency = Frequency::Rare;
    }
    impl Component for G4 {
        const ID: ComponentId = 129;
        const FREQUENCY: Frequency = Frequency::Rare;
    }

    let mut registry = Registry::new();
    registry.define_component::<G0>().unwrap();
    registry.define_component::<G1>().unwrap();
    registry.define_component::<G2>().unwrap();
    registry.define_component::<G3>().unwrap();
    registry.define_component::<G4>().unwrap();

    let entity = registry.spawn((G0, G1, G2, G3)).unwrap();
    let dict_before = registry.deref(entity).unwrap().dict();
    assert!(matches!(
        registry.add_component(entity, G4),
        Err(EcsError::CapacityExceeded(_))
    ));
    assert_eq!(registry.deref(entity).unwrap().dict(), dict_before);
}

#[test]
fn raw_system_over_empty_list_visits_nothing() {
    struct CountInvocations(u32);
    impl BatchCallback for CountInvocations {
        fn invoke(&mut self, _ctx: &mut BatchContext<'_>, _ptrs: &[ErasedPtr], _count: u32) {
            self.0 += 1;
        }
    }

    let mut registry = world();
    registry
        .create_entities(10, |_| Position { x: 0, y: 0 })
        .unwrap();
    let list = ComponentsList::new(&[]).unwrap();
    let mut callback = CountInvocations(0);
    registry.run_system_raw(&list, 0, &mut callback).unwrap();
    assert_eq!(callback.0, 0);
}

#[test]
fn system_step_is_resumable() {
    let mut registry = world();
    registry
        .create_entities(5, |_| Position { x: 0, y: 0 })
        .unwrap();
    registry.create_entities(3, |_| Marker).unwrap();
    registry
        .create_entities(4, |_| (Position { x: 0, y: 0 }, Marker))
        .unwrap();

    struct CountEntities(u32);
    impl BatchCallback for CountEntities {
        fn invoke(&mut self, _ctx: &mut BatchContext<'_>, _ptrs: &[ErasedPtr], count: u32) {
            self.0 += count;
        }
    }

    let list = ComponentsList::new(&[Position::ID]).unwrap();
    let mut step = registry.begin_system(list, 0).unwrap();
    let mut callback = CountEntities(0);
    let mut rounds = 0;
    while registry.system_step(&mut step, &mut callback) {
        rounds += 1;
    }
    assert_eq!(callback.0, 9);
    assert!(rounds >= 1);

    // A drained step stays drained.
    assert!(!registry.system_step(&mut step, &mut callback));
    assert_eq!(callback.0, 9);

    step.rewind();
    let mut callback = CountEntities(0);
    while registry.system_step(&mut step, &mut callback) {}
    assert_eq!(callback.0, 9);
}

#[test]
fn zero_count_create_is_a_no_op() {
    let mut registry = world();
    registry
        .create_entities(0, |_| Position { x: 0, y: 0 })
        .unwrap();
    assert_eq!(registry.alive_count(), 0);
    assert_eq!(registry.table_len(), 0);
}
