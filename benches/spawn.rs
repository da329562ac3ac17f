use criterion::*;
use std::hint::black_box;

mod common;
use common::*;

fn spawn_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn");

    group.bench_function("create_batch_10k", |b| {
        b.iter_batched(
            make_world,
            |mut registry| {
                populate(&mut registry, AGENTS_SMALL);
                black_box(registry);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("create_one_by_one_10k", |b| {
        b.iter_batched(
            make_world,
            |mut registry| {
                for _ in 0..AGENTS_SMALL {
                    registry
                        .spawn((Position { x: 0.0, y: 0.0 }, Wealth { value: 100.0 }))
                        .unwrap();
                }
                black_box(registry);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("respawn_into_freed_slots_10k", |b| {
        b.iter_batched(
            || {
                let mut registry = make_world();
                let mut handles = Vec::with_capacity(AGENTS_SMALL as usize);
                registry
                    .create_entities(AGENTS_SMALL, |ptr| {
                        handles.push(ptr);
                        (Position { x: 0.0, y: 0.0 }, Wealth { value: 100.0 })
                    })
                    .unwrap();
                registry.destroy_batch(&handles);
                registry
            },
            |mut registry| {
                populate(&mut registry, AGENTS_SMALL);
                black_box(registry);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, spawn_benchmark);
criterion_main!(benches);
