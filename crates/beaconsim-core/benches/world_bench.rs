use beaconsim_core::{SimulationConfig, World};
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use std::time::Duration;

fn bench_world_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_step");
    group.sample_size(
        std::env::var("BEACONSIM_BENCH_SAMPLES")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(30),
    );
    group.warm_up_time(Duration::from_secs(2));
    group.measurement_time(Duration::from_secs(5));

    let steps: usize = std::env::var("BEACONSIM_BENCH_STEPS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256);
    let fleet_sizes: Vec<usize> = std::env::var("BEACONSIM_BENCH_SCANNERS")
        .ok()
        .map(|s| {
            s.split(',')
                .filter_map(|t| t.trim().parse::<usize>().ok())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec![10, 25, 50]);

    for &scanners in &fleet_sizes {
        group.bench_function(format!("steps{steps}_scanners{scanners}"), |b| {
            b.iter_batched(
                || {
                    let config = SimulationConfig {
                        scanner_count: scanners,
                        max_speed: 2.0,
                        rng_seed: Some(0xBEEF),
                        ..SimulationConfig::default()
                    };
                    World::new(config).expect("world")
                },
                |mut world| {
                    for _ in 0..steps {
                        world.step();
                    }
                    world
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_world_steps);
criterion_main!(benches);
