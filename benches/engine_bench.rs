use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::{Duration, Instant};

use tame::limiter::{gain, LimiterConfig, LimiterEngine};

fn bench_engine_step(c: &mut Criterion) {
    let config = LimiterConfig {
        dampening_max: 2.0,
        dampening_speed: Duration::from_secs(1),
        ..Default::default()
    };

    c.bench_function("engine step (loud, limiting)", |b| {
        let mut engine = LimiterEngine::new(config.clone());
        let t0 = Instant::now();
        let mut volume = 0.5;
        let mut tick: u64 = 0;
        b.iter(|| {
            tick += 1;
            volume = engine.step(black_box(0.8), volume, t0 + Duration::from_millis(tick * 20));
        })
    });

    c.bench_function("engine step (quiet, idle)", |b| {
        let mut engine = LimiterEngine::new(config.clone());
        let t0 = Instant::now();
        let mut tick: u64 = 0;
        b.iter(|| {
            tick += 1;
            engine.step(black_box(0.05), 0.5, t0 + Duration::from_millis(tick * 20))
        })
    });
}

fn bench_gain_math(c: &mut Criterion) {
    c.bench_function("limited_volume soft knee", |b| {
        b.iter(|| gain::limited_volume(black_box(0.44), 0.5, 0.2, 3.0, 1.5))
    });
}

criterion_group!(benches, bench_engine_step, bench_gain_math);
criterion_main!(benches);
