//! Criterion benchmarks for the per-frame trial work.
//!
//! Run with:
//!   cargo bench
//!
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use navtrial::config::{EngineConfig, SessionConfig};
use navtrial::events::{ContinuousRecord, DiscreteRecord};
use navtrial::input::{InputState, Key};
use navtrial::logger::{LogError, RecordSink};
use navtrial::schedule::alignment_wait;
use navtrial::{FrameTime, TrialEngine};

/// Drops every row so only the engine itself is measured.
struct NullSink;

impl RecordSink for NullSink {
    fn append_continuous(&mut self, row: &ContinuousRecord) -> Result<(), LogError> {
        black_box(row);
        Ok(())
    }

    fn append_discrete(&mut self, row: &DiscreteRecord) -> Result<(), LogError> {
        black_box(row);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), LogError> {
        Ok(())
    }
}

fn circling() -> InputState {
    InputState::idle()
        .with(Key::Forward)
        .with(Key::RotateRight)
}

/// Exploration ticks at 60 Hz while circling, for several cell sizes.
fn bench_explore_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("explore_tick");
    group.throughput(Throughput::Elements(1));

    for cell_size in [0.05f32, 0.1, 0.2].iter() {
        group.bench_with_input(
            BenchmarkId::new("cell_size", cell_size),
            cell_size,
            |b, &cell_size| {
                let mut cfg = EngineConfig::default();
                cfg.placement.cell_size = cell_size;
                let session = SessionConfig::default();
                let mut engine = match TrialEngine::new(&cfg, &session, 1, 5.0) {
                    Ok(engine) => engine,
                    Err(e) => panic!("bench config rejected: {e}"),
                };
                let input = circling();
                let mut sink = NullSink;
                let mut frame = 0u64;

                b.iter(|| {
                    frame += 1;
                    let t = frame as f64 / 60.0;
                    let now = FrameTime {
                        wall_clock: 1_700_000_000.0 + t,
                        trial_time: t,
                    };
                    let out = engine.tick(&input, now, &mut sink);
                    black_box(out.draw.len())
                });
            },
        );
    }

    group.finish();
}

fn bench_alignment(c: &mut Criterion) {
    c.bench_function("alignment_wait", |b| {
        let reference = 1_700_000_000.0;
        let mut now = reference;
        b.iter(|| {
            now += 0.37;
            black_box(alignment_wait(black_box(now), reference, 2.01))
        });
    });
}

criterion_group!(benches, bench_explore_tick, bench_alignment);
criterion_main!(benches);
