//! Ring buffer benchmark suite.
//!
//! Benchmarks the two bounded buffers on the hot path:
//! - Replay ring: sequenced push and handshake replay
//! - Console buffer: push under overflow and swap-out
//!
//! Run with: cargo bench --bench buffers
//! Results saved to: target/criterion/

use std::hint::black_box;

use browser_bridge::transport::ReplayBuffer;
use browser_bridge::{ConsoleMessage, ingest::LogBuffer};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::json;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const CAPACITIES: &[usize] = &[100, 1_000, 10_000];
const REPLAY_LIMIT: usize = 100;

fn console_message(n: usize) -> ConsoleMessage {
    ConsoleMessage::from_frame(
        &json!({"level": "log", "message": format!("message {n}")}),
        8851,
    )
    .expect("valid console frame")
}

// ============================================================================
// Benchmark: Replay Ring
// ============================================================================

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");

    for &capacity in CAPACITIES {
        group.bench_with_input(BenchmarkId::new("push", capacity), &capacity, |b, &cap| {
            let mut ring = ReplayBuffer::new(cap);
            b.iter(|| ring.push(black_box(json!({"type": "state"}))));
        });

        let mut ring = ReplayBuffer::new(capacity);
        for n in 0..capacity * 2 {
            ring.push(json!({"type": "state", "n": n}));
        }
        let last_seen = ring.current_sequence().saturating_sub(capacity as u64 / 2);

        group.bench_with_input(
            BenchmarkId::new("events_after", capacity),
            &last_seen,
            |b, &last| {
                b.iter(|| ring.events_after(black_box(last), REPLAY_LIMIT));
            },
        );
    }

    group.finish();
}

// ============================================================================
// Benchmark: Console Buffer
// ============================================================================

fn bench_console(c: &mut Criterion) {
    let mut group = c.benchmark_group("console");

    for &capacity in CAPACITIES {
        group.bench_with_input(
            BenchmarkId::new("push_overflow", capacity),
            &capacity,
            |b, &cap| {
                let mut buffer = LogBuffer::new(cap);
                for n in 0..cap {
                    buffer.push(console_message(n));
                }
                let message = console_message(cap);
                b.iter(|| buffer.push(black_box(message.clone())));
            },
        );

        group.bench_with_input(
            BenchmarkId::new("take_restore", capacity),
            &capacity,
            |b, &cap| {
                let mut buffer = LogBuffer::new(cap);
                for n in 0..cap {
                    buffer.push(console_message(n));
                }
                b.iter(|| {
                    let batch = buffer.take();
                    buffer.restore(black_box(batch))
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_replay, bench_console);
criterion_main!(benches);
