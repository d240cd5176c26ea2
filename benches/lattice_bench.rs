//! Benchmarks for lattice growth, collection, and stream hand-off.

use asr_lattice::config::LatticeConfig;
use asr_lattice::search::BpTable;
use asr_lattice::sync::SyncArray;
use asr_lattice::types::{Frame, LmState, Score, WordId};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Fill a table frame by frame with a sliding frontier, then read the best
/// path back out. Exercises entry, collection, renumbering, and read-out
/// together, the way a decoding loop does.
fn bench_table_decode_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("backpointer_table");
    let config = LatticeConfig::default();

    for beam in [8usize, 64, 256] {
        group.bench_with_input(BenchmarkId::new("decode_loop", beam), &beam, |b, &beam| {
            b.iter(|| {
                let table = BpTable::new(&config);
                let mut prev = None;
                for frame in 0..50i32 {
                    let frontier = Frame((frame - 2).max(0));
                    table.push_frame(frontier).unwrap();
                    let mut last = None;
                    for lane in 0..beam {
                        let id = table
                            .enter(
                                WordId(lane as i32),
                                prev,
                                Frame(frame),
                                Score(frame + lane as i32),
                                LmState::default(),
                            )
                            .unwrap();
                        last = Some(id);
                    }
                    prev = last;
                }
                table.finalize().unwrap();
                black_box(table.hyp(None).unwrap());
            });
        });
    }
    group.finish();
}

/// Append through the synchronized array while one reader keeps pace,
/// measuring the append/release/trim cycle.
fn bench_sync_array_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_array");

    for window in [64usize, 1024] {
        group.bench_with_input(
            BenchmarkId::new("append_release", window),
            &window,
            |b, &window| {
                b.iter(|| {
                    let array = SyncArray::new(window);
                    let mut reader = array.reader().unwrap();
                    for value in 0..4096usize {
                        let index = array.append(black_box(value)).unwrap();
                        if index % window == window - 1 {
                            reader.release(index + 1);
                        }
                    }
                    black_box(array.stats().base_index)
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_table_decode_loop, bench_sync_array_stream);
criterion_main!(benches);
