use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use framepipe::buffer::BufferPool;
use framepipe::sync::{Fetch, channel};
use std::hint::black_box;
use std::thread;

/// Sends `frames` buffers to a second thread and back, cycling a pool of `pool_size`.
fn round_trip(frames: u64, pool_size: usize, buffer_size: usize) {
    let pool = BufferPool::create("bench", pool_size, buffer_size).unwrap();
    let (fwd_tx, fwd_rx) = channel("forward");
    let (back_tx, back_rx) = channel("return");
    for buffer in pool.take_free(pool_size).unwrap() {
        back_tx.put(buffer).unwrap();
    }

    let consumer = thread::spawn(move || {
        let mut seen = 0u64;
        loop {
            match fwd_rx.get().unwrap() {
                Fetch::Item(buffer) => {
                    seen += 1;
                    back_tx.put(buffer).unwrap();
                }
                Fetch::Flushed | Fetch::Closed => break,
            }
        }
        back_tx.close();
        seen
    });

    for n in 0..frames {
        let Fetch::Item(mut buffer) = back_rx.get().unwrap() else {
            panic!("return channel ended early");
        };
        buffer.as_mut_slice()[0] = n as u8;
        buffer.set_bytes_used(buffer.capacity());
        fwd_tx.put(buffer).unwrap();
    }
    fwd_tx.close();

    let seen = consumer.join().unwrap();
    black_box(seen);
    while let Ok(Fetch::Item(buffer)) = back_rx.get() {
        pool.release(buffer).unwrap();
    }
    pool.destroy();
}

fn bench_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_handoff");
    const FRAMES: u64 = 1_000;
    group.throughput(Throughput::Elements(FRAMES));

    for pool_size in [1usize, 3, 9] {
        group.bench_with_input(
            BenchmarkId::new("pool", pool_size),
            &pool_size,
            |b, &pool_size| b.iter(|| round_trip(FRAMES, pool_size, 4096)),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_handoff);
criterion_main!(benches);
