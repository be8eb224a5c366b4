use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use shared::message::StreamId;
use std::sync::Arc;
use tidewater_core::buffer::{BufferedRecord, StreamBufferStore};
use tidewater_core::checkpoint::CheckpointId;
use tidewater_core::clock::SystemClock;
use tidewater_core::memory::MemoryBudget;

const BATCH: usize = 1024;
const RECORD_BYTES: u64 = 256;

fn record() -> BufferedRecord {
  BufferedRecord::new(
    Bytes::from_static(b"{\"id\":1,\"name\":\"ada\"}"),
    RECORD_BYTES,
    None,
    CheckpointId::new(1),
  )
}

fn benchmark_enqueue_dequeue(c: &mut Criterion) {
  let mut group = c.benchmark_group("buffer");
  group.throughput(Throughput::Elements(BATCH as u64));

  let store = StreamBufferStore::new(u64::MAX, Arc::new(SystemClock));
  let stream = StreamId::new("bench", "users");

  group.bench_function("enqueue_then_drain", |b| {
    b.iter(|| {
      store.add_reservation(&stream, RECORD_BYTES * BATCH as u64);
      for _ in 0..BATCH {
        if store.enqueue(&stream, record()).is_err() {
          panic!("reservation too small");
        }
      }
      let batch = store.dequeue_up_to(&stream, u64::MAX);
      black_box(batch.checkpoint_counts());
    })
  });

  group.finish();
}

fn benchmark_budget(c: &mut Criterion) {
  let mut group = c.benchmark_group("memory_budget");
  group.throughput(Throughput::Elements(1));

  let budget = MemoryBudget::new(1024 * 1024 * 1024, 1024 * 1024);
  group.bench_function("request_free", |b| {
    b.iter(|| {
      let granted = budget.request_memory();
      budget.free(black_box(granted));
    })
  });

  group.finish();
}

criterion_group!(benches, benchmark_enqueue_dequeue, benchmark_budget);
criterion_main!(benches);
