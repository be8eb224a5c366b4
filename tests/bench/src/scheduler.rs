use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shared::message::StreamId;
use std::sync::Arc;
use tidewater_core::buffer::{BufferedRecord, StreamBufferStore};
use tidewater_core::checkpoint::CheckpointId;
use tidewater_core::clock::SystemClock;
use tidewater_core::flush::{FlushScheduler, FlushThresholdPolicy, FlushWorkerRegistry};

const RECORD_BYTES: u64 = 512;

fn loaded_store(streams: usize, records_per_stream: usize) -> Arc<StreamBufferStore> {
  let store = Arc::new(StreamBufferStore::new(u64::MAX, Arc::new(SystemClock)));
  for s in 0..streams {
    let stream = StreamId::new("bench", format!("stream_{s}"));
    store.add_reservation(&stream, RECORD_BYTES * records_per_stream as u64);
    for _ in 0..records_per_stream {
      let record = BufferedRecord::new(
        Bytes::from_static(b"{\"id\":1}"),
        RECORD_BYTES,
        None,
        CheckpointId::new(0),
      );
      if store.enqueue(&stream, record).is_err() {
        panic!("reservation too small");
      }
    }
  }
  store
}

fn benchmark_next_stream(c: &mut Criterion) {
  let mut group = c.benchmark_group("scheduler");
  group.throughput(Throughput::Elements(1));

  for streams in [10usize, 100, 1000] {
    let store = loaded_store(streams, 16);
    let workers = Arc::new(FlushWorkerRegistry::new());
    let scheduler = FlushScheduler::new(
      store,
      workers,
      FlushThresholdPolicy::default(),
      Arc::new(SystemClock),
    );
    // Every stream stays eligible so each pass walks the full ordering.
    scheduler.set_closing();

    group.bench_with_input(BenchmarkId::new("next_stream_to_flush", streams), &scheduler, |b, s| {
      b.iter(|| black_box(s.next_stream_to_flush()))
    });
  }

  group.finish();
}

fn benchmark_worker_tracking(c: &mut Criterion) {
  let mut group = c.benchmark_group("flush_workers");
  group.throughput(Throughput::Elements(1));

  let registry = FlushWorkerRegistry::new();
  let stream = StreamId::new("bench", "users");

  group.bench_function("track_register_complete", |b| {
    b.iter(|| {
      let worker = registry.next_worker_id();
      registry.track_flush_worker(&stream, worker);
      registry.register_batch_size(&stream, worker, black_box(4096)).ok();
      registry.complete_flush_worker(&stream, worker).ok();
    })
  });

  group.finish();
}

criterion_group!(benches, benchmark_next_stream, benchmark_worker_tracking);
criterion_main!(benches);
