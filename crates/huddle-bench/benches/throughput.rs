//! Throughput benchmarks for Huddle.
//!
//! These benchmarks measure the raw throughput of the registry, the
//! dispatcher and message ingestion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use huddle_bench::{drain, populate, user_ids, NullStore, BENCH_OUTBOX_CAPACITY};
use huddle_core::{ConnectionHandle, ConnectionRegistry, EventDispatcher, Hub};
use huddle_protocol::{ClientFrame, Event, UserProfile};
use std::sync::Arc;

/// Benchmark registry operations.
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    group.bench_function("register_unregister", |b| {
        let registry = ConnectionRegistry::new();
        let (handle, _outbox) =
            ConnectionHandle::new(UserProfile::new("alice", "Alice"), BENCH_OUTBOX_CAPACITY);
        b.iter(|| {
            registry.register(black_box(handle.clone()));
            registry.unregister(black_box(&handle))
        });
    });

    for size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("resolve", size), size, |b, &size| {
            let registry = ConnectionRegistry::new();
            let (users, _outboxes) = populate(&registry, size, 2);
            b.iter(|| registry.resolve(black_box(&users)));
        });
    }

    group.finish();
}

/// Benchmark fan-out to many users.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    for size in [10, 100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let registry = Arc::new(ConnectionRegistry::new());
            let (users, mut outboxes) = populate(&registry, size, 1);
            let dispatcher = EventDispatcher::new(registry);

            b.iter(|| {
                let report = dispatcher.broadcast(black_box(&users), Event::message_alert("bench"));
                drain(&mut outboxes);
                report
            });
        });
    }

    group.finish();
}

/// Benchmark fan-out to absent users, the common case for large chats.
fn bench_gap(c: &mut Criterion) {
    let mut group = c.benchmark_group("gap");

    group.bench_function("1000_offline", |b| {
        let dispatcher = EventDispatcher::new(Arc::new(ConnectionRegistry::new()));
        let users = user_ids(1000);
        b.iter(|| dispatcher.broadcast(black_box(&users), Event::typing_start("bench")));
    });

    group.finish();
}

/// Benchmark the message ingestion path.
fn bench_ingest(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let _guard = runtime.enter();

    let mut group = c.benchmark_group("ingest");

    for size in [2, 50, 500].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let hub = Hub::new(Arc::new(NullStore));
            let (users, mut outboxes) = populate(hub.registry(), size, 1);
            let (sender, _outbox) =
                ConnectionHandle::new(UserProfile::new("sender", "Sender"), BENCH_OUTBOX_CAPACITY);

            b.iter(|| {
                let frame = ClientFrame::new_message("bench", users.clone(), "hello");
                hub.handle_frame(&sender, black_box(frame));
                drain(&mut outboxes);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_registry, bench_fanout, bench_gap, bench_ingest);
criterion_main!(benches);
