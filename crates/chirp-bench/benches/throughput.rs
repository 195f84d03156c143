//! Throughput benchmarks for Chirp.
//!
//! These benchmarks measure the raw event throughput of the codec, the
//! history buffer and the broadcast path.

use bytes::Bytes;
use chirp_core::{broadcast, ChatHub, ConnectionRegistry, HubConfig, Message, MessageHistory};
use chirp_protocol::{codec, Event};
use chirp_transport::{SubscriberChannel, TransportError};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

/// Accepts and drops every frame, so buffers never fill up.
struct DiscardChannel;

impl SubscriberChannel for DiscardChannel {
    fn push(&self, frame: Bytes) -> Result<(), TransportError> {
        black_box(frame);
        Ok(())
    }

    fn close(&self) {}

    fn is_open(&self) -> bool {
        true
    }
}

fn quiet_hub(subscribers: usize) -> ChatHub {
    let hub = ChatHub::with_config(HubConfig {
        announce_active_clients: false,
        max_subscribers: subscribers.max(1),
        ..HubConfig::default()
    });
    for _ in 0..subscribers {
        hub.subscribe(Arc::new(DiscardChannel)).unwrap();
    }
    hub
}

fn payload_event(size: usize) -> Event {
    let message = Message::new("x".repeat(size), "bench").with_avatar("/avatar.png");
    message.to_event().unwrap()
}

/// Benchmark event encoding.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for (name, size) in [("64B", 64), ("1KB", 1024), ("64KB", 65536)] {
        let event = payload_event(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(name, |b| b.iter(|| codec::encode(black_box(&event))));
    }

    group.finish();
}

/// Benchmark event decoding.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for (name, size) in [("64B", 64), ("1KB", 1024), ("64KB", 65536)] {
        let encoded = codec::encode(&payload_event(size)).unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_function(name, |b| b.iter(|| codec::decode(black_box(&encoded))));
    }

    group.finish();
}

/// Benchmark the bounded history buffer once it is full.
fn bench_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("history");

    group.bench_function("append_full", |b| {
        let mut history = MessageHistory::new(50);
        let message = Message::new("hello", "bench");
        for _ in 0..50 {
            history.append(message.clone());
        }

        b.iter(|| history.append(black_box(message.clone())));
    });

    group.bench_function("snapshot_50", |b| {
        let mut history = MessageHistory::new(50);
        for i in 0..50 {
            history.append(Message::new(format!("msg-{}", i), "bench"));
        }

        b.iter(|| history.snapshot());
    });

    group.finish();
}

/// Benchmark registry operations.
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    group.bench_function("register_unregister", |b| {
        let registry = ConnectionRegistry::new();
        b.iter(|| {
            let id = registry.register(Arc::new(DiscardChannel));
            registry.unregister(black_box(&id))
        });
    });

    group.finish();
}

/// Benchmark a full post (store and fan out) against growing audiences.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    for size in [10, 100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("post", size), size, |b, &size| {
            let hub = quiet_hub(size);
            b.iter(|| hub.post(black_box("hello"), "bench", None).unwrap());
        });
    }

    for size in [100, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("raw", size), size, |b, &size| {
            let registry = ConnectionRegistry::new();
            for _ in 0..size {
                registry.register(Arc::new(DiscardChannel));
            }
            let frame = codec::encode(&payload_event(64)).unwrap();

            b.iter(|| broadcast::fan_out(&registry, black_box(&frame)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode,
    bench_history,
    bench_registry,
    bench_fanout,
);
criterion_main!(benches);
