//! Codec benchmarks for chirp-protocol.

use bytes::BytesMut;
use chirp_protocol::{codec, Event};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn chat_payload(len: usize) -> String {
    format!(r#"{{"text":"{}","sender":"bench","id":"m-1","avatarRef":""}}"#, "x".repeat(len))
}

fn bench_encode_small(c: &mut Criterion) {
    let event = Event::message_received("m-1", chat_payload(64));

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("small_64B", |b| b.iter(|| codec::encode(black_box(&event))));
    group.finish();
}

fn bench_decode_small(c: &mut Criterion) {
    let event = Event::message_received("m-1", chat_payload(64));
    let encoded = codec::encode(&event).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("small_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_decode_stream(c: &mut Criterion) {
    let mut stream = BytesMut::new();
    for i in 0..100 {
        let event = Event::message_received(format!("m-{}", i), chat_payload(64));
        codec::encode_into(&event, &mut stream).unwrap();
    }
    let stream = stream.freeze();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(100));
    group.bench_function("stream_100x64B", |b| {
        b.iter(|| {
            let mut buf = BytesMut::from(&stream[..]);
            let mut decoded = 0;
            while let Ok(Some(event)) = codec::decode_from(&mut buf) {
                black_box(event);
                decoded += 1;
            }
            decoded
        })
    });
    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let event = Event::message_received("m-1", chat_payload(256));

    c.bench_function("roundtrip_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&event)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_small,
    bench_decode_small,
    bench_decode_stream,
    bench_roundtrip
);
criterion_main!(benches);
