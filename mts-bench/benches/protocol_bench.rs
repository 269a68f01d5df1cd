//! Protocol encoding/decoding benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mts_client::Dispatcher;
use mts_protocol::frame::Frame;
use mts_protocol::{Decoder, Encoder, Envelope, OplPayload, Route};

fn create_opl_envelope(payload_size: usize) -> Envelope {
    let opl = OplPayload::new("0101", vec![0x42; payload_size]).with_proxy("AA:BB:CC:DD:EE:FF");
    Envelope::request(Route::Opl, 2, 1, 0, serde_json::to_vec(&opl).unwrap())
        .with_jwt("eyJhbGciOiJIUzI1NiJ9.bench")
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [100, 1000, 10000] {
        let frame = Frame::new(Bytes::from("x".repeat(size)));

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for size in [100, 1000, 10000] {
        let encoded = Frame::new(Bytes::from("x".repeat(size))).encode().unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut buf = encoded.clone();
                black_box(Frame::decode(&mut buf).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_envelope_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_encode");

    for size in [100, 1000, 10000] {
        let envelope = create_opl_envelope(size);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &envelope, |b, envelope| {
            b.iter(|| black_box(Encoder::encode_envelope(envelope).unwrap()));
        });
    }

    group.finish();
}

fn bench_decoder_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("decoder_reassembly");

    for chunk in [1, 64, 1024] {
        let encoded = Encoder::encode_envelope(&create_opl_envelope(1000)).unwrap();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &encoded, |b, encoded| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                let mut decoded = None;
                for piece in encoded.chunks(chunk) {
                    decoder.extend(piece);
                    if let Some(envelope) = decoder.decode_envelope().unwrap() {
                        decoded = Some(envelope);
                    }
                }
                black_box(decoded)
            });
        });
    }

    group.finish();
}

fn bench_ping_dispatch(c: &mut Criterion) {
    let ping = Envelope::request(Route::RmsPing, 1, 2, 7, vec![]).with_jwt("token");
    let raw = serde_json::to_vec(&ping).unwrap();

    c.bench_function("ping_dispatch", |b| {
        b.iter(|| black_box(Dispatcher::dispatch_frame(&raw).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_envelope_encode,
    bench_decoder_reassembly,
    bench_ping_dispatch,
);

criterion_main!(benches);
