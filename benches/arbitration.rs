//! Benchmarks for frame decoding and channel arbitration

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use homebase::{AckBuilder, Arbiter, FrameLayout, Packet};
use std::time::{Duration, Instant};

fn generate_frames(layout: &FrameLayout, count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let device = (i % 8) as u8 + 1;
            let packet = if i % 16 == 0 {
                Packet::request(device, 1)
            } else {
                Packet::data(device, 1, 2, (i % 5 == 0) as u8, b"21.5C")
            };
            layout
                .pad(packet)
                .and_then(|p| layout.encode(&p))
                .unwrap_or_default()
        })
        .collect()
}

fn bench_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("decoding");
    let layout = FrameLayout::default();
    let frames = generate_frames(&layout, 1000);

    group.throughput(Throughput::Elements(1000));
    group.bench_function("decode_1000_frames", |b| {
        b.iter(|| {
            for frame in &frames {
                black_box(layout.decode(frame).ok());
            }
        })
    });

    group.finish();
}

fn bench_arbitration(c: &mut Criterion) {
    let mut group = c.benchmark_group("arbitration");
    let layout = FrameLayout::default();
    let acks = AckBuilder::new(layout);
    let packets: Vec<Packet> = generate_frames(&layout, 1000)
        .iter()
        .filter_map(|f| layout.decode(f).ok())
        .collect();

    group.throughput(Throughput::Elements(packets.len() as u64));
    group.bench_function("step_and_ack_1000_packets", |b| {
        b.iter(|| {
            let mut arbiter = Arbiter::new(Duration::from_secs(30));
            let now = Instant::now();
            for packet in &packets {
                let step = arbiter.step(packet, now);
                black_box(step);
                black_box(acks.build(arbiter.state()));
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_decoding, bench_arbitration);
criterion_main!(benches);
