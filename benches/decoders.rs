//! Benchmark suite for the frame decoders and message serialization.
//!
//! Isolates decoding and JSON encoding from async runtime overhead.

use ble_sensor_mqtt::decoder::{atc, inode};
use ble_sensor_mqtt::{MacAddress, Message, ServiceData, decode};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use time::OffsetDateTime;

const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

const ATC_FRAME: [u8; 15] = [27, 50, 60, 56, 193, 164, 4, 9, 139, 13, 168, 11, 87, 23, 4];

const INODE_FRAME: [u8; 24] = [
    16, 157, 1, 160, 8, 4, 232, 62, 158, 18, 61, 42, 21, 0, 250, 221, 164, 97, 151, 156, 40, 148,
    51, 248,
];

fn bench_decoders(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    let service_data = vec![ServiceData::new(atc::SERVICE_UUID, ATC_FRAME)];
    group.bench_function("atc", |b| {
        b.iter(|| atc::decode(black_box(&service_data)))
    });

    // ATC frame behind unrelated service data entries
    let crowded = vec![
        ServiceData::new(0xFEAA, [0u8; 20]),
        ServiceData::new(0x180F, [87]),
        ServiceData::new(atc::SERVICE_UUID, ATC_FRAME),
    ];
    group.bench_function("atc_crowded", |b| {
        b.iter(|| atc::decode(black_box(&crowded)))
    });

    group.bench_function("inode", |b| {
        b.iter(|| inode::decode(black_box(&INODE_FRAME)))
    });

    group.bench_function("registry_inode", |b| {
        b.iter(|| decode(black_box("inode"), black_box(&INODE_FRAME), &[]))
    });

    group.bench_function("registry_unknown_tag", |b| {
        b.iter(|| decode(black_box("ruuvi"), black_box(&INODE_FRAME), &[]))
    });

    group.finish();
}

fn bench_message_json(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_json");
    group.throughput(Throughput::Elements(1));

    let reading = match inode::decode(&INODE_FRAME) {
        Ok(reading) => reading,
        Err(e) => panic!("fixture does not decode: {e}"),
    };
    let at = OffsetDateTime::UNIX_EPOCH;

    group.bench_function("build_and_serialize", |b| {
        b.iter(|| {
            let message = Message::new(black_box(reading), "garage", TEST_MAC, -70, at);
            black_box(message.to_json())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_decoders, bench_message_json);
criterion_main!(benches);
