//! Criterion benchmarks for the radar frame codec.
//!
//! Measures the cost of cutting frames out of a buffer and decoding their
//! protobuf payloads for the message shapes that dominate device traffic.
//!
//! Run with:
//! ```bash
//! cargo bench --package radar-core --bench frame_bench
//! ```

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use radar_core::protocol::frame::{decode_frame, encode_frame, DEFAULT_MAX_FRAME_LEN};
use radar_core::protocol::payloads::{
    BreathHeartRate, CommonMessage, PropertyItem, PropertyItems, TargetPosition, TrajectoryFrame,
};
use radar_core::DeviceMessage;

// ── Message fixtures ──────────────────────────────────────────────────────────

fn make_heartbeat() -> DeviceMessage {
    DeviceMessage::HeartbeatRequest(CommonMessage { seq: 7 })
}

fn make_vitals() -> DeviceMessage {
    DeviceMessage::BreathHeartRate(BreathHeartRate {
        breath_rate: 15.0,
        heart_rate: 64.0,
        timestamp: 1_700_000_000_000,
    })
}

fn make_trajectory() -> DeviceMessage {
    DeviceMessage::Trajectory(TrajectoryFrame {
        targets: (0..8)
            .map(|id| TargetPosition {
                id,
                x: id as f32 * 0.3,
                y: 1.5,
                z: 0.9,
            })
            .collect(),
        timestamp: 1_700_000_000_000,
    })
}

fn make_properties() -> DeviceMessage {
    DeviceMessage::Properties(PropertyItems {
        properties: (0..20)
            .map(|i| PropertyItem {
                key: format!("property_{i}"),
                value: format!("{{{i},{i},{i}}}"),
            })
            .collect(),
    })
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_frame_and_payload");
    let fixtures = [
        ("heartbeat", make_heartbeat()),
        ("vitals", make_vitals()),
        ("trajectory", make_trajectory()),
        ("properties", make_properties()),
    ];

    for (name, msg) in fixtures {
        let bytes = encode_frame(msg.message_type().tag(), &msg.encode_payload());
        group.bench_with_input(BenchmarkId::from_parameter(name), &bytes, |b, bytes| {
            b.iter(|| {
                let mut buf = BytesMut::from(&bytes[..]);
                let frame = decode_frame(&mut buf, DEFAULT_MAX_FRAME_LEN)
                    .unwrap()
                    .unwrap();
                black_box(DeviceMessage::from_frame(&frame).unwrap())
            })
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_frame");
    for (name, msg) in [("trajectory", make_trajectory()), ("properties", make_properties())] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &msg, |b, msg| {
            b.iter(|| black_box(encode_frame(msg.message_type().tag(), &msg.encode_payload())))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decode, bench_encode);
criterion_main!(benches);
