//! Criterion benchmarks for frame classification and initial-info decoding.
//!
//! Classification runs on every inbound video frame, so it must stay a
//! constant-time prefix check regardless of frame size.
//!
//! Run with:
//! ```bash
//! cargo bench --package droidlink-core --bench frame_bench
//! ```

use std::collections::BTreeSet;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use droidlink_core::protocol::display::Size;
use droidlink_core::{classify, decode_frame, DisplayCombinedInfo, DisplayInfo, InitialInfo};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn video_frame(len: usize) -> Vec<u8> {
    let mut frame = vec![0, 0, 0, 1, 0x65];
    frame.resize(len, 0xAB);
    frame
}

fn initial_info_frame(displays: i32) -> Vec<u8> {
    let info = InitialInfo {
        device_name: "Pixel 7 Pro".to_string(),
        displays: (0..displays)
            .map(|id| DisplayCombinedInfo {
                display_info: DisplayInfo {
                    display_id: id,
                    size: Size {
                        width: 1440,
                        height: 3120,
                    },
                    rotation: 0,
                    layer_stack: id,
                    flags: 0,
                },
                connection_count: 1,
                screen_info: None,
                video_settings: None,
            })
            .collect(),
        encoders: ["c2.android.avc.encoder", "OMX.google.h264.encoder"]
            .into_iter()
            .map(String::from)
            .collect::<BTreeSet<_>>(),
        client_id: 1,
    };
    info.encode().expect("fixture encodes")
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    for len in [64usize, 4096, 256 * 1024] {
        let frame = video_frame(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &frame, |b, frame| {
            b.iter(|| classify(black_box(frame)))
        });
    }
    group.finish();
}

fn bench_decode_initial_info(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_initial_info");
    for displays in [1, 4] {
        let frame = initial_info_frame(displays);
        group.bench_with_input(BenchmarkId::from_parameter(displays), &frame, |b, frame| {
            b.iter(|| decode_frame(black_box(frame.clone())))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_classify, bench_decode_initial_info);
criterion_main!(benches);
