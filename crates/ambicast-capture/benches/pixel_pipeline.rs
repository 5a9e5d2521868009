//! Pixel Pipeline Benchmarks
//!
//! Measures NV21→RGB24 conversion and the full UI-over-video composite at
//! the output resolutions the service is typically configured for.

use ambicast_capture::convert::nv21_to_rgb24;
use ambicast_capture::{OverlayLayout, OverlayPlane, PixelPipeline, Resolution, VideoPlanes};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const RESOLUTIONS: [(u32, u32, &str); 3] = [(320, 180, "180p"), (1280, 720, "720p"), (1920, 1080, "1080p")];

/// NV21 planes with a luma ramp and a chroma gradient
fn generate_nv21(res: Resolution) -> VideoPlanes {
    let mut planes = VideoPlanes::new(res, res.width as usize);
    let w = res.width as usize;
    for (i, y) in planes.luma.iter_mut().enumerate() {
        *y = 16 + ((i % w) * 219 / w) as u8;
    }
    for (i, c) in planes.chroma.iter_mut().enumerate() {
        *c = (i % 256) as u8;
    }
    planes
}

/// Overlay with a half-transparent left half
fn generate_overlay(res: Resolution) -> OverlayPlane {
    let stride = res.width as usize * 4;
    let mut plane = OverlayPlane::new(res, stride, OverlayLayout::Abgr);
    for row in plane.data.chunks_exact_mut(stride) {
        for px in row[..stride / 2].chunks_exact_mut(4) {
            px.copy_from_slice(&[128, 40, 80, 200]);
        }
    }
    plane
}

fn bench_nv21_to_rgb24(c: &mut Criterion) {
    let mut group = c.benchmark_group("nv21_to_rgb24");

    for (width, height, name) in RESOLUTIONS {
        let res = Resolution::new(width, height);
        let planes = generate_nv21(res);
        let mut out = vec![0u8; res.rgb24_len()];

        group.throughput(Throughput::Elements(res.total_pixels() as u64));
        group.bench_with_input(BenchmarkId::new("BT709", name), &planes, |b, planes| {
            b.iter(|| {
                nv21_to_rgb24(
                    black_box(planes),
                    &mut out,
                    width as usize * 3,
                    width as usize,
                    height as usize,
                );
                black_box(&out);
            })
        });
    }

    group.finish();
}

fn bench_composite(c: &mut Criterion) {
    let mut group = c.benchmark_group("composite");

    for (width, height, name) in RESOLUTIONS {
        let res = Resolution::new(width, height);
        let planes = generate_nv21(res);
        let overlay = generate_overlay(res);
        let mut pipeline = PixelPipeline::new(res);

        group.throughput(Throughput::Elements(res.total_pixels() as u64));
        group.bench_function(BenchmarkId::new("ui_over_video", name), |b| {
            b.iter(|| {
                let rgb = pipeline
                    .process(Some(black_box(&overlay)), Some(black_box(&planes)))
                    .expect("composite");
                black_box(rgb.len());
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_nv21_to_rgb24, bench_composite);
criterion_main!(benches);
