use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use image_batcher::engine::{decode_image, draw_to_surface, encode_png, CodecRouter};
use image_batcher::{OutputFormat, PixelBuffer, Quality};
use std::hint::black_box;

fn photo(width: u32, height: u32) -> PixelBuffer {
    PixelBuffer::from_rgba_image(image::RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x * 3 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8, 255])
    }))
}

pub fn encode_benchmark(c: &mut Criterion) {
    let router = CodecRouter::default();
    let pixels = photo(512, 512);
    let mut group = c.benchmark_group("router_encode_512");
    group.sample_size(20);
    for format in OutputFormat::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(format.as_str()), &format, |b, format| {
            b.iter(|| router.encode(black_box(&pixels), *format, Quality::default()))
        });
    }
    group.finish();
}

pub fn pipeline_benchmark(c: &mut Criterion) {
    let source = encode_png(&photo(1024, 768)).expect("fixture encodes");
    c.bench_function("decode_draw_1024_to_320", |b| {
        b.iter(|| {
            let decoded = decode_image(black_box(&source), "image/png").expect("fixture decodes");
            draw_to_surface(decoded, 320, 240)
        })
    });
}

criterion_group!(benches, encode_benchmark, pipeline_benchmark);
criterion_main!(benches);
