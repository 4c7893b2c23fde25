use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use image::{Rgb, RgbImage, RgbaImage, Rgba};
use inference::codec::encode_png;
use inference::processing::{post::MaskPostProcessor, pre::PreProcessor};
use ndarray::{Array, IxDyn};

fn test_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}

fn benchmark_preprocessing(c: &mut Criterion) {
    let mut group = c.benchmark_group("preprocessing");
    let mut preprocessor = PreProcessor::default();

    let resolutions = [(640, 480), (1280, 720), (1920, 1080), (4000, 3000)];

    for (width, height) in resolutions.iter() {
        let image = test_image(*width, *height);

        group.bench_with_input(
            BenchmarkId::new("resize_normalize", format!("{}x{}", width, height)),
            &image,
            |b, image| b.iter(|| preprocessor.preprocess(black_box(image)).unwrap()),
        );
    }

    group.finish();
}

fn benchmark_mask_postprocessing(c: &mut Criterion) {
    let mut group = c.benchmark_group("mask_postprocessing");
    let mut postprocessor = MaskPostProcessor::default();
    let mask = Array::from_elem(IxDyn(&[1, 1, 1024, 1024]), 0.3f32);

    let resolutions = [(640, 480), (1920, 1080), (4000, 3000)];

    for (width, height) in resolutions.iter() {
        group.bench_with_input(
            BenchmarkId::new("to_alpha", format!("{}x{}", width, height)),
            &(*width, *height),
            |b, (width, height)| {
                b.iter(|| {
                    postprocessor
                        .to_alpha(black_box(&mask.view()), *width, *height, Some(0.5))
                        .unwrap()
                })
            },
        );
    }

    group.finish();
}

fn benchmark_png_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("png_encoding");
    group.sample_size(10);

    let image = RgbaImage::from_fn(1920, 1080, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 0, if x > 960 { 255 } else { 0 }])
    });

    group.bench_function("rgba_1920x1080", |b| {
        b.iter(|| encode_png(black_box(&image)).unwrap())
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_preprocessing,
    benchmark_mask_postprocessing,
    benchmark_png_encoding
);
criterion_main!(benches);
