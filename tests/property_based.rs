use image::{DynamicImage, GenericImageView, RgbImage};
use image_batcher::engine::{
    draw_to_surface, optimize_png, resolve_target_dimensions, CodecRouter, PNG_OPTIMIZATION_LEVEL,
};
use image_batcher::progress::removal_stage;
use image_batcher::{OutputFormat, PixelBuffer, Quality};
use proptest::prelude::*;

fn create_test_image(width: u32, height: u32) -> PixelBuffer {
    let rgb = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    }));
    PixelBuffer::from_rgba_image(rgb.to_rgba8())
}

fn target_side() -> impl Strategy<Value = Option<u32>> {
    prop_oneof![Just(None), Just(Some(0u32)), (1u32..=48).prop_map(Some)]
}

fn output_format() -> impl Strategy<Value = OutputFormat> {
    prop_oneof![
        Just(OutputFormat::WebP),
        Just(OutputFormat::Jpeg),
        Just(OutputFormat::Png),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        .. ProptestConfig::default()
    })]

    #[test]
    fn quality_always_clamped(raw in any::<i32>()) {
        let quality = Quality::new(raw).get();
        prop_assert!((1..=100).contains(&quality));
        if (1..=100).contains(&raw) {
            prop_assert_eq!(quality as i32, raw);
        }
    }

    #[test]
    fn target_sides_override_independently(
        natural_w in 1u32..=64,
        natural_h in 1u32..=64,
        target_w in target_side(),
        target_h in target_side(),
    ) {
        let (w, h) = resolve_target_dimensions((natural_w, natural_h), target_w, target_h);
        prop_assert_eq!(w, target_w.filter(|v| *v > 0).unwrap_or(natural_w));
        prop_assert_eq!(h, target_h.filter(|v| *v > 0).unwrap_or(natural_h));
    }

    #[test]
    fn encode_at_target_decodes_to_target(
        src_w in 1u32..=32,
        src_h in 1u32..=32,
        dst_w in 1u32..=32,
        dst_h in 1u32..=32,
        format in output_format(),
    ) {
        let drawn = draw_to_surface(create_test_image(src_w, src_h), dst_w, dst_h).unwrap();
        let result = CodecRouter::default()
            .encode(&drawn, format, Quality::default())
            .unwrap();
        let decoded = image::load_from_memory(&result.bytes).unwrap();
        prop_assert_eq!(decoded.dimensions(), (dst_w, dst_h));
        prop_assert_eq!(result.mime_type.as_str(), format.mime_type());
    }

    #[test]
    fn png_optimizer_never_grows(width in 1u32..=40, height in 1u32..=40) {
        let result = CodecRouter::default()
            .encode(&create_test_image(width, height), OutputFormat::Png, Quality::default())
            .unwrap();
        let again = optimize_png(&result.bytes, PNG_OPTIMIZATION_LEVEL).unwrap();
        prop_assert!(again.len() <= result.bytes.len());
    }

    #[test]
    fn removal_progress_monotonic_per_phase(total in 1u64..=1000, steps in 1usize..=20) {
        let mut last = None;
        for phase in ["fetch:model", "compute:inference"] {
            for i in 0..=steps {
                let current = total * i as u64 / steps as u64;
                if let Some(stage) = removal_stage(phase, current, total) {
                    if let Some(previous) = last {
                        prop_assert!(stage >= previous);
                    }
                    last = Some(stage);
                }
            }
        }
    }
}
