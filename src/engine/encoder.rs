// src/engine/encoder.rs
//
// Portable encoder operations: JPEG (mozjpeg), PNG (+ oxipng), WebP (libwebp).
// All encoders take the RGBA raster produced by the prepare stage.

use crate::engine::common::run_with_panic_policy;
use crate::error::ImageBatchError;
use crate::ops::{PixelBuffer, Quality};
use image::{ExtendedColorType, ImageEncoder};
use mozjpeg::{ColorSpace, Compress, ScanMode};

use crate::engine::MAX_DIMENSION;

type EncoderResult<T> = std::result::Result<T, ImageBatchError>;

/// Effort level of the lossless PNG optimization pass.
pub const PNG_OPTIMIZATION_LEVEL: u8 = 2;

/// libwebp method used by the portable WebP path (0 = fastest, 6 = smallest).
pub const WEBP_METHOD: i32 = 6;

/// Single source of truth for deriving per-codec settings from a 1-100
/// quality value. Bands:
/// - High (>=85): visual quality first
/// - Balanced (70-84)
/// - Fast (50-69)
/// - Fastest (<50)
#[derive(Debug, Clone, Copy)]
pub struct QualitySettings {
    quality: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QualityBand {
    High,
    Balanced,
    Fast,
    Fastest,
}

impl QualitySettings {
    pub fn new(quality: Quality) -> Self {
        Self {
            quality: quality.get() as f32,
        }
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    fn band(&self) -> QualityBand {
        if self.quality >= 85.0 {
            QualityBand::High
        } else if self.quality >= 70.0 {
            QualityBand::Balanced
        } else if self.quality >= 50.0 {
            QualityBand::Fast
        } else {
            QualityBand::Fastest
        }
    }

    pub fn webp_sns_strength(&self) -> i32 {
        match self.band() {
            QualityBand::High => 50,
            QualityBand::Balanced => 70,
            QualityBand::Fast | QualityBand::Fastest => 80,
        }
    }

    pub fn webp_filter_strength(&self) -> i32 {
        if self.quality >= 80.0 {
            20
        } else if self.quality >= 60.0 {
            30
        } else {
            40
        }
    }

    pub fn webp_filter_sharpness(&self) -> i32 {
        match self.band() {
            QualityBand::High => 2,
            QualityBand::Balanced | QualityBand::Fast | QualityBand::Fastest => 0,
        }
    }

    pub fn jpeg_smoothing(&self) -> u8 {
        match self.band() {
            QualityBand::High => 0,
            QualityBand::Balanced => 5,
            QualityBand::Fast => 10,
            QualityBand::Fastest => 18,
        }
    }
}

fn validate_raster(format: &'static str, pixels: &PixelBuffer) -> EncoderResult<()> {
    let (w, h) = pixels.dimensions();
    if w == 0 || h == 0 {
        return Err(ImageBatchError::encode_failed(
            format,
            "width or height is zero",
        ));
    }
    if w > MAX_DIMENSION || h > MAX_DIMENSION {
        return Err(ImageBatchError::dimension_exceeds_limit(w.max(h), MAX_DIMENSION));
    }
    Ok(())
}

/// Encode to JPEG using mozjpeg. RGBA scanlines are fed directly and the
/// alpha channel is dropped by libjpeg.
pub fn encode_jpeg(pixels: &PixelBuffer, quality: Quality) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        validate_raster("jpeg", pixels)?;
        let (w, h) = pixels.dimensions();
        let settings = QualitySettings::new(quality);

        let mut comp = Compress::new(ColorSpace::JCS_EXT_RGBA);
        comp.set_size(w as usize, h as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);
        comp.set_quality(settings.quality());
        comp.set_chroma_sampling_pixel_sizes((2, 2), (2, 2));
        comp.set_progressive_mode();
        comp.set_optimize_coding(true);
        comp.set_optimize_scans(true);
        comp.set_scan_optimization_mode(ScanMode::AllComponentsTogether);
        comp.set_smoothing_factor(settings.jpeg_smoothing());

        let estimated_size = (w as usize * h as usize * 3 / 10).max(4096);
        let mut output = Vec::with_capacity(estimated_size);

        {
            let mut writer = comp.start_compress(&mut output).map_err(|e| {
                ImageBatchError::encode_failed(
                    "jpeg",
                    format!("mozjpeg: failed to start compress: {e:?}"),
                )
            })?;

            let stride = w as usize * 4;
            for row in pixels.samples().chunks(stride) {
                writer.write_scanlines(row).map_err(|e| {
                    ImageBatchError::encode_failed(
                        "jpeg",
                        format!("mozjpeg: failed to write scanlines: {e:?}"),
                    )
                })?;
            }

            writer.finish().map_err(|e| {
                ImageBatchError::encode_failed("jpeg", format!("mozjpeg: failed to finish: {e:?}"))
            })?;
        }

        Ok(output)
    })
}

/// Encode to PNG with the image crate writer. No optimization.
pub fn encode_png(pixels: &PixelBuffer) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:png", || {
        validate_raster("png", pixels)?;
        let (w, h) = pixels.dimensions();
        let mut buf = Vec::new();
        image::codecs::png::PngEncoder::new(&mut buf)
            .write_image(pixels.samples(), w, h, ExtendedColorType::Rgba8)
            .map_err(|e| ImageBatchError::encode_failed("png", format!("PNG encode failed: {e}")))?;
        Ok(buf)
    })
}

/// Lossless size optimization of PNG bytes with oxipng.
///
/// Pixel content is untouched. The result is never larger than the input.
pub fn optimize_png(png: &[u8], level: u8) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:png:oxipng", || {
        let mut options = oxipng::Options::from_preset(level);
        options.strip = oxipng::StripChunks::Safe;

        let optimized = oxipng::optimize_from_memory(png, &options).map_err(|e| {
            ImageBatchError::encode_failed("png", format!("oxipng optimization failed: {e}"))
        })?;

        if optimized.len() <= png.len() {
            Ok(optimized)
        } else {
            Ok(png.to_vec())
        }
    })
}

/// Encode to lossy WebP with libwebp.
pub fn encode_webp(pixels: &PixelBuffer, quality: Quality) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:webp", || {
        validate_raster("webp", pixels)?;
        let (w, h) = pixels.dimensions();
        let encoder = webp::Encoder::from_rgba(pixels.samples(), w, h);

        let mut config = webp::WebPConfig::new()
            .map_err(|_| ImageBatchError::encode_failed("webp", "failed to create WebPConfig"))?;

        let settings = QualitySettings::new(quality);
        config.lossless = 0;
        config.quality = settings.quality();
        config.method = WEBP_METHOD;
        config.sns_strength = settings.webp_sns_strength();
        config.autofilter = 1;
        config.filter_strength = settings.webp_filter_strength();
        config.filter_sharpness = settings.webp_filter_sharpness();

        let mem = encoder.encode_advanced(&config).map_err(|e| {
            ImageBatchError::encode_failed("webp", format!("WebP encode failed: {e:?}"))
        })?;

        Ok(mem.to_vec())
    })
}
