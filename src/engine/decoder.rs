// src/engine/decoder.rs
//
// Decoder operations: JPEG (mozjpeg), PNG (zune-png), WebP (libwebp), GIF/BMP.
// Every path ends in an RGBA8 pixel buffer.

use crate::engine::common::run_with_panic_policy;
use crate::error::ImageBatchError;
use crate::ops::PixelBuffer;
use image::{DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use mozjpeg::Decompress;
use webp::{BitstreamFeatures, Decoder as WebPDecoder};
use zune_core::bytestream::ZCursor;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_png::PngDecoder;

use crate::engine::{MAX_DIMENSION, MAX_PIXELS};

// Always ImageBatchError so decode failures keep their category and wire code.
type DecoderResult<T> = std::result::Result<T, ImageBatchError>;

/// Decode JPEG using mozjpeg (backed by libjpeg-turbo)
pub fn decode_jpeg_mozjpeg(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:mozjpeg", || {
        if !ends_with_eoi(data) {
            return Err(ImageBatchError::decode_failed(
                "mozjpeg: missing JPEG EOI marker",
            ));
        }

        let decompress = Decompress::new_mem(data).map_err(|e| {
            ImageBatchError::decode_failed(format!("mozjpeg decompress init failed: {e:?}"))
        })?;

        let mut decompress = decompress.rgb().map_err(|e| {
            ImageBatchError::decode_failed(format!("mozjpeg rgb conversion failed: {e:?}"))
        })?;

        let width = decompress.width();
        let height = decompress.height();
        if width > MAX_DIMENSION as usize || height > MAX_DIMENSION as usize {
            return Err(ImageBatchError::dimension_exceeds_limit(
                width.max(height) as u32,
                MAX_DIMENSION,
            ));
        }
        let width_u32 = width as u32;
        let height_u32 = height as u32;
        check_dimensions(width_u32, height_u32)?;

        let pixels: Vec<[u8; 3]> = decompress.read_scanlines().map_err(|e| {
            ImageBatchError::decode_failed(format!("mozjpeg: failed to read scanlines: {e:?}"))
        })?;
        let flat_pixels: Vec<u8> = pixels.into_iter().flatten().collect();

        let rgb_image =
            RgbImage::from_raw(width_u32, height_u32, flat_pixels).ok_or_else(|| {
                ImageBatchError::decode_failed("mozjpeg: failed to create image from raw data")
            })?;

        Ok(DynamicImage::ImageRgb8(rgb_image))
    })
}

/// The stream must end in EOI. Trailing zero padding is tolerated; an EOI
/// inside an embedded thumbnail is not enough.
fn ends_with_eoi(data: &[u8]) -> bool {
    let end = data
        .iter()
        .rposition(|byte| *byte != 0)
        .map_or(0, |last| last + 1);
    data[..end].ends_with(&[0xFF, 0xD9])
}

/// Decode GIF/BMP (and anything the fast paths do not cover) with the image crate.
pub fn decode_with_image_crate(
    data: &[u8],
    format: Option<ImageFormat>,
) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:image", || {
        let decoded = match format {
            Some(format) => image::load_from_memory_with_format(data, format),
            None => image::load_from_memory(data),
        };
        let img =
            decoded.map_err(|e| ImageBatchError::decode_failed(format!("decode failed: {e}")))?;
        check_dimensions(img.width(), img.height())?;
        Ok(img)
    })
}

/// Decode PNG using zune-png. 16-bit input is stripped to 8-bit.
///
/// Strict mode rejects bad chunk CRCs and zlib checksums, so damaged IDAT
/// data is a decode error rather than a partially filled raster.
pub fn decode_png_zune(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:png", || {
        // zune's own size cap is lower than ours; check_dimensions decides.
        let options = DecoderOptions::default()
            .set_strict_mode(true)
            .set_max_width(u32::MAX as usize)
            .set_max_height(u32::MAX as usize)
            .png_set_strip_to_8bit(true);
        let mut decoder = PngDecoder::new_with_options(ZCursor::new(data), options);
        decoder
            .decode_headers()
            .map_err(|e| ImageBatchError::decode_failed(format!("png: bad header: {e}")))?;
        let (width, height) = decoder
            .dimensions()
            .ok_or_else(|| ImageBatchError::decode_failed("png: missing header info"))?;
        let width = u32::try_from(width).unwrap_or(u32::MAX);
        let height = u32::try_from(height).unwrap_or(u32::MAX);
        // Headers only; no pixel memory is committed yet.
        check_dimensions(width, height)?;

        let pixels = decoder
            .decode()
            .map_err(|e| ImageBatchError::decode_failed(format!("png: decode failed: {e}")))?;

        let buf = match pixels {
            zune_core::result::DecodingResult::U8(v) => v,
            _ => {
                return Err(ImageBatchError::decode_failed(
                    "png: unexpected non-U8 pixel buffer",
                ))
            }
        };

        let colorspace = decoder
            .colorspace()
            .ok_or_else(|| ImageBatchError::decode_failed("png: missing colorspace"))?;

        let img = match colorspace {
            ColorSpace::RGB => RgbImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| ImageBatchError::decode_failed("png: failed to build RGB image"))?,
            ColorSpace::RGBA => RgbaImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageRgba8)
                .ok_or_else(|| ImageBatchError::decode_failed("png: failed to build RGBA image"))?,
            ColorSpace::Luma => GrayImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| ImageBatchError::decode_failed("png: failed to build Luma image"))?,
            ColorSpace::LumaA => GrayAlphaImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageLumaA8)
                .ok_or_else(|| {
                    ImageBatchError::decode_failed("png: failed to build LumaA image")
                })?,
            other => {
                return Err(ImageBatchError::decode_failed(format!(
                    "png: unsupported colorspace {other:?}"
                )))
            }
        };

        Ok(img)
    })
}

/// Decode WebP using libwebp. Animated WebP falls back to the image crate (first frame).
pub fn decode_webp_libwebp(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:webp", || {
        // Parse header first to avoid allocating huge buffers on malformed files
        let features = BitstreamFeatures::new(data).ok_or_else(|| {
            ImageBatchError::decode_failed("webp: failed to read bitstream features")
        })?;

        check_dimensions(features.width(), features.height())?;

        if features.has_animation() {
            return image::load_from_memory_with_format(data, ImageFormat::WebP).map_err(|e| {
                ImageBatchError::decode_failed(format!("webp (animated) decode failed: {e}"))
            });
        }

        let decoded = WebPDecoder::new(data)
            .decode()
            .ok_or_else(|| ImageBatchError::decode_failed("webp: decode failed"))?;
        check_dimensions(decoded.width(), decoded.height())?;

        Ok(decoded.to_image())
    })
}

/// Detect input format using magic bytes. Returns None if unknown.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

/// Resolve the source format: magic bytes first, declared mime type second.
pub fn resolve_source_format(bytes: &[u8], declared_mime: &str) -> Option<ImageFormat> {
    detect_format(bytes).or_else(|| {
        let mime = declared_mime.trim().to_ascii_lowercase();
        // Browsers report "image/jpg" for some files; image only knows "image/jpeg".
        let mime = if mime == "image/jpg" { "image/jpeg".to_string() } else { mime };
        ImageFormat::from_mime_type(mime)
    })
}

/// Unified decode entrypoint:
/// - Resolve the format once (magic bytes, then declared mime)
/// - Route JPEG to mozjpeg, PNG to zune-png, WebP to libwebp, GIF/BMP to image
/// - Return RGBA8 pixels at the natural size
pub fn decode_image(bytes: &[u8], declared_mime: &str) -> DecoderResult<PixelBuffer> {
    if bytes.is_empty() {
        return Err(ImageBatchError::decode_failed("source is empty"));
    }
    let img = match resolve_source_format(bytes, declared_mime) {
        Some(ImageFormat::Jpeg) => decode_jpeg_mozjpeg(bytes)?,
        Some(ImageFormat::Png) => decode_png_zune(bytes)?,
        Some(ImageFormat::WebP) => decode_webp_libwebp(bytes)?,
        Some(format @ (ImageFormat::Gif | ImageFormat::Bmp)) => {
            decode_with_image_crate(bytes, Some(format))?
        }
        Some(other) => {
            return Err(ImageBatchError::decode_failed(format!(
                "unsupported source format {other:?}"
            )))
        }
        None => {
            return Err(ImageBatchError::decode_failed(format!(
                "unrecognized image data (declared {declared_mime})"
            )))
        }
    };
    Ok(PixelBuffer::from_rgba_image(img.into_rgba8()))
}

/// Check if image dimensions are within safe limits.
/// Returns an error if the image is too large (potential decompression bomb).
pub fn check_dimensions(width: u32, height: u32) -> DecoderResult<()> {
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(ImageBatchError::dimension_exceeds_limit(
            width.max(height),
            MAX_DIMENSION,
        ));
    }
    let pixels = width as u64 * height as u64;
    if pixels > MAX_PIXELS {
        return Err(ImageBatchError::pixel_count_exceeds_limit(pixels, MAX_PIXELS));
    }
    Ok(())
}
