// src/engine/pipeline.rs
//
// Prepare stage of an execution unit: pick the output size, allocate the
// drawing surface and draw the decoded pixels onto it.
//
// Sizing is deliberately naive: a requested width or height replaces the
// natural one independently and aspect ratio is not preserved.

use crate::engine::common::EngineResult;
use crate::engine::{MAX_DIMENSION, MAX_PIXELS};
use crate::error::ImageBatchError;
use crate::ops::PixelBuffer;
use fast_image_resize::{self as fir, ImageBufferError, MulDiv, PixelType, ResizeOptions};
use image::{imageops::FilterType, RgbaImage};
use tracing::debug;

const RGBA: PixelType = PixelType::U8x4;

/// Output size for a draw: each requested side overrides the natural side
/// on its own. `None` and `Some(0)` both keep the natural value.
pub fn resolve_target_dimensions(
    natural: (u32, u32),
    target_width: Option<u32>,
    target_height: Option<u32>,
) -> (u32, u32) {
    let width = target_width.filter(|w| *w > 0).unwrap_or(natural.0);
    let height = target_height.filter(|h| *h > 0).unwrap_or(natural.1);
    (width, height)
}

/// Reserve the RGBA backing store of a drawing surface.
///
/// A zero-sized or oversized surface, or an allocation the allocator
/// refuses, is `ContextUnavailable`.
pub fn allocate_surface(width: u32, height: u32) -> EngineResult<Vec<u8>> {
    if width == 0 || height == 0 {
        return Err(ImageBatchError::context_unavailable(format!(
            "cannot create a {width}x{height} surface"
        )));
    }
    let pixels = width as u64 * height as u64;
    if width > MAX_DIMENSION || height > MAX_DIMENSION || pixels > MAX_PIXELS {
        return Err(ImageBatchError::context_unavailable(format!(
            "surface {width}x{height} exceeds limits \
             ({MAX_DIMENSION}px per side, {MAX_PIXELS} pixels)"
        )));
    }
    let bytes = (pixels as usize) * RGBA.size();
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(bytes).map_err(|e| {
        ImageBatchError::context_unavailable(format!(
            "surface allocation of {bytes} bytes failed: {e}"
        ))
    })?;
    buffer.resize(bytes, 0);
    Ok(buffer)
}

/// Draw `source` onto a fresh surface of `width` x `height`.
pub fn draw_to_surface(source: PixelBuffer, width: u32, height: u32) -> EngineResult<PixelBuffer> {
    let mut surface = allocate_surface(width, height)?;
    let (src_width, src_height) = source.dimensions();
    if (src_width, src_height) == (width, height) {
        surface.copy_from_slice(source.samples());
        return PixelBuffer::new(width, height, surface);
    }
    if src_width == 0 || src_height == 0 {
        return Err(ImageBatchError::resize_failed(
            (src_width, src_height),
            (width, height),
            "source has no pixels",
        ));
    }

    debug!(src_width, src_height, width, height, "resizing onto surface");
    let resized = fast_resize_rgba(source.samples(), src_width, src_height, width, height)
        .map_err(|reason| {
            ImageBatchError::resize_failed((src_width, src_height), (width, height), reason)
        })?;
    surface.copy_from_slice(&resized);
    PixelBuffer::new(width, height, surface)
}

fn default_resize_options() -> ResizeOptions {
    ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3))
}

fn fast_resize_rgba(
    src_pixels: &[u8],
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<Vec<u8>, String> {
    let required_bytes = (src_width as usize)
        .checked_mul(src_height as usize)
        .and_then(|count| count.checked_mul(RGBA.size()))
        .ok_or_else(|| "image buffer size overflow during resize".to_string())?;

    if src_pixels.len() < required_bytes {
        return Err(format!(
            "fir source image invalid buffer size. expected {required_bytes} bytes, got {} bytes",
            src_pixels.len()
        ));
    }
    let src_pixels = &src_pixels[..required_bytes];

    // The source stays straight-alpha: the fallback below reads it as-is.
    let primary_result = match fir::images::ImageRef::new(src_width, src_height, src_pixels, RGBA)
    {
        Ok(src_image) => resize_premultiplied(&src_image, dst_width, dst_height),
        Err(ImageBufferError::InvalidBufferAlignment) => {
            let mut aligned = fir::images::Image::new(src_width, src_height, RGBA);
            aligned.buffer_mut().copy_from_slice(src_pixels);
            resize_premultiplied(&aligned, dst_width, dst_height)
        }
        Err(other) => Err(format!("fir source image error: {other:?}")),
    };

    match primary_result {
        Ok(pixels) => Ok(pixels),
        Err(err) => {
            debug!(error = %err, "fast resize failed; falling back to image crate");
            resize_with_image_crate_fallback(
                src_pixels, src_width, src_height, dst_width, dst_height,
            )
            .map_err(|fallback_err| format!("{err}; image crate fallback failed: {fallback_err}"))
        }
    }
}

fn resize_premultiplied(
    src_image: &impl fir::IntoImageView,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<Vec<u8>, String> {
    // Premultiply into a scratch image so transparent neighbours do not
    // bleed their color.
    let mul_div = MulDiv::default();
    let mut premultiplied =
        fir::images::Image::new(src_image.width(), src_image.height(), RGBA);
    mul_div
        .multiply_alpha(src_image, &mut premultiplied)
        .map_err(|e| format!("failed to premultiply alpha: {e}"))?;

    let mut dst_image = fir::images::Image::new(dst_width, dst_height, RGBA);
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&premultiplied, &mut dst_image, &default_resize_options())
        .map_err(|e| format!("fir resize error: {e:?}"))?;

    mul_div
        .divide_alpha_inplace(&mut dst_image)
        .map_err(|e| format!("failed to unpremultiply alpha: {e}"))?;

    Ok(dst_image.into_vec())
}

fn resize_with_image_crate_fallback(
    src_pixels: &[u8],
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<Vec<u8>, String> {
    let rgba = RgbaImage::from_raw(src_width, src_height, src_pixels.to_vec())
        .ok_or_else(|| "failed to build rgba image for fallback resize".to_string())?;
    Ok(image::imageops::resize(&rgba, dst_width, dst_height, FilterType::Lanczos3).into_raw())
}
