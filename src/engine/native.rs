// src/engine/native.rs
//
// Native backend: the platform raster surface's own export. Whatever the
// surface writes, it declares a mime type for it, and that declaration is
// all the router can trust. A surface asked for a format it cannot write
// may quietly hand back something else.

use crate::engine::common::EngineResult;
use crate::engine::pipeline::allocate_surface;
use crate::error::ImageBatchError;
use crate::ops::PixelBuffer;
use image::{ExtendedColorType, ImageEncoder, ImageFormat};

/// Bytes exported by a raster surface together with the mime type the
/// surface claims they are.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Drawing-surface export used by the native backend and the capability probe.
pub trait RasterSurface: Send + Sync {
    /// Export `pixels` as `mime_type`. `quality` is 1-100 and only meaningful
    /// for lossy formats.
    fn export(
        &self,
        pixels: &PixelBuffer,
        mime_type: &str,
        quality: u8,
    ) -> EngineResult<NativeBlob>;
}

/// Raster surface backed by the image crate's built-in encoders.
///
/// Formats it cannot write are exported as PNG and declared as such.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinSurface;

impl BuiltinSurface {
    fn writable(format: ImageFormat) -> bool {
        matches!(
            format,
            ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP | ImageFormat::Bmp
        )
    }
}

impl RasterSurface for BuiltinSurface {
    fn export(
        &self,
        pixels: &PixelBuffer,
        mime_type: &str,
        quality: u8,
    ) -> EngineResult<NativeBlob> {
        let (width, height) = pixels.dimensions();
        // The surface owns its own backing store, like a canvas would.
        let mut canvas = allocate_surface(width, height)?;
        canvas.copy_from_slice(pixels.samples());

        let format = ImageFormat::from_mime_type(mime_type)
            .filter(|format| Self::writable(*format))
            .unwrap_or(ImageFormat::Png);

        let mut bytes = Vec::new();
        let written = match format {
            ImageFormat::Jpeg => {
                let rgb: Vec<u8> = canvas
                    .chunks_exact(4)
                    .flat_map(|px| [px[0], px[1], px[2]])
                    .collect();
                let quality = quality.clamp(1, 100);
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, quality)
                    .write_image(&rgb, width, height, ExtendedColorType::Rgb8)
            }
            ImageFormat::WebP => image::codecs::webp::WebPEncoder::new_lossless(&mut bytes)
                .write_image(&canvas, width, height, ExtendedColorType::Rgba8),
            ImageFormat::Bmp => image::codecs::bmp::BmpEncoder::new(&mut bytes)
                .write_image(&canvas, width, height, ExtendedColorType::Rgba8),
            _ => image::codecs::png::PngEncoder::new(&mut bytes)
                .write_image(&canvas, width, height, ExtendedColorType::Rgba8),
        };
        written.map_err(|e| {
            ImageBatchError::encode_failed(
                format.extensions_str().first().copied().unwrap_or("native"),
                format!("surface export failed: {e}"),
            )
        })?;

        Ok(NativeBlob {
            bytes,
            mime_type: format.to_mime_type().to_string(),
        })
    }
}
