// src/engine/router.rs
//
// Codec router: picks the backend(s) for an output format and decides which
// result to keep.
//
// - WebP: portable libwebp always runs. When the probe trusts the native
//   surface, a native export runs alongside it and the smaller result wins.
//   A native export that fails or declares another mime type is dropped.
// - JPEG: portable mozjpeg only.
// - PNG: portable PNG writer followed by a lossless oxipng pass.

use crate::codecs::PortableCodecs;
use crate::engine::common::EngineResult;
use crate::engine::native::{BuiltinSurface, RasterSurface};
use crate::engine::probe::CapabilityProbe;
use crate::ops::{EncodingResult, OutputFormat, PixelBuffer, Quality};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct CodecRouter {
    probe: Arc<CapabilityProbe>,
    native: Arc<dyn RasterSurface>,
    codecs: Arc<PortableCodecs>,
}

impl Default for CodecRouter {
    /// Router over the process-wide probe and codec registry and the
    /// built-in surface.
    fn default() -> Self {
        Self::new(
            CapabilityProbe::global(),
            Arc::new(BuiltinSurface),
            PortableCodecs::global(),
        )
    }
}

impl CodecRouter {
    pub fn new(
        probe: Arc<CapabilityProbe>,
        native: Arc<dyn RasterSurface>,
        codecs: Arc<PortableCodecs>,
    ) -> Self {
        Self {
            probe,
            native,
            codecs,
        }
    }

    /// Encode with a target given as a string (extension or mime type).
    pub fn encode_named(
        &self,
        pixels: &PixelBuffer,
        target: &str,
        quality: i32,
    ) -> EngineResult<EncodingResult> {
        let format = OutputFormat::parse(target)?;
        self.encode(pixels, format, Quality::new(quality))
    }

    pub fn encode(
        &self,
        pixels: &PixelBuffer,
        format: OutputFormat,
        quality: Quality,
    ) -> EngineResult<EncodingResult> {
        let bytes = match format {
            OutputFormat::WebP => self.encode_webp(pixels, quality)?,
            OutputFormat::Jpeg => self.codecs.jpeg()?.encode(pixels, quality)?,
            OutputFormat::Png => {
                let png = self.codecs.png()?.encode(pixels)?;
                self.codecs.oxipng()?.optimize(&png)?
            }
        };
        Ok(EncodingResult::new(bytes, format.mime_type()))
    }

    fn encode_webp(&self, pixels: &PixelBuffer, quality: Quality) -> EngineResult<Vec<u8>> {
        let webp = self.codecs.webp()?;
        if !self.probe.supports_native_format(OutputFormat::WebP) {
            return webp.encode(pixels, quality);
        }

        let mime = OutputFormat::WebP.mime_type();
        let (native, portable) = rayon::join(
            || self.native.export(pixels, mime, quality.get()),
            || webp.encode(pixels, quality),
        );
        let portable = portable?;

        match native {
            Ok(blob) if blob.mime_type != mime => {
                warn!(
                    declared = %blob.mime_type,
                    "native webp export declared another type; discarded"
                );
                Ok(portable)
            }
            Ok(blob) if blob.bytes.len() < portable.len() => {
                debug!(native = blob.bytes.len(), portable = portable.len(), "native webp kept");
                Ok(blob.bytes)
            }
            Ok(blob) => {
                debug!(native = blob.bytes.len(), portable = portable.len(), "portable webp kept");
                Ok(portable)
            }
            Err(err) => {
                warn!(error = %err, "native webp export failed; discarded");
                Ok(portable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::{CodecModule, ModuleLoader};
    use crate::engine::native::NativeBlob;
    use crate::error::{ErrorCode, ImageBatchError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn photo(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::from_rgba_image(image::RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x ^ y) % 256) as u8, 255])
        }))
    }

    /// Native surface returning canned bytes and counting calls.
    struct CannedSurface {
        bytes: Vec<u8>,
        mime_type: &'static str,
        fail: bool,
        calls: AtomicUsize,
    }

    impl CannedSurface {
        fn new(bytes: Vec<u8>, mime_type: &'static str) -> Self {
            Self {
                bytes,
                mime_type,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl RasterSurface for CannedSurface {
        fn export(&self, _: &PixelBuffer, _: &str, _: u8) -> EngineResult<NativeBlob> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ImageBatchError::context_unavailable("surface lost"));
            }
            Ok(NativeBlob {
                bytes: self.bytes.clone(),
                mime_type: self.mime_type.to_string(),
            })
        }
    }

    /// Probe surface that always downgrades to PNG.
    struct PngOnlySurface;

    impl RasterSurface for PngOnlySurface {
        fn export(&self, pixels: &PixelBuffer, _: &str, quality: u8) -> EngineResult<NativeBlob> {
            BuiltinSurface.export(pixels, "image/png", quality)
        }
    }

    struct FailingLoader;

    impl ModuleLoader for FailingLoader {
        fn load(&self, module: CodecModule) -> std::result::Result<(), String> {
            Err(format!("{module} unreachable"))
        }
    }

    fn trusting_probe() -> Arc<CapabilityProbe> {
        Arc::new(CapabilityProbe::new(Arc::new(BuiltinSurface)))
    }

    fn trusting_router(native: Arc<dyn RasterSurface>) -> CodecRouter {
        CodecRouter::new(trusting_probe(), native, Arc::new(PortableCodecs::default()))
    }

    fn portable_webp_len(pixels: &PixelBuffer, quality: Quality) -> usize {
        PortableCodecs::default().webp().unwrap().encode(pixels, quality).unwrap().len()
    }

    #[test]
    fn test_webp_smaller_native_wins() {
        let pixels = photo(64, 64);
        let native = Arc::new(CannedSurface::new(b"RIFF\0\0\0\0WEBPtiny".to_vec(), "image/webp"));
        let router = trusting_router(native.clone());

        let result = router.encode(&pixels, OutputFormat::WebP, Quality::new(80)).unwrap();
        assert_eq!(result.bytes, b"RIFF\0\0\0\0WEBPtiny".to_vec());
        assert_eq!(result.mime_type, "image/webp");
        assert_eq!(native.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_webp_larger_native_loses() {
        let pixels = photo(32, 32);
        let quality = Quality::new(70);
        let native = Arc::new(CannedSurface::new(vec![0u8; 1 << 20], "image/webp"));
        let router = trusting_router(native);

        let result = router.encode(&pixels, OutputFormat::WebP, quality).unwrap();
        assert_eq!(result.byte_length, portable_webp_len(&pixels, quality));
    }

    #[test]
    fn test_webp_mismatched_native_mime_discarded() {
        let pixels = photo(32, 32);
        let quality = Quality::new(80);
        let native = Arc::new(CannedSurface::new(vec![1, 2, 3], "image/png"));
        let router = trusting_router(native);

        let result = router.encode(&pixels, OutputFormat::WebP, quality).unwrap();
        assert_eq!(result.byte_length, portable_webp_len(&pixels, quality));
        assert_eq!(&result.bytes[0..4], b"RIFF");
    }

    #[test]
    fn test_webp_native_error_discarded() {
        let pixels = photo(16, 16);
        let mut surface = CannedSurface::new(vec![1], "image/webp");
        surface.fail = true;
        let router = trusting_router(Arc::new(surface));

        let result = router.encode(&pixels, OutputFormat::WebP, Quality::new(80)).unwrap();
        assert_eq!(&result.bytes[8..12], b"WEBP");
    }

    #[test]
    fn test_untrusted_native_is_never_called() {
        let pixels = photo(16, 16);
        let native = Arc::new(CannedSurface::new(vec![1], "image/webp"));
        let probe = Arc::new(CapabilityProbe::new(Arc::new(PngOnlySurface)));
        let router = CodecRouter::new(probe, native.clone(), Arc::new(PortableCodecs::default()));

        router.encode(&pixels, OutputFormat::WebP, Quality::new(80)).unwrap();
        assert_eq!(native.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_jpeg_never_uses_native() {
        let pixels = photo(16, 16);
        let native = Arc::new(CannedSurface::new(vec![1], "image/jpeg"));
        let router = trusting_router(native.clone());

        let result = router.encode(&pixels, OutputFormat::Jpeg, Quality::new(80)).unwrap();
        assert_eq!(&result.bytes[0..2], &[0xFF, 0xD8]);
        assert_eq!(result.mime_type, "image/jpeg");
        assert_eq!(native.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_png_is_optimized_and_lossless() {
        let pixels = photo(40, 30);
        let router = CodecRouter::default();
        let result = router.encode(&pixels, OutputFormat::Png, Quality::default()).unwrap();
        let plain = crate::engine::encoder::encode_png(&pixels).unwrap();
        assert!(result.byte_length <= plain.len());
        let decoded = image::load_from_memory(&result.bytes).unwrap().to_rgba8();
        assert_eq!(decoded.as_raw().as_slice(), pixels.samples());
    }

    #[test]
    fn test_unsupported_target_rejected() {
        let err = CodecRouter::default()
            .encode_named(&photo(4, 4), "tiff", 80)
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::UnsupportedFormat));
    }

    #[test]
    fn test_module_load_failure_surfaces() {
        let router = CodecRouter::new(
            trusting_probe(),
            Arc::new(BuiltinSurface),
            Arc::new(PortableCodecs::with_loader(FailingLoader)),
        );
        for format in OutputFormat::ALL {
            let err = router.encode(&photo(4, 4), format, Quality::default()).unwrap_err();
            assert_eq!(err.code(), Some(ErrorCode::ModuleLoadFailed), "{format:?}");
        }
    }
}
