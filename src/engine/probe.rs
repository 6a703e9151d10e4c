// src/engine/probe.rs
//
// One-shot check of whether the native raster surface really writes a given
// output format, or silently substitutes another one.
//
// Each answer is computed at most once per probe instance and cached for its
// lifetime. The process-wide instance lives in a `OnceLock`.

use crate::engine::native::{BuiltinSurface, RasterSurface};
use crate::ops::{OutputFormat, PixelBuffer};
use std::sync::{Arc, OnceLock};
use tracing::debug;

static GLOBAL_PROBE: OnceLock<Arc<CapabilityProbe>> = OnceLock::new();

pub struct CapabilityProbe {
    surface: Arc<dyn RasterSurface>,
    webp: OnceLock<bool>,
    jpeg: OnceLock<bool>,
    png: OnceLock<bool>,
}

impl CapabilityProbe {
    /// Isolated probe over `surface`. Tests use this to avoid sharing the
    /// process-wide cache.
    pub fn new(surface: Arc<dyn RasterSurface>) -> Self {
        Self {
            surface,
            webp: OnceLock::new(),
            jpeg: OnceLock::new(),
            png: OnceLock::new(),
        }
    }

    /// Process-wide probe over the built-in surface.
    pub fn global() -> Arc<CapabilityProbe> {
        GLOBAL_PROBE
            .get_or_init(|| Arc::new(CapabilityProbe::new(Arc::new(BuiltinSurface))))
            .clone()
    }

    fn slot(&self, format: OutputFormat) -> &OnceLock<bool> {
        match format {
            OutputFormat::WebP => &self.webp,
            OutputFormat::Jpeg => &self.jpeg,
            OutputFormat::Png => &self.png,
        }
    }

    /// True only if the surface both declares and actually writes `format`.
    /// A surface that fails to export counts as "not supported".
    pub fn supports_native_format(&self, format: OutputFormat) -> bool {
        *self.slot(format).get_or_init(|| {
            let supported = self.run_probe(format);
            debug!(format = format.as_str(), supported, "native capability probed");
            supported
        })
    }

    fn run_probe(&self, format: OutputFormat) -> bool {
        let requested = format.mime_type();
        let sample = PixelBuffer::filled(1, 1, [0, 0, 0, 255]);
        let blob = match self.surface.export(&sample, requested, 100) {
            Ok(blob) => blob,
            Err(err) => {
                debug!(format = format.as_str(), error = %err, "probe export failed");
                return false;
            }
        };
        let sniffed = image::guess_format(&blob.bytes).ok();
        blob.mime_type == requested && sniffed == Some(format.image_format())
    }
}
