// src/codecs/portable.rs
//
// Lazily-initialized handles to the portable codecs.
//
// A handle is created the first time a codec is needed, after its loader
// reports success. A failed load is not cached, so the next request retries.
// Once a handle exists it is shared for the lifetime of the registry.

use crate::engine::encoder::{self, PNG_OPTIMIZATION_LEVEL, WEBP_METHOD};
use crate::error::{ImageBatchError, Result};
use crate::ops::{PixelBuffer, Quality};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

static GLOBAL_CODECS: OnceLock<Arc<PortableCodecs>> = OnceLock::new();

/// Portable codec modules known to the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodecModule {
    Webp,
    Mozjpeg,
    Png,
    Oxipng,
}

impl CodecModule {
    pub fn name(&self) -> &'static str {
        match self {
            CodecModule::Webp => "webp",
            CodecModule::Mozjpeg => "mozjpeg",
            CodecModule::Png => "png",
            CodecModule::Oxipng => "oxipng",
        }
    }
}

impl fmt::Display for CodecModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Makes a codec module available. Errors are plain messages and end up in
/// `ModuleLoadFailed`.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, module: CodecModule) -> std::result::Result<(), String>;
}

/// Loader for the statically linked codecs. Nothing is fetched; the loader
/// only checks that the linked library is usable.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkedModuleLoader;

impl ModuleLoader for LinkedModuleLoader {
    fn load(&self, module: CodecModule) -> std::result::Result<(), String> {
        match module {
            CodecModule::Webp => webp::WebPConfig::new()
                .map(|_| ())
                .map_err(|_| "libwebp rejected its default configuration".to_string()),
            CodecModule::Mozjpeg | CodecModule::Png | CodecModule::Oxipng => Ok(()),
        }
    }
}

/// Lossy WebP encoder (libwebp).
#[derive(Debug)]
pub struct WebpModule {
    method: i32,
}

impl WebpModule {
    pub fn method(&self) -> i32 {
        self.method
    }

    pub fn encode(&self, pixels: &PixelBuffer, quality: Quality) -> Result<Vec<u8>> {
        encoder::encode_webp(pixels, quality)
    }
}

/// JPEG encoder (mozjpeg).
#[derive(Debug)]
pub struct JpegModule {
    _loaded: (),
}

impl JpegModule {
    pub fn encode(&self, pixels: &PixelBuffer, quality: Quality) -> Result<Vec<u8>> {
        encoder::encode_jpeg(pixels, quality)
    }
}

/// Lossless PNG writer.
#[derive(Debug)]
pub struct PngModule {
    _loaded: (),
}

impl PngModule {
    pub fn encode(&self, pixels: &PixelBuffer) -> Result<Vec<u8>> {
        encoder::encode_png(pixels)
    }
}

/// Lossless PNG size optimizer (oxipng) at a fixed effort level.
#[derive(Debug)]
pub struct OxipngModule {
    level: u8,
}

impl OxipngModule {
    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn optimize(&self, png: &[u8]) -> Result<Vec<u8>> {
        encoder::optimize_png(png, self.level)
    }
}

/// Registry of lazily loaded portable codec handles.
pub struct PortableCodecs {
    loader: Box<dyn ModuleLoader>,
    webp: OnceLock<WebpModule>,
    jpeg: OnceLock<JpegModule>,
    png: OnceLock<PngModule>,
    oxipng: OnceLock<OxipngModule>,
}

impl Default for PortableCodecs {
    fn default() -> Self {
        Self::with_loader(LinkedModuleLoader)
    }
}

impl PortableCodecs {
    pub fn with_loader(loader: impl ModuleLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            webp: OnceLock::new(),
            jpeg: OnceLock::new(),
            png: OnceLock::new(),
            oxipng: OnceLock::new(),
        }
    }

    /// Process-wide registry over the linked codecs.
    pub fn global() -> Arc<PortableCodecs> {
        GLOBAL_CODECS
            .get_or_init(|| Arc::new(PortableCodecs::default()))
            .clone()
    }

    pub fn webp(&self) -> Result<&WebpModule> {
        self.load_once(&self.webp, CodecModule::Webp, || WebpModule {
            method: WEBP_METHOD,
        })
    }

    pub fn jpeg(&self) -> Result<&JpegModule> {
        self.load_once(&self.jpeg, CodecModule::Mozjpeg, || JpegModule { _loaded: () })
    }

    pub fn png(&self) -> Result<&PngModule> {
        self.load_once(&self.png, CodecModule::Png, || PngModule { _loaded: () })
    }

    pub fn oxipng(&self) -> Result<&OxipngModule> {
        self.load_once(&self.oxipng, CodecModule::Oxipng, || OxipngModule {
            level: PNG_OPTIMIZATION_LEVEL,
        })
    }

    pub fn is_loaded(&self, module: CodecModule) -> bool {
        match module {
            CodecModule::Webp => self.webp.get().is_some(),
            CodecModule::Mozjpeg => self.jpeg.get().is_some(),
            CodecModule::Png => self.png.get().is_some(),
            CodecModule::Oxipng => self.oxipng.get().is_some(),
        }
    }

    fn load_once<'a, M>(
        &self,
        cell: &'a OnceLock<M>,
        module: CodecModule,
        make: impl FnOnce() -> M,
    ) -> Result<&'a M> {
        if let Some(handle) = cell.get() {
            return Ok(handle);
        }
        // Concurrent first callers may both run the loader; the first handle stored wins.
        self.loader.load(module).map_err(|message| {
            warn!(module = module.name(), %message, "codec module failed to load");
            ImageBatchError::module_load_failed(module.name(), message)
        })?;
        let handle = cell.get_or_init(|| {
            info!(module = module.name(), "codec module loaded");
            make()
        });
        Ok(handle)
    }
}
