// src/codecs/mod.rs
//
// Portable codec modules: lazily loaded, process-wide handles to the
// platform-independent encoders.

pub mod portable;

pub use portable::{
    CodecModule, JpegModule, LinkedModuleLoader, ModuleLoader, OxipngModule, PngModule,
    PortableCodecs, WebpModule,
};
