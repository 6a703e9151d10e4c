// src/engine.rs
//
// The encoding engine an execution unit runs:
// 1. Decode source bytes to RGBA (decoder.rs)
// 2. Draw onto a surface at the target size (pipeline.rs)
// 3. Route to native and/or portable encoders per output format (router.rs)
//
// This file is a facade over the modules in engine/.

// =============================================================================
// SECURITY LIMITS
// =============================================================================

/// Maximum allowed image dimension (width or height).
/// Images larger than 32768x32768 are rejected to prevent decompression bombs.
pub const MAX_DIMENSION: u32 = 32768;

/// Maximum allowed total pixels (width * height).
/// 100 megapixels = 400MB uncompressed RGBA.
pub const MAX_PIXELS: u64 = 100_000_000;

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

mod common;
mod decoder;
pub(crate) mod encoder;
mod native;
mod pipeline;
mod probe;
mod processor;
mod router;

pub use common::{run_with_panic_policy, EngineResult};
pub use decoder::{check_dimensions, decode_image, detect_format, resolve_source_format};
pub use encoder::{
    encode_jpeg, encode_png, encode_webp, optimize_png, QualitySettings, PNG_OPTIMIZATION_LEVEL,
    WEBP_METHOD,
};
pub use native::{BuiltinSurface, NativeBlob, RasterSurface};
pub use pipeline::{allocate_surface, draw_to_surface, resolve_target_dimensions};
pub use probe::CapabilityProbe;
pub use processor::{BackgroundRemover, ImageProcessor};
pub use router::CodecRouter;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::PixelBuffer;

    #[test]
    fn test_limits_are_consistent() {
        assert!(MAX_DIMENSION as u64 * MAX_DIMENSION as u64 > MAX_PIXELS);
        assert!(check_dimensions(MAX_DIMENSION, 1).is_ok());
    }

    #[test]
    fn test_decode_draw_encode_roundtrip_keeps_size() {
        let pixels = PixelBuffer::filled(12, 7, [10, 20, 30, 255]);
        let png = encode_png(&pixels).unwrap();
        let decoded = decode_image(&png, "image/png").unwrap();
        let drawn = draw_to_surface(decoded, 6, 14).unwrap();
        assert_eq!(drawn.dimensions(), (6, 14));
    }
}
