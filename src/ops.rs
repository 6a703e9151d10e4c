// src/ops.rs
//
// Task payloads exchanged between the pool and its execution units.
// These are plain owned data - the expensive work happens in the engine.

use crate::error::{ImageBatchError, Result};
use image::ImageFormat;

/// Quality used when a request does not carry one.
pub const DEFAULT_QUALITY: u8 = 80;

/// Output formats the router knows how to produce.
///
/// WebP has both a native and a portable path, JPEG and PNG are always
/// produced by the portable codecs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    WebP,
    Jpeg,
    Png,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::WebP, OutputFormat::Jpeg, OutputFormat::Png];

    /// Parse a target given as an extension (`webp`, `jpg`, `.png`) or a mime
    /// type (`image/jpeg`). Anything else is `UnsupportedFormat`.
    pub fn parse(format: &str) -> Result<Self> {
        let normalized = format.trim().trim_start_matches('.').to_ascii_lowercase();
        let name = normalized.strip_prefix("image/").unwrap_or(&normalized);
        match name {
            "webp" => Ok(Self::WebP),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            _ => Err(ImageBatchError::unsupported_format(format.to_string())),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::WebP => "image/webp",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::WebP => "webp",
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebP => "webp",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        }
    }

    pub(crate) fn image_format(&self) -> ImageFormat {
        match self {
            Self::WebP => ImageFormat::WebP,
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
        }
    }
}

/// Encoder quality, always within 1..=100.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quality(u8);

impl Quality {
    /// Clamp an arbitrary caller value into 1..=100.
    pub fn new(raw: i32) -> Self {
        Self(raw.clamp(1, 100) as u8)
    }

    pub fn from_option(raw: Option<i32>) -> Self {
        raw.map(Self::new).unwrap_or_default()
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(DEFAULT_QUALITY)
    }
}

/// Raw RGBA8 pixels, row-major, `width * height * 4` bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    samples: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, samples: Vec<u8>) -> Result<Self> {
        let expected = (width as u64) * (height as u64) * 4;
        if samples.len() as u64 != expected {
            return Err(ImageBatchError::validation(format!(
                "pixel buffer for {width}x{height} needs {expected} bytes, got {}",
                samples.len()
            )));
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    /// A buffer filled with a single RGBA color.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let count = (width as usize) * (height as usize);
        let mut samples = Vec::with_capacity(count * 4);
        for _ in 0..count {
            samples.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            samples,
        }
    }

    pub fn from_rgba_image(image: image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            samples: image.into_raw(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn samples(&self) -> &[u8] {
        &self.samples
    }
}

/// Re-encode request for one image.
#[derive(Clone, Debug)]
pub struct EncodingRequest {
    pub source_bytes: Vec<u8>,
    pub source_mime_type: String,
    /// Raw target as the caller gave it; parsed by the execution unit.
    pub target_format: String,
    pub quality: Option<i32>,
    pub target_width: Option<u32>,
    pub target_height: Option<u32>,
}

impl EncodingRequest {
    pub fn new(
        source_bytes: Vec<u8>,
        source_mime_type: impl Into<String>,
        target_format: impl Into<String>,
    ) -> Self {
        Self {
            source_bytes,
            source_mime_type: source_mime_type.into(),
            target_format: target_format.into(),
            quality: None,
            target_width: None,
            target_height: None,
        }
    }

    pub fn with_quality(mut self, quality: i32) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_dimensions(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.target_width = width;
        self.target_height = height;
        self
    }
}

/// Background-removal request. The output is always PNG.
#[derive(Clone, Debug)]
pub struct RemovalRequest {
    pub source_bytes: Vec<u8>,
    pub source_mime_type: String,
}

impl RemovalRequest {
    pub fn new(source_bytes: Vec<u8>, source_mime_type: impl Into<String>) -> Self {
        Self {
            source_bytes,
            source_mime_type: source_mime_type.into(),
        }
    }
}

/// Work carried by a task.
#[derive(Clone, Debug)]
pub enum Job {
    Encode(EncodingRequest),
    RemoveBackground(RemovalRequest),
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::Encode(_) => "encode",
            Job::RemoveBackground(_) => "removeBackground",
        }
    }

    /// Mime type a successful result of this job carries.
    pub fn output_mime_type(&self) -> &'static str {
        match self {
            Job::Encode(request) => OutputFormat::parse(&request.target_format)
                .map(|format| format.mime_type())
                .unwrap_or("application/octet-stream"),
            Job::RemoveBackground(_) => OutputFormat::Png.mime_type(),
        }
    }
}

/// Encoded output handed back to the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodingResult {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub byte_length: usize,
}

impl EncodingResult {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        let byte_length = bytes.len();
        Self {
            bytes,
            mime_type: mime_type.into(),
            byte_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_parse_extensions_and_mimes() {
        assert_eq!(OutputFormat::parse("webp").unwrap(), OutputFormat::WebP);
        assert_eq!(OutputFormat::parse("JPG").unwrap(), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::parse(".jpeg").unwrap(), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::parse("image/png").unwrap(), OutputFormat::Png);
    }

    #[test]
    fn test_parse_rejects_unknown_targets() {
        for target in ["tiff", "avif", "gif", "", "image/bmp"] {
            let err = OutputFormat::parse(target).unwrap_err();
            assert_eq!(err.code(), Some(ErrorCode::UnsupportedFormat), "{target}");
        }
    }

    #[test]
    fn test_quality_clamps() {
        assert_eq!(Quality::new(0).get(), 1);
        assert_eq!(Quality::new(-20).get(), 1);
        assert_eq!(Quality::new(150).get(), 100);
        assert_eq!(Quality::new(75).get(), 75);
        assert_eq!(Quality::from_option(None).get(), DEFAULT_QUALITY);
    }

    #[test]
    fn test_pixel_buffer_length_checked() {
        assert!(PixelBuffer::new(2, 2, vec![0; 16]).is_ok());
        assert!(PixelBuffer::new(2, 2, vec![0; 12]).is_err());
        let filled = PixelBuffer::filled(3, 2, [1, 2, 3, 4]);
        assert_eq!(filled.samples().len(), 24);
        assert_eq!(&filled.samples()[4..8], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_job_output_mime() {
        let encode = Job::Encode(EncodingRequest::new(vec![], "image/png", "jpg"));
        assert_eq!(encode.output_mime_type(), "image/jpeg");
        assert_eq!(encode.kind(), "encode");

        let removal = Job::RemoveBackground(RemovalRequest::new(vec![], "image/jpeg"));
        assert_eq!(removal.output_mime_type(), "image/png");
    }

    #[test]
    fn test_result_byte_length_matches() {
        let result = EncodingResult::new(vec![1, 2, 3], "image/png");
        assert_eq!(result.byte_length, 3);
    }
}
