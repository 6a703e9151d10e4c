// src/engine/processor.rs
//
// The per-task program an execution unit runs.
//
// Encode: parse target -> decode -> draw at target size -> encode via router.
// Remove background: hand the source to the configured remover, remap its
// progress onto the stage ladder, and make sure the result is PNG.

use crate::engine::common::EngineResult;
use crate::engine::decoder::decode_image;
use crate::engine::pipeline::{draw_to_surface, resolve_target_dimensions};
use crate::engine::router::CodecRouter;
use crate::error::{ImageBatchError, Result};
use crate::ops::{EncodingRequest, Job, OutputFormat, Quality, RemovalRequest};
use crate::pool::{CancelToken, TaskProcessor};
use crate::progress::{removal_stage, Stage};
use std::sync::Arc;
use tracing::debug;

/// Black-box background removal model.
///
/// `on_progress(phase, current, total)` may be called any number of times.
/// The returned image should be lossless RGBA; anything other than PNG is
/// re-encoded.
pub trait BackgroundRemover: Send + Sync {
    fn remove_background(
        &self,
        source: &[u8],
        mime_type: &str,
        on_progress: &mut dyn FnMut(&str, u64, u64),
    ) -> std::result::Result<Vec<u8>, String>;
}

#[derive(Clone, Default)]
pub struct ImageProcessor {
    router: CodecRouter,
    remover: Option<Arc<dyn BackgroundRemover>>,
}

impl ImageProcessor {
    pub fn new(router: CodecRouter) -> Self {
        Self {
            router,
            remover: None,
        }
    }

    pub fn with_remover(mut self, remover: Arc<dyn BackgroundRemover>) -> Self {
        self.remover = Some(remover);
        self
    }

    fn encode(
        &self,
        request: EncodingRequest,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(Stage),
    ) -> EngineResult<Vec<u8>> {
        progress(Stage::Started);
        // Reject unknown targets before paying for a decode.
        let format = OutputFormat::parse(&request.target_format)?;

        let decoded = decode_image(&request.source_bytes, &request.source_mime_type)?;
        drop(request.source_bytes);
        progress(Stage::Loaded);
        cancel.check()?;

        let (width, height) = resolve_target_dimensions(
            decoded.dimensions(),
            request.target_width,
            request.target_height,
        );
        let pixels = draw_to_surface(decoded, width, height)?;
        progress(Stage::Prepared);

        progress(Stage::Encoding);
        cancel.check()?;
        let result = self
            .router
            .encode(&pixels, format, Quality::from_option(request.quality))?;
        debug!(format = format.as_str(), width, height, bytes = result.byte_length, "encoded");
        Ok(result.bytes)
    }

    fn remove_background(
        &self,
        request: RemovalRequest,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(Stage),
    ) -> EngineResult<Vec<u8>> {
        progress(Stage::Started);
        let Some(remover) = self.remover.as_ref() else {
            return Err(ImageBatchError::encode_failed(
                OutputFormat::Png.as_str(),
                "background removal is not configured",
            ));
        };

        let mut last = Stage::Started;
        let mut on_progress = |phase: &str, current: u64, total: u64| {
            if let Some(stage) = removal_stage(phase, current, total) {
                if stage > last {
                    last = stage;
                    progress(stage);
                }
            }
        };
        let output = remover
            .remove_background(&request.source_bytes, &request.source_mime_type, &mut on_progress)
            .map_err(ImageBatchError::background_removal_failed)?;
        cancel.check()?;

        if image::guess_format(&output).ok() == Some(image::ImageFormat::Png) {
            return Ok(output);
        }
        debug!(bytes = output.len(), "remover returned non-PNG output; re-encoding");
        let pixels = decode_image(&output, "")?;
        let result = self.router.encode(&pixels, OutputFormat::Png, Quality::default())?;
        Ok(result.bytes)
    }
}

impl TaskProcessor for ImageProcessor {
    fn process(
        &self,
        job: Job,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(Stage),
    ) -> Result<Vec<u8>> {
        match job {
            Job::Encode(request) => self.encode(request, cancel, progress),
            Job::RemoveBackground(request) => self.remove_background(request, cancel, progress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use image::{ImageFormat, RgbaImage};
    use std::io::Cursor;

    fn create_test_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x * 9 % 256) as u8, (y * 3 % 256) as u8, 128, 255])
        });
        let mut buf = Cursor::new(Vec::new());
        match format {
            ImageFormat::Jpeg => image::DynamicImage::ImageRgba8(img)
                .to_rgb8()
                .write_to(&mut buf, format)
                .unwrap(),
            _ => img.write_to(&mut buf, format).unwrap(),
        }
        buf.into_inner()
    }

    fn run(processor: &ImageProcessor, job: Job) -> (Result<Vec<u8>>, Vec<Stage>) {
        let mut stages = Vec::new();
        let result = processor.process(job, &CancelToken::new(), &mut |s| stages.push(s));
        (result, stages)
    }

    struct StubRemover {
        output: std::result::Result<Vec<u8>, String>,
    }

    impl BackgroundRemover for StubRemover {
        fn remove_background(
            &self,
            _: &[u8],
            _: &str,
            on_progress: &mut dyn FnMut(&str, u64, u64),
        ) -> std::result::Result<Vec<u8>, String> {
            on_progress("fetch:model", 0, 10);
            on_progress("fetch:model", 10, 10);
            on_progress("fetch:model", 5, 10);
            on_progress("compute:inference", 1, 2);
            on_progress("compute:inference", 2, 2);
            self.output.clone()
        }
    }

    mod encode_tests {
        use super::*;

        #[test]
        fn test_encode_reports_stages_in_order() {
            let source = create_test_image(20, 10, ImageFormat::Png);
            let job = Job::Encode(EncodingRequest::new(source, "image/png", "webp"));
            let (result, stages) = run(&ImageProcessor::default(), job);
            let bytes = result.unwrap();
            assert_eq!(&bytes[8..12], b"WEBP");
            assert_eq!(
                stages,
                vec![Stage::Started, Stage::Loaded, Stage::Prepared, Stage::Encoding]
            );
        }

        #[test]
        fn test_encode_at_target_dimensions() {
            let source = create_test_image(64, 48, ImageFormat::Jpeg);
            let request = EncodingRequest::new(source, "image/jpeg", "png")
                .with_dimensions(Some(20), Some(30));
            let (result, _) = run(&ImageProcessor::default(), Job::Encode(request));
            let decoded = image::load_from_memory(&result.unwrap()).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (20, 30));
        }

        #[test]
        fn test_single_side_override_keeps_other_side() {
            let source = create_test_image(64, 48, ImageFormat::Png);
            let request =
                EncodingRequest::new(source, "image/png", "jpeg").with_dimensions(Some(32), None);
            let (result, _) = run(&ImageProcessor::default(), Job::Encode(request));
            let decoded = image::load_from_memory(&result.unwrap()).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (32, 48));
        }

        #[test]
        fn test_unsupported_target_fails_before_decode() {
            let job = Job::Encode(EncodingRequest::new(vec![0xde, 0xad], "image/png", "tiff"));
            let (result, stages) = run(&ImageProcessor::default(), job);
            assert_eq!(result.unwrap_err().code(), Some(ErrorCode::UnsupportedFormat));
            assert_eq!(stages, vec![Stage::Started]);
        }

        #[test]
        fn test_corrupt_source_is_decode_error() {
            let mut source = create_test_image(16, 16, ImageFormat::Png);
            source.truncate(24);
            let job = Job::Encode(EncodingRequest::new(source, "image/png", "png"));
            let (result, _) = run(&ImageProcessor::default(), job);
            assert_eq!(result.unwrap_err().code(), Some(ErrorCode::DecodeError));
        }

        #[test]
        fn test_cancelled_after_decode() {
            let source = create_test_image(8, 8, ImageFormat::Png);
            let job = Job::Encode(EncodingRequest::new(source, "image/png", "webp"));
            let cancel = CancelToken::new();
            cancel.cancel();
            let mut stages = Vec::new();
            let err = ImageProcessor::default()
                .process(job, &cancel, &mut |s| stages.push(s))
                .unwrap_err();
            assert_eq!(err.code(), Some(ErrorCode::Cancelled));
            assert_eq!(stages, vec![Stage::Started, Stage::Loaded]);
        }
    }

    mod removal_tests {
        use super::*;

        #[test]
        fn test_removal_without_remover_fails() {
            let job = Job::RemoveBackground(RemovalRequest::new(vec![1, 2], "image/png"));
            let (result, _) = run(&ImageProcessor::default(), job);
            let err = result.unwrap_err();
            assert_eq!(err.code(), Some(ErrorCode::EncodingFailed));
            assert!(err.to_string().contains("not configured"));
        }

        #[test]
        fn test_removal_progress_is_remapped_monotonically() {
            let png = create_test_image(4, 4, ImageFormat::Png);
            let processor = ImageProcessor::default().with_remover(Arc::new(StubRemover {
                output: Ok(png.clone()),
            }));
            let job = Job::RemoveBackground(RemovalRequest::new(vec![1], "image/jpeg"));
            let (result, stages) = run(&processor, job);
            assert_eq!(result.unwrap(), png);
            assert_eq!(
                stages,
                vec![Stage::Started, Stage::Loaded, Stage::Prepared, Stage::Encoding]
            );
        }

        #[test]
        fn test_removal_non_png_output_reencoded() {
            let bmp = create_test_image(4, 4, ImageFormat::Bmp);
            let remover = Arc::new(StubRemover { output: Ok(bmp) });
            let processor = ImageProcessor::default().with_remover(remover);
            let job = Job::RemoveBackground(RemovalRequest::new(vec![1], "image/jpeg"));
            let (result, _) = run(&processor, job);
            let bytes = result.unwrap();
            assert_eq!(&bytes[0..8], &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
        }

        #[test]
        fn test_removal_error_is_opaque() {
            let processor = ImageProcessor::default().with_remover(Arc::new(StubRemover {
                output: Err("model exploded".to_string()),
            }));
            let job = Job::RemoveBackground(RemovalRequest::new(vec![1], "image/png"));
            let (result, _) = run(&processor, job);
            let err = result.unwrap_err();
            assert_eq!(err.code(), None);
            assert!(err.to_string().contains("model exploded"));
        }
    }
}
