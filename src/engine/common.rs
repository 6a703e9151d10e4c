// src/engine/common.rs
//
// Common utilities shared across engine modules.
// Provides the codec panic policy and the engine-wide Result alias.

use crate::error::ImageBatchError;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

pub type EngineResult<T> = std::result::Result<T, ImageBatchError>;

/// Run a codec call, turning a panic inside it into an ordinary error.
///
/// `label` is `<stage>:<codec>`, e.g. `decode:mozjpeg` or `encode:webp`.
/// Decode-stage panics become `DecodeFailed`, encode-stage panics become
/// `EncodeFailed` for the named codec, anything else is `InternalPanic`.
pub fn run_with_panic_policy<T, F>(label: &'static str, f: F) -> EngineResult<T>
where
    F: FnOnce() -> EngineResult<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(label, %message, "codec panicked");
            Err(panic_to_error(label, message))
        }
    }
}

fn panic_to_error(label: &'static str, message: String) -> ImageBatchError {
    let (stage, codec) = label.split_once(':').unwrap_or((label, "unknown"));
    let detail = format!("{codec} panicked: {message}");
    match stage {
        "decode" => ImageBatchError::decode_failed(detail),
        "encode" => {
            let format = codec.split(':').next().unwrap_or(codec);
            ImageBatchError::encode_failed(format, detail)
        }
        _ => ImageBatchError::internal_panic(format!("{label}: {detail}")),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_ok_passes_through() {
        let value = run_with_panic_policy("decode:png", || Ok(7)).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_error_passes_through() {
        let err = run_with_panic_policy::<(), _>("encode:jpeg", || {
            Err(ImageBatchError::encode_failed("jpeg", "bad"))
        })
        .unwrap_err();
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn test_decode_panic_maps_to_decode_error() {
        let err = run_with_panic_policy::<(), _>("decode:mozjpeg", || panic!("corrupt huffman"))
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::DecodeError));
        assert!(err.to_string().contains("corrupt huffman"));
    }

    #[test]
    fn test_encode_panic_maps_to_encoding_failed() {
        let err = run_with_panic_policy::<(), _>("encode:webp", || {
            panic!("{}", String::from("libwebp abort"))
        })
        .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::EncodingFailed));
        match err {
            ImageBatchError::EncodeFailed { format, .. } => assert_eq!(format, "webp"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_other_stage_is_internal() {
        let err = run_with_panic_policy::<(), _>("resize", || panic!("oops")).unwrap_err();
        assert!(matches!(err, ImageBatchError::InternalPanic { .. }));
    }
}
