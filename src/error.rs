// src/error.rs
//
// Unified error handling for image-batcher
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy:
// - UserError: Invalid input, recoverable
// - CodecError: Format/encoding issues
// - ResourceLimit: Memory/context/module limits
// - InternalBug: Library bugs (should not happen)
//
// Independently of the category, every task-level error maps onto the small
// wire taxonomy (`ErrorCode`) that travels with an error response from an
// execution unit back to the pool coordinator.

use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Error taxonomy used to decide whether a caller can act on an error.
///
/// - UserError: Invalid input, recoverable by user
/// - CodecError: Format/encoding issues
/// - ResourceLimit: Memory/context/module limits
/// - InternalBug: Library bugs (should not happen)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCategory {
    /// Invalid input, recoverable by user
    UserError,
    /// Format/encoding issues
    CodecError,
    /// Memory/context/module limits
    ResourceLimit,
    /// Library bugs (should not happen)
    InternalBug,
}

impl ErrorCategory {
    /// Get string representation of error category
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "UserError",
            ErrorCategory::CodecError => "CodecError",
            ErrorCategory::ResourceLimit => "ResourceLimit",
            ErrorCategory::InternalBug => "InternalBug",
        }
    }
}

/// Machine-readable failure code carried by an execution unit's error
/// response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ValidationError,
    DecodeError,
    ContextUnavailable,
    ModuleLoadFailed,
    EncodingFailed,
    UnsupportedFormat,
    Cancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::DecodeError => "DECODE_ERROR",
            ErrorCode::ContextUnavailable => "CONTEXT_UNAVAILABLE",
            ErrorCode::ModuleLoadFailed => "MODULE_LOAD_FAILED",
            ErrorCode::EncodingFailed => "ENCODING_FAILED",
            ErrorCode::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorCode::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// image-batcher error types
#[derive(Debug, Error)]
pub enum ImageBatchError {
    // Validation Errors
    #[error("Invalid input: {message}")]
    Validation { message: Cow<'static, str> },

    #[error("Task id '{id}' was already used in this pool")]
    DuplicateTaskId { id: Cow<'static, str> },

    // Decode Errors
    #[error("Unsupported image format: {format}")]
    UnsupportedFormat { format: Cow<'static, str> },

    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: Cow<'static, str> },

    // Size Limit Errors
    #[error("Image dimension {dimension} exceeds maximum {max}")]
    DimensionExceedsLimit { dimension: u32, max: u32 },

    #[error("Image pixel count {pixels} exceeds maximum {max}")]
    PixelCountExceedsLimit { pixels: u64, max: u64 },

    // Drawing Errors
    #[error("Drawing surface unavailable: {message}")]
    ContextUnavailable { message: Cow<'static, str> },

    #[error("Resize failed ({source_width}x{source_height} -> {target_width}x{target_height}): {message}")]
    ResizeFailed {
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
        message: Cow<'static, str>,
    },

    // Encode Errors
    #[error("Failed to load codec module '{module}': {message}")]
    ModuleLoadFailed {
        module: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    #[error("Background removal failed: {message}")]
    BackgroundRemovalFailed { message: Cow<'static, str> },

    // Lifecycle Errors
    #[error("Task was cancelled")]
    Cancelled,

    #[error("Failed to start execution unit: {source}")]
    WorkerSpawnFailed {
        #[source]
        source: std::io::Error,
    },

    // Internal Errors
    #[error("Internal error: {message}")]
    InternalPanic { message: Cow<'static, str> },
}

impl Clone for ImageBatchError {
    fn clone(&self) -> Self {
        match self {
            Self::Validation { message } => Self::Validation {
                message: message.clone(),
            },
            Self::DuplicateTaskId { id } => Self::DuplicateTaskId { id: id.clone() },
            Self::UnsupportedFormat { format } => Self::UnsupportedFormat {
                format: format.clone(),
            },
            Self::DecodeFailed { message } => Self::DecodeFailed {
                message: message.clone(),
            },
            Self::DimensionExceedsLimit { dimension, max } => Self::DimensionExceedsLimit {
                dimension: *dimension,
                max: *max,
            },
            Self::PixelCountExceedsLimit { pixels, max } => Self::PixelCountExceedsLimit {
                pixels: *pixels,
                max: *max,
            },
            Self::ContextUnavailable { message } => Self::ContextUnavailable {
                message: message.clone(),
            },
            Self::ResizeFailed {
                source_width,
                source_height,
                target_width,
                target_height,
                message,
            } => Self::ResizeFailed {
                source_width: *source_width,
                source_height: *source_height,
                target_width: *target_width,
                target_height: *target_height,
                message: message.clone(),
            },
            Self::ModuleLoadFailed { module, message } => Self::ModuleLoadFailed {
                module: module.clone(),
                message: message.clone(),
            },
            Self::EncodeFailed { format, message } => Self::EncodeFailed {
                format: format.clone(),
                message: message.clone(),
            },
            Self::BackgroundRemovalFailed { message } => Self::BackgroundRemovalFailed {
                message: message.clone(),
            },
            Self::Cancelled => Self::Cancelled,
            Self::WorkerSpawnFailed { source } => Self::WorkerSpawnFailed {
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Self::InternalPanic { message } => Self::InternalPanic {
                message: message.clone(),
            },
        }
    }
}

// Constructor Helpers
impl ImageBatchError {
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn duplicate_task_id(id: impl Into<Cow<'static, str>>) -> Self {
        Self::DuplicateTaskId { id: id.into() }
    }

    pub fn unsupported_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn decode_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn dimension_exceeds_limit(dimension: u32, max: u32) -> Self {
        Self::DimensionExceedsLimit { dimension, max }
    }

    pub fn pixel_count_exceeds_limit(pixels: u64, max: u64) -> Self {
        Self::PixelCountExceedsLimit { pixels, max }
    }

    pub fn context_unavailable(message: impl Into<Cow<'static, str>>) -> Self {
        Self::ContextUnavailable {
            message: message.into(),
        }
    }

    pub fn resize_failed(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::ResizeFailed {
            source_width: source_dims.0,
            source_height: source_dims.1,
            target_width: target_dims.0,
            target_height: target_dims.1,
            message: message.into(),
        }
    }

    pub fn module_load_failed(
        module: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::ModuleLoadFailed {
            module: module.into(),
            message: message.into(),
        }
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn background_removal_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::BackgroundRemovalFailed {
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::Cancelled
    }

    pub fn worker_spawn_failed(source: std::io::Error) -> Self {
        Self::WorkerSpawnFailed { source }
    }

    pub fn internal_panic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InternalPanic {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (user can fix it)
    ///
    /// This method is consistent with category():
    /// - UserError errors are always recoverable
    /// - ResourceLimit errors are recoverable (retry later, smaller image, etc.)
    /// - CodecError and InternalBug errors are not recoverable
    pub fn is_recoverable(&self) -> bool {
        match self.category() {
            ErrorCategory::UserError | ErrorCategory::ResourceLimit => true,
            ErrorCategory::CodecError | ErrorCategory::InternalBug => false,
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. }
            | Self::DuplicateTaskId { .. }
            | Self::Cancelled => ErrorCategory::UserError,

            Self::UnsupportedFormat { .. }
            | Self::DecodeFailed { .. }
            | Self::EncodeFailed { .. }
            | Self::BackgroundRemovalFailed { .. }
            | Self::ResizeFailed { .. } => ErrorCategory::CodecError,

            Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. }
            | Self::ContextUnavailable { .. }
            | Self::ModuleLoadFailed { .. }
            | Self::WorkerSpawnFailed { .. } => ErrorCategory::ResourceLimit,

            Self::InternalPanic { .. } => ErrorCategory::InternalBug,
        }
    }

    /// Wire code reported alongside the message in an error response.
    ///
    /// Background-removal failures come from an opaque collaborator and
    /// carry no code.
    pub fn code(&self) -> Option<ErrorCode> {
        let code = match self {
            Self::Validation { .. }
            | Self::DuplicateTaskId { .. } => ErrorCode::ValidationError,

            Self::DecodeFailed { .. }
            | Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. } => ErrorCode::DecodeError,

            Self::ContextUnavailable { .. }
            | Self::ResizeFailed { .. }
            | Self::WorkerSpawnFailed { .. } => ErrorCode::ContextUnavailable,

            Self::ModuleLoadFailed { .. } => ErrorCode::ModuleLoadFailed,
            Self::EncodeFailed { .. } | Self::InternalPanic { .. } => ErrorCode::EncodingFailed,
            Self::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::BackgroundRemovalFailed { .. } => return None,
        };
        Some(code)
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, ImageBatchError>;
