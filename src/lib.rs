// lib.rs
//
// image-batcher: on-device batch image transformation
//
// Design goals:
// - Bounded parallelism (at most two execution units at a time)
// - Every response correlated back to its task by id
// - Native encoder only where it is proven trustworthy, portable otherwise
// - Smallest output wins for formats with two candidate encoders

// Memory allocator optimization - jemalloc for the large codec buffers
// Note: jemalloc is not supported on Windows/MSVC, so we exclude it on that platform
#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub mod batch;
pub mod codecs;
pub mod engine;
pub mod error;
pub mod intake;
pub mod ops;
pub mod pool;
pub mod progress;

pub use engine::{BackgroundRemover, CapabilityProbe, CodecRouter, ImageProcessor, RasterSurface};
pub use error::{ErrorCategory, ErrorCode, ImageBatchError, Result};
pub use ops::{
    EncodingRequest, EncodingResult, Job, OutputFormat, PixelBuffer, Quality, RemovalRequest,
};
pub use pool::{PoolConfig, PoolStatus, TaskError, TaskHandle, TaskId, WorkerPool, MAX_WORKERS};
pub use progress::{ProgressEvent, ProgressSink, Stage};

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static TRACING: OnceLock<()> = OnceLock::new();

/// Install a compact `tracing` subscriber filtered by `RUST_LOG`
/// (default `info`). Safe to call more than once; only the first call
/// installs anything, and an already-installed global subscriber is kept.
pub fn init_tracing() {
    TRACING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_names(true)
            .compact()
            .try_init();
    });
}
