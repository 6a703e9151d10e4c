// src/pool.rs
//
// Bounded worker pool.
//
// A single coordinator thread owns the pending tasks and the worker slots.
// Callers talk to it through one inbox channel; execution units report back
// through the same inbox, so every state change is serialized.
//
// **Sizing**: the pool never runs more than MAX_WORKERS units. The portable
// codecs allocate large intermediate buffers per task, so the bound is on
// memory, not CPU.
//
// **Teardown**: pending tasks are abandoned, never fabricated into results.
// Their handles observe `TaskError::Abandoned`.

mod coordinator;
mod messages;
mod task;
mod unit;

pub use messages::{UnitRequest, UnitResponse};
pub use task::{CancelToken, TaskError, TaskHandle, TaskId, TaskOutcome, TaskState};
pub use unit::TaskProcessor;

use crate::error::{ImageBatchError, Result};
use crate::ops::Job;
use crate::progress::ProgressSink;
use coordinator::{Coordinator, PoolCounters};
use crossbeam_channel::{bounded, unbounded, Sender};
use messages::Inbox;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use task::Task;
use tracing::{info, warn};

/// Hard upper bound on concurrently running execution units.
pub const MAX_WORKERS: usize = 2;

/// Environment variable overriding the pool size (clamped to 1..=MAX_WORKERS).
pub const WORKERS_ENV: &str = "IMAGE_BATCHER_WORKERS";

/// Pool sizing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolConfig {
    /// Explicit size; `None` derives it from available parallelism.
    pub size: Option<usize>,
}

impl PoolConfig {
    pub fn with_size(size: usize) -> Self {
        Self { size: Some(size) }
    }

    /// Read the size override from `IMAGE_BATCHER_WORKERS`. Unparseable
    /// values are ignored.
    pub fn from_env() -> Self {
        Self::from_raw(std::env::var(WORKERS_ENV).ok().as_deref())
    }

    fn from_raw(raw: Option<&str>) -> Self {
        let size = raw.and_then(|raw| match raw.trim().parse::<usize>() {
            Ok(size) => Some(size),
            Err(_) => {
                warn!(var = WORKERS_ENV, value = raw, "ignoring unparseable pool size override");
                None
            }
        });
        Self { size }
    }

    /// Number of units the pool will run.
    pub fn effective_size(&self) -> usize {
        match self.size {
            Some(size) => size.clamp(1, MAX_WORKERS),
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(MAX_WORKERS),
        }
    }
}

/// Point-in-time snapshot of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub total_workers: usize,
    pub busy_workers: usize,
    /// Tasks not yet settled, assigned or not.
    pub queue_length: usize,
}

pub struct WorkerPool {
    inbox: Sender<Inbox>,
    counters: Arc<PoolCounters>,
    next_id: AtomicU64,
    coordinator: Option<JoinHandle<()>>,
    size: usize,
}

impl WorkerPool {
    /// Start the execution units and the coordinator.
    pub fn new(config: PoolConfig, processor: Arc<dyn TaskProcessor>) -> Result<Self> {
        let size = config.effective_size();
        let (inbox, receiver) = unbounded();
        let counters = Arc::new(PoolCounters::default());

        let coordinator =
            Coordinator::new(size, processor, receiver, inbox.clone(), counters.clone())?;
        let handle = std::thread::Builder::new()
            .name("image-batcher-coordinator".to_string())
            .spawn(move || coordinator.run())
            .map_err(ImageBatchError::worker_spawn_failed)?;

        info!(workers = size, "worker pool started");
        Ok(Self {
            inbox,
            counters,
            next_id: AtomicU64::new(0),
            coordinator: Some(handle),
            size,
        })
    }

    pub fn with_size(size: usize, processor: Arc<dyn TaskProcessor>) -> Result<Self> {
        Self::new(PoolConfig::with_size(size), processor)
    }

    pub fn submit(&self, job: Job) -> TaskHandle {
        let id = self.generate_id();
        self.submit_with_id(id, job, None)
    }

    pub fn submit_with_progress(&self, job: Job, progress: ProgressSink) -> TaskHandle {
        let id = self.generate_id();
        self.submit_with_id(id, job, Some(progress))
    }

    /// Submit under a caller-chosen id. If the id was already used by any
    /// task of this pool, the new task fails with a validation error.
    pub fn submit_with_id(
        &self,
        id: impl Into<TaskId>,
        job: Job,
        progress: Option<ProgressSink>,
    ) -> TaskHandle {
        let id = id.into();
        let cancel = CancelToken::new();
        let (reply, outcome) = bounded(1);
        let task = Task::new(id.clone(), job, cancel.clone(), progress, reply);

        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        if self.inbox.send(Inbox::Submit(task)).is_err() {
            // Coordinator gone: the task was dropped with the message, so
            // the handle reports Abandoned.
            self.counters.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(task_id = %id, "submit after pool shutdown");
        }
        TaskHandle::new(id, outcome, cancel)
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            total_workers: self.size,
            busy_workers: self.counters.busy.load(Ordering::SeqCst),
            queue_length: self.counters.pending.load(Ordering::SeqCst),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Terminate every unit. Pending handles observe `Abandoned`.
    pub fn shutdown(self) {
        drop(self);
    }

    fn generate_id(&self) -> TaskId {
        TaskId::generated(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let _ = self.inbox.send(Inbox::Shutdown);
        if let Some(handle) = self.coordinator.take() {
            if handle.join().is_err() {
                warn!("pool coordinator panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::EncodingRequest;
    use crate::progress::Stage;

    struct Echo;

    impl TaskProcessor for Echo {
        fn process(
            &self,
            job: Job,
            _: &CancelToken,
            progress: &mut dyn FnMut(Stage),
        ) -> Result<Vec<u8>> {
            progress(Stage::Started);
            match job {
                Job::Encode(request) => Ok(request.source_bytes),
                Job::RemoveBackground(request) => Ok(request.source_bytes),
            }
        }
    }

    fn job(bytes: &[u8]) -> Job {
        Job::Encode(EncodingRequest::new(bytes.to_vec(), "image/png", "png"))
    }

    #[test]
    fn test_effective_size_clamped() {
        assert_eq!(PoolConfig::with_size(0).effective_size(), 1);
        assert_eq!(PoolConfig::with_size(1).effective_size(), 1);
        assert_eq!(PoolConfig::with_size(64).effective_size(), MAX_WORKERS);
        let derived = PoolConfig::default().effective_size();
        assert!((1..=MAX_WORKERS).contains(&derived));
    }

    #[test]
    fn test_env_override_parsed_and_clamped() {
        assert_eq!(PoolConfig::from_raw(None), PoolConfig::default());
        assert_eq!(PoolConfig::from_raw(Some("1")), PoolConfig::with_size(1));
        assert_eq!(PoolConfig::from_raw(Some(" 2 \n")), PoolConfig::with_size(2));
        assert_eq!(PoolConfig::from_raw(Some("9")).effective_size(), MAX_WORKERS);
        assert_eq!(PoolConfig::from_raw(Some("0")).effective_size(), 1);
    }

    #[test]
    fn test_env_override_garbage_ignored() {
        for raw in ["", "two", "-1", "1.5"] {
            assert_eq!(PoolConfig::from_raw(Some(raw)), PoolConfig::default(), "{raw:?}");
        }
    }

    #[test]
    fn test_from_env_reads_variable() {
        std::env::set_var(WORKERS_ENV, "1");
        let config = PoolConfig::from_env();
        std::env::remove_var(WORKERS_ENV);
        assert_eq!(config.effective_size(), 1);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let pool = WorkerPool::with_size(2, Arc::new(Echo)).unwrap();
        let a = pool.submit(job(b"a"));
        let b = pool.submit(job(b"b"));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.wait().unwrap().bytes, b"a".to_vec());
        assert_eq!(b.wait().unwrap().bytes, b"b".to_vec());
    }

    #[test]
    fn test_status_settles_to_idle() {
        let pool = WorkerPool::with_size(1, Arc::new(Echo)).unwrap();
        assert_eq!(pool.size(), 1);
        pool.submit(job(b"x")).wait().unwrap();
        let status = pool.status();
        assert_eq!(status.total_workers, 1);
        assert_eq!(status.busy_workers, 0);
        assert_eq!(status.queue_length, 0);
    }

    #[test]
    fn test_result_carries_job_mime() {
        let pool = WorkerPool::with_size(1, Arc::new(Echo)).unwrap();
        let request = EncodingRequest::new(vec![7], "image/png", "jpg");
        let result = pool.submit(Job::Encode(request)).wait().unwrap();
        assert_eq!(result.mime_type, "image/jpeg");
        assert_eq!(result.byte_length, 1);
    }
}
