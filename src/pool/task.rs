// src/pool/task.rs
//
// Task bookkeeping owned by the coordinator, and the caller-side handle.

use crate::error::{ErrorCode, ImageBatchError};
use crate::ops::{EncodingResult, Job};
use crate::progress::{ProgressEvent, ProgressSink, Stage};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Opaque task identifier, unique for the lifetime of one pool.
///
/// Ids minted by the pool never compare equal to caller-supplied ids, even
/// when they render the same.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    name: Arc<str>,
    generated: bool,
}

impl TaskId {
    pub(crate) fn generated(sequence: u64) -> Self {
        Self {
            name: Arc::from(format!("task-{sequence}")),
            generated: true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// True when the pool minted this id.
    pub fn is_generated(&self) -> bool {
        self.generated
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self {
            name: Arc::from(value),
            generated: false,
        }
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self {
            name: Arc::from(value),
            generated: false,
        }
    }
}

/// Lifecycle of a task inside the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Assigned,
    Running,
    Succeeded,
    Failed,
}

/// Cooperative cancellation flag shared between a handle and its unit.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once the flag is set.
    pub fn check(&self) -> Result<(), ImageBatchError> {
        if self.is_cancelled() {
            Err(ImageBatchError::cancelled())
        } else {
            Ok(())
        }
    }
}

/// Why a task did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The execution unit reported an error.
    #[error("{message}")]
    Failed {
        message: String,
        code: Option<ErrorCode>,
    },
    /// The pool went away before the task settled.
    #[error("task abandoned: pool was torn down before it settled")]
    Abandoned,
}

impl TaskError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            TaskError::Failed { code, .. } => *code,
            TaskError::Abandoned => None,
        }
    }
}

impl From<ImageBatchError> for TaskError {
    fn from(err: ImageBatchError) -> Self {
        TaskError::Failed {
            message: err.to_string(),
            code: err.code(),
        }
    }
}

pub type TaskOutcome = Result<EncodingResult, TaskError>;

pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) job: Option<Job>,
    pub(crate) kind: &'static str,
    pub(crate) output_mime: &'static str,
    pub(crate) state: TaskState,
    pub(crate) cancel: CancelToken,
    last_stage: Option<Stage>,
    progress: Option<ProgressSink>,
    reply: Sender<TaskOutcome>,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        job: Job,
        cancel: CancelToken,
        progress: Option<ProgressSink>,
        reply: Sender<TaskOutcome>,
    ) -> Self {
        Self {
            id,
            kind: job.kind(),
            output_mime: job.output_mime_type(),
            job: Some(job),
            state: TaskState::Queued,
            cancel,
            last_stage: None,
            progress,
            reply,
        }
    }

    /// Forward a stage to the sink unless it would not move progress forward.
    pub(crate) fn report(&mut self, stage: Stage) {
        if let Some(last) = self.last_stage {
            if stage <= last {
                if stage < last {
                    debug!(task_id = %self.id, ?stage, ?last, "backward progress dropped");
                }
                return;
            }
        }
        self.last_stage = Some(stage);
        if let Some(sink) = self.progress.as_mut() {
            sink(ProgressEvent {
                task_id: self.id.clone(),
                stage,
            });
        }
    }

    /// Emit the final stage and deliver the outcome. Consumes the task.
    pub(crate) fn settle(mut self, outcome: TaskOutcome) {
        self.state = if outcome.is_ok() {
            TaskState::Succeeded
        } else {
            TaskState::Failed
        };
        self.report(Stage::Finished);
        debug!(task_id = %self.id, kind = self.kind, state = ?self.state, "task settled");
        // The caller may have dropped its handle.
        let _ = self.reply.send(outcome);
    }
}

/// Caller side of a submitted task. Yields its outcome at most once.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    outcome: Receiver<TaskOutcome>,
    cancel: CancelToken,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, outcome: Receiver<TaskOutcome>, cancel: CancelToken) -> Self {
        Self {
            id,
            outcome,
            cancel,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Ask the task to stop. A queued task is failed without being
    /// dispatched; a running one stops at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the task settles.
    pub fn wait(self) -> TaskOutcome {
        self.outcome.recv().unwrap_or(Err(TaskError::Abandoned))
    }

    /// Block for at most `timeout`; hands the handle back if the task is
    /// still pending.
    pub fn wait_timeout(self, timeout: Duration) -> Result<TaskOutcome, TaskHandle> {
        match self.outcome.recv_timeout(timeout) {
            Ok(outcome) => Ok(outcome),
            Err(RecvTimeoutError::Disconnected) => Ok(Err(TaskError::Abandoned)),
            Err(RecvTimeoutError::Timeout) => Err(self),
        }
    }

    /// Non-blocking poll; hands the handle back if the task is still pending.
    pub fn try_wait(self) -> Result<TaskOutcome, TaskHandle> {
        match self.outcome.try_recv() {
            Ok(outcome) => Ok(outcome),
            Err(TryRecvError::Disconnected) => Ok(Err(TaskError::Abandoned)),
            Err(TryRecvError::Empty) => Err(self),
        }
    }

    pub(crate) fn receiver(&self) -> &Receiver<TaskOutcome> {
        &self.outcome
    }
}
