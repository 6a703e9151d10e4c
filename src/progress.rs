// src/progress.rs
//
// Coarse progress stages reported by execution units and forwarded by the
// pool coordinator to per-task progress sinks.

use crate::pool::TaskId;

/// Pipeline stage with a fixed percentage ordinal.
///
/// Values are ordered: a task never reports a stage lower than one it
/// already reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Work began
    Started,
    /// Source decoded
    Loaded,
    /// Drawn at target size
    Prepared,
    /// Samples extracted, encoding in progress
    Encoding,
    /// Terminal response received (success or failure)
    Finished,
}

impl Stage {
    pub fn percent(self) -> u8 {
        match self {
            Stage::Started => 10,
            Stage::Loaded => 33,
            Stage::Prepared => 66,
            Stage::Encoding => 90,
            Stage::Finished => 100,
        }
    }
}

/// Progress notification delivered to a task's sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub stage: Stage,
}

impl ProgressEvent {
    pub fn percent(&self) -> u8 {
        self.stage.percent()
    }
}

/// Caller-provided progress callback. Invoked on the coordinator thread.
pub type ProgressSink = Box<dyn FnMut(ProgressEvent) + Send + 'static>;

/// Map a background remover's `(phase, current, total)` callback onto the
/// shared stage ladder.
///
/// `fetch*` phases cover model download, `compute*` phases cover inference.
/// Unknown phases report nothing.
pub fn removal_stage(phase: &str, current: u64, total: u64) -> Option<Stage> {
    let done = total > 0 && current >= total;
    if phase.starts_with("fetch") {
        Some(if done { Stage::Loaded } else { Stage::Started })
    } else if phase.starts_with("compute") {
        Some(if done { Stage::Encoding } else { Stage::Prepared })
    } else {
        None
    }
}
