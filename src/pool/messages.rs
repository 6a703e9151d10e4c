// src/pool/messages.rs
//
// Typed messages between the coordinator and its execution units.
// Every response echoes the task id of the request it belongs to.

use crate::error::ErrorCode;
use crate::ops::Job;
use crate::pool::task::{CancelToken, Task, TaskId};
use crate::progress::Stage;

/// Coordinator -> execution unit. The job's byte buffers move with it.
#[derive(Debug)]
pub struct UnitRequest {
    pub task_id: TaskId,
    pub job: Job,
    pub cancel: CancelToken,
}

/// Execution unit -> coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitResponse {
    Progress {
        task_id: TaskId,
        stage: Stage,
    },
    Success {
        task_id: TaskId,
        result_bytes: Vec<u8>,
    },
    Error {
        task_id: TaskId,
        message: String,
        code: Option<ErrorCode>,
    },
}

impl UnitResponse {
    pub fn task_id(&self) -> &TaskId {
        match self {
            UnitResponse::Progress { task_id, .. }
            | UnitResponse::Success { task_id, .. }
            | UnitResponse::Error { task_id, .. } => task_id,
        }
    }
}

/// Everything the coordinator reacts to, serialized through one channel.
pub(crate) enum Inbox {
    Submit(Task),
    Unit { slot: usize, response: UnitResponse },
    UnitCrashed { slot: usize, generation: u64 },
    Shutdown,
}
