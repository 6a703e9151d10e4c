// src/pool/unit.rs
//
// Execution unit threads. A unit owns nothing but the request it is
// currently working on; all bookkeeping stays with the coordinator.

use crate::error::Result;
use crate::ops::Job;
use crate::pool::messages::{Inbox, UnitRequest, UnitResponse};
use crate::pool::task::CancelToken;
use crate::progress::Stage;
use crossbeam_channel::{unbounded, Sender};
use std::sync::Arc;
use std::thread;

/// Work performed by an execution unit for one task.
///
/// Errors become error responses. A panic that escapes `process` takes the
/// unit down; the coordinator then respawns it.
pub trait TaskProcessor: Send + Sync + 'static {
    fn process(
        &self,
        job: Job,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(Stage),
    ) -> Result<Vec<u8>>;
}

/// Reports a crash to the coordinator when the unit thread unwinds.
struct CrashGuard {
    slot: usize,
    generation: u64,
    inbox: Sender<Inbox>,
}

impl Drop for CrashGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            let _ = self.inbox.send(Inbox::UnitCrashed {
                slot: self.slot,
                generation: self.generation,
            });
        }
    }
}

/// Start a unit for `slot`. Returns the sender the coordinator dispatches on.
/// The unit exits once that sender is dropped.
pub(crate) fn spawn_unit(
    slot: usize,
    generation: u64,
    processor: Arc<dyn TaskProcessor>,
    inbox: Sender<Inbox>,
) -> std::io::Result<Sender<UnitRequest>> {
    let (requests, receiver) = unbounded::<UnitRequest>();
    thread::Builder::new()
        .name(format!("image-batcher-unit-{slot}"))
        .spawn(move || {
            let _guard = CrashGuard {
                slot,
                generation,
                inbox: inbox.clone(),
            };
            for request in receiver.iter() {
                run_request(processor.as_ref(), request, slot, &inbox);
            }
        })?;
    Ok(requests)
}

fn run_request(
    processor: &dyn TaskProcessor,
    request: UnitRequest,
    slot: usize,
    inbox: &Sender<Inbox>,
) {
    let UnitRequest {
        task_id,
        job,
        cancel,
    } = request;

    let mut report = |stage: Stage| {
        let _ = inbox.send(Inbox::Unit {
            slot,
            response: UnitResponse::Progress {
                task_id: task_id.clone(),
                stage,
            },
        });
    };

    let response = match processor.process(job, &cancel, &mut report) {
        Ok(result_bytes) => UnitResponse::Success {
            task_id: task_id.clone(),
            result_bytes,
        },
        Err(err) => UnitResponse::Error {
            task_id: task_id.clone(),
            message: err.to_string(),
            code: err.code(),
        },
    };
    // The coordinator is gone after teardown; nothing left to tell.
    let _ = inbox.send(Inbox::Unit { slot, response });
}
