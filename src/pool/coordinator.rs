// src/pool/coordinator.rs
//
// The coordinator thread: sole owner of slot and pending-task state.
//
// Messages are handled one at a time, so the bookkeeping below is never
// touched from two threads. Callers only see the atomic counters it
// publishes for `WorkerPool::status`.

use crate::error::ImageBatchError;
use crate::ops::EncodingResult;
use crate::pool::messages::{Inbox, UnitRequest, UnitResponse};
use crate::pool::task::{Task, TaskError, TaskId, TaskState};
use crate::pool::unit::{spawn_unit, TaskProcessor};
use crossbeam_channel::{Receiver, SendError, Sender};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counters published for status snapshots.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub(crate) busy: AtomicUsize,
    pub(crate) pending: AtomicUsize,
}

struct Slot {
    requests: Option<Sender<UnitRequest>>,
    busy: bool,
    generation: u64,
    task: Option<TaskId>,
}

impl Slot {
    fn is_idle(&self) -> bool {
        !self.busy && self.requests.is_some()
    }
}

pub(crate) struct Coordinator {
    slots: Vec<Slot>,
    pending: Vec<Task>,
    /// Every id accepted over the pool's lifetime.
    issued: HashSet<TaskId>,
    inbox: Receiver<Inbox>,
    inbox_tx: Sender<Inbox>,
    processor: Arc<dyn TaskProcessor>,
    counters: Arc<PoolCounters>,
}

impl Coordinator {
    /// Spawn `size` units. Fails if the OS refuses a thread.
    pub(crate) fn new(
        size: usize,
        processor: Arc<dyn TaskProcessor>,
        inbox: Receiver<Inbox>,
        inbox_tx: Sender<Inbox>,
        counters: Arc<PoolCounters>,
    ) -> Result<Self, ImageBatchError> {
        let mut slots = Vec::with_capacity(size);
        for index in 0..size {
            let requests = spawn_unit(index, 0, processor.clone(), inbox_tx.clone())
                .map_err(ImageBatchError::worker_spawn_failed)?;
            slots.push(Slot {
                requests: Some(requests),
                busy: false,
                generation: 0,
                task: None,
            });
        }
        Ok(Self {
            slots,
            pending: Vec::new(),
            issued: HashSet::new(),
            inbox,
            inbox_tx,
            processor,
            counters,
        })
    }

    pub(crate) fn run(mut self) {
        info!(workers = self.slots.len(), "pool coordinator started");
        while let Ok(message) = self.inbox.recv() {
            match message {
                Inbox::Submit(task) => self.accept(task),
                Inbox::Unit { slot, response } => self.handle_response(slot, response),
                Inbox::UnitCrashed { slot, generation } => self.handle_crash(slot, generation),
                Inbox::Shutdown => break,
            }
        }
        self.teardown();
    }

    fn accept(&mut self, task: Task) {
        if !self.issued.insert(task.id.clone()) {
            warn!(task_id = %task.id, "duplicate task id rejected");
            let err = ImageBatchError::duplicate_task_id(task.id.to_string());
            self.finish(task, Err(TaskError::from(err)));
            return;
        }
        debug!(task_id = %task.id, kind = task.kind, "task queued");
        self.pending.push(task);
        self.assign_pending();
    }

    /// Greedy pass: first idle slot gets the oldest queued task, until one
    /// side runs out.
    fn assign_pending(&mut self) {
        loop {
            let Some(slot_index) = self.slots.iter().position(Slot::is_idle) else {
                return;
            };
            let Some(task_index) = self
                .pending
                .iter()
                .position(|task| task.state == TaskState::Queued)
            else {
                return;
            };

            if self.pending[task_index].cancel.is_cancelled() {
                let task = self.pending.remove(task_index);
                debug!(task_id = %task.id, "task cancelled before dispatch");
                self.finish(task, Err(TaskError::from(ImageBatchError::cancelled())));
                continue;
            }

            let task = &mut self.pending[task_index];
            let Some(job) = task.job.take() else {
                let task = self.pending.remove(task_index);
                error!(task_id = %task.id, "queued task has no job");
                let err = ImageBatchError::internal_panic("queued task has no job");
                self.finish(task, Err(TaskError::from(err)));
                continue;
            };
            let request = UnitRequest {
                task_id: task.id.clone(),
                job,
                cancel: task.cancel.clone(),
            };
            task.state = TaskState::Assigned;

            let slot = &mut self.slots[slot_index];
            slot.busy = true;
            slot.task = Some(request.task_id.clone());
            self.counters.busy.fetch_add(1, Ordering::SeqCst);
            debug!(task_id = %request.task_id, slot = slot_index, "task dispatched");

            let sent = match slot.requests.as_ref() {
                Some(requests) => requests.send(request),
                None => Err(SendError(request)),
            };
            if let Err(SendError(request)) = sent {
                // The unit died before we heard about it: requeue and replace it.
                warn!(slot = slot_index, "execution unit unreachable; respawning");
                let task = &mut self.pending[task_index];
                task.job = Some(request.job);
                task.state = TaskState::Queued;
                self.release_slot(slot_index);
                self.respawn(slot_index);
            }
        }
    }

    fn handle_response(&mut self, slot_index: usize, response: UnitResponse) {
        let Some(task_index) = self
            .pending
            .iter()
            .position(|task| &task.id == response.task_id())
        else {
            warn!(
                task_id = %response.task_id(),
                slot = slot_index,
                "response for unknown task ignored"
            );
            return;
        };

        match response {
            UnitResponse::Progress { stage, .. } => {
                let task = &mut self.pending[task_index];
                task.state = TaskState::Running;
                task.report(stage);
            }
            UnitResponse::Success { result_bytes, .. } => {
                let task = self.pending.remove(task_index);
                let result = EncodingResult::new(result_bytes, task.output_mime);
                self.release_task_slot(slot_index, &task.id);
                self.finish(task, Ok(result));
                self.assign_pending();
            }
            UnitResponse::Error { message, code, .. } => {
                let task = self.pending.remove(task_index);
                self.release_task_slot(slot_index, &task.id);
                self.finish(task, Err(TaskError::Failed { message, code }));
                self.assign_pending();
            }
        }
    }

    fn handle_crash(&mut self, slot_index: usize, generation: u64) {
        let Some(slot) = self.slots.get(slot_index) else {
            return;
        };
        if slot.generation != generation {
            debug!(slot = slot_index, generation, "stale crash report ignored");
            return;
        }
        // The task stays pending: no retry, no rejection.
        if let Some(task_id) = &slot.task {
            warn!(
                slot = slot_index,
                task_id = %task_id,
                "execution unit crashed; in-flight task left pending"
            );
        } else {
            warn!(slot = slot_index, "execution unit crashed while idle");
        }
        self.release_slot(slot_index);
        self.respawn(slot_index);
        self.assign_pending();
    }

    fn release_task_slot(&mut self, slot_index: usize, task_id: &TaskId) {
        let owned = self
            .slots
            .get(slot_index)
            .is_some_and(|slot| slot.task.as_ref() == Some(task_id));
        if owned {
            self.release_slot(slot_index);
        } else {
            warn!(slot = slot_index, task_id = %task_id, "terminal response from unexpected slot");
        }
    }

    fn release_slot(&mut self, slot_index: usize) {
        if let Some(slot) = self.slots.get_mut(slot_index) {
            if slot.busy {
                self.counters.busy.fetch_sub(1, Ordering::SeqCst);
            }
            slot.busy = false;
            slot.task = None;
        }
    }

    fn respawn(&mut self, slot_index: usize) {
        let Some(slot) = self.slots.get_mut(slot_index) else {
            return;
        };
        slot.generation += 1;
        slot.requests = None;
        match spawn_unit(
            slot_index,
            slot.generation,
            self.processor.clone(),
            self.inbox_tx.clone(),
        ) {
            Ok(requests) => {
                info!(
                    slot = slot_index,
                    generation = slot.generation,
                    "execution unit respawned"
                );
                slot.requests = Some(requests);
            }
            Err(err) => {
                error!(
                    slot = slot_index,
                    error = %err,
                    "failed to respawn execution unit; slot disabled"
                );
            }
        }
    }

    fn finish(&self, task: Task, outcome: Result<EncodingResult, TaskError>) {
        self.counters.pending.fetch_sub(1, Ordering::SeqCst);
        task.settle(outcome);
    }

    fn teardown(&mut self) {
        info!(pending = self.pending.len(), "pool shutting down; pending tasks abandoned");
        for slot in &mut self.slots {
            slot.requests = None;
            slot.busy = false;
            slot.task = None;
        }
        // Dropping a task drops its reply sender; waiters see `Abandoned`.
        self.pending.clear();
        self.counters.busy.store(0, Ordering::SeqCst);
        self.counters.pending.store(0, Ordering::SeqCst);
    }
}
