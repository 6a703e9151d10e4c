// src/batch.rs
//
// Caller-side batch orchestration.
//
// Every input item becomes one task keyed by the item's id. Progress and
// terminal outcomes are folded into per-item `BatchUpdate`s so a UI (or any
// other consumer) sees one uniform contract for conversion and background
// removal alike.
//
// - Conversion: everything is submitted up front to the bounded pool.
// - Background removal: one item at a time, each awaited before the next
//   is submitted, since a single run is memory heavy.

use crate::ops::{EncodingRequest, EncodingResult, Job, RemovalRequest};
use crate::pool::{TaskError, TaskHandle, TaskId, TaskOutcome, WorkerPool};
use crate::progress::{ProgressEvent, ProgressSink, Stage};
use crossbeam_channel::{unbounded, Receiver, Select, Sender};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchStatus {
    Pending,
    Converting,
    Removing,
    Success,
    Error,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Success | BatchStatus::Error)
    }
}

/// One input file.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    /// Target extension for conversion (`webp`, `jpg`, `png`, ...).
    pub target_extension: String,
}

impl BatchItem {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
        target_extension: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
            target_extension: target_extension.into(),
        }
    }

    /// File name the converted result should be saved under.
    pub fn output_name(&self) -> String {
        output_file_name(&self.name, &self.target_extension)
    }
}

/// Settings applied to every item of a conversion batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageSettings {
    pub quality: Option<i32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// State change for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchUpdate {
    pub id: String,
    pub status: BatchStatus,
    /// 0..=100
    pub progress: u8,
    pub result: Option<EncodingResult>,
    pub error: Option<String>,
}

impl BatchUpdate {
    fn working(id: &str, status: BatchStatus, progress: u8) -> Self {
        Self {
            id: id.to_string(),
            status,
            progress,
            result: None,
            error: None,
        }
    }

    fn settled(id: &str, outcome: TaskOutcome) -> Self {
        match outcome {
            Ok(result) => Self {
                id: id.to_string(),
                status: BatchStatus::Success,
                progress: Stage::Finished.percent(),
                result: Some(result),
                error: None,
            },
            Err(err) => Self {
                id: id.to_string(),
                status: BatchStatus::Error,
                progress: 0,
                result: None,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Per-item view folded from updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemState {
    pub id: String,
    pub name: String,
    pub target_extension: String,
    pub status: BatchStatus,
    pub progress: u8,
    pub result: Option<EncodingResult>,
    pub error: Option<String>,
}

/// Batch view keyed by item id, in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchState {
    items: Vec<ItemState>,
    index: HashMap<String, usize>,
}

impl BatchState {
    pub fn new(items: &[BatchItem]) -> Self {
        let mut state = Self::default();
        for item in items {
            if state.index.contains_key(&item.id) {
                warn!(id = %item.id, "duplicate batch item id ignored");
                continue;
            }
            state.index.insert(item.id.clone(), state.items.len());
            state.items.push(ItemState {
                id: item.id.clone(),
                name: item.name.clone(),
                target_extension: item.target_extension.clone(),
                status: BatchStatus::Pending,
                progress: 0,
                result: None,
                error: None,
            });
        }
        state
    }

    /// Fold one update. Unknown ids and non-terminal updates for items that
    /// already settled are ignored. Returns whether the state changed.
    pub fn apply(&mut self, update: BatchUpdate) -> bool {
        let Some(&position) = self.index.get(&update.id) else {
            debug!(id = %update.id, "update for unknown item ignored");
            return false;
        };
        let item = &mut self.items[position];
        if item.status.is_terminal() && !update.status.is_terminal() {
            return false;
        }
        item.status = update.status;
        item.progress = update.progress;
        item.result = update.result;
        item.error = update.error;
        true
    }

    pub fn get(&self, id: &str) -> Option<&ItemState> {
        self.index.get(id).map(|&position| &self.items[position])
    }

    pub fn items(&self) -> &[ItemState] {
        &self.items
    }

    pub fn count(&self, status: BatchStatus) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }

    pub fn is_complete(&self) -> bool {
        self.items.iter().all(|item| item.status.is_terminal())
    }
}

/// Replace the extension of `original` with `extension`.
///
/// Only the last extension is replaced; a dot inside a directory component
/// is left alone.
pub fn output_file_name(original: &str, extension: &str) -> String {
    let stem = match original.rfind('.') {
        Some(dot) if !original[dot + 1..].is_empty() && !original[dot + 1..].contains('/') => {
            &original[..dot]
        }
        _ => original,
    };
    format!("{stem}.{extension}")
}

/// Convert every item through `pool`, reporting each state change.
///
/// Items ride on pool-generated task ids, so the same items can be run
/// again on the same pool. Returns once every submitted item has settled
/// (or was abandoned because the pool went away).
pub fn run_conversion_batch<F>(
    pool: &WorkerPool,
    items: Vec<BatchItem>,
    settings: ImageSettings,
    mut on_update: F,
) where
    F: FnMut(BatchUpdate),
{
    let (progress_tx, progress_rx) = unbounded();
    let mut in_flight = Vec::with_capacity(items.len());
    for item in items {
        on_update(BatchUpdate::working(&item.id, BatchStatus::Converting, 0));
        let mut request = EncodingRequest::new(item.bytes, item.mime_type, item.target_extension)
            .with_dimensions(settings.width, settings.height);
        request.quality = settings.quality;
        let sink = forward_progress(progress_tx.clone());
        let handle = pool.submit_with_progress(Job::Encode(request), sink);
        in_flight.push(InFlight { item_id: item.id, handle });
    }
    drop(progress_tx);
    await_batch(in_flight, &progress_rx, BatchStatus::Converting, &mut on_update);
}

/// Remove the background of every item, strictly one at a time.
///
/// The pool should have a single unit; items are never submitted while
/// another one is in flight regardless.
pub fn run_removal_batch<F>(pool: &WorkerPool, items: Vec<BatchItem>, mut on_update: F)
where
    F: FnMut(BatchUpdate),
{
    for item in items {
        on_update(BatchUpdate::working(&item.id, BatchStatus::Removing, 0));
        let (progress_tx, progress_rx) = unbounded();
        let request = RemovalRequest::new(item.bytes, item.mime_type);
        let sink = forward_progress(progress_tx);
        let handle = pool.submit_with_progress(Job::RemoveBackground(request), sink);
        let in_flight = vec![InFlight { item_id: item.id, handle }];
        await_batch(in_flight, &progress_rx, BatchStatus::Removing, &mut on_update);
    }
}

fn forward_progress(tx: Sender<ProgressEvent>) -> ProgressSink {
    Box::new(move |event| {
        let _ = tx.send(event);
    })
}

struct InFlight {
    item_id: String,
    handle: TaskHandle,
}

enum Ready {
    Progress(Option<ProgressEvent>),
    Settled(usize, TaskOutcome),
}

/// Fold progress and outcomes until every handle has settled.
fn await_batch(
    mut pending: Vec<InFlight>,
    progress_rx: &Receiver<ProgressEvent>,
    working: BatchStatus,
    on_update: &mut dyn FnMut(BatchUpdate),
) {
    let items: HashMap<TaskId, String> = pending
        .iter()
        .map(|task| (task.handle.id().clone(), task.item_id.clone()))
        .collect();
    let mut progress_open = true;
    while !pending.is_empty() {
        let ready = {
            let mut select = Select::new();
            let offset = if progress_open {
                select.recv(progress_rx);
                1
            } else {
                0
            };
            for task in &pending {
                select.recv(task.handle.receiver());
            }
            let op = select.select();
            let index = op.index();
            if index < offset {
                Ready::Progress(op.recv(progress_rx).ok())
            } else {
                let position = index - offset;
                let outcome = op
                    .recv(pending[position].handle.receiver())
                    .unwrap_or(Err(TaskError::Abandoned));
                Ready::Settled(position, outcome)
            }
        };

        match ready {
            Ready::Progress(Some(event)) => report_progress(&items, &event, working, on_update),
            Ready::Progress(None) => progress_open = false,
            Ready::Settled(position, outcome) => {
                // Progress for this task was sent before its outcome.
                while let Ok(event) = progress_rx.try_recv() {
                    report_progress(&items, &event, working, on_update);
                }
                let task = pending.swap_remove(position);
                on_update(BatchUpdate::settled(&task.item_id, outcome));
            }
        }
    }
}

fn report_progress(
    items: &HashMap<TaskId, String>,
    event: &ProgressEvent,
    working: BatchStatus,
    on_update: &mut dyn FnMut(BatchUpdate),
) {
    // The terminal update carries 100.
    if event.stage == Stage::Finished {
        return;
    }
    match items.get(&event.task_id) {
        Some(item_id) => on_update(BatchUpdate::working(item_id, working, event.percent())),
        None => debug!(task_id = %event.task_id, "progress for unknown batch task dropped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> BatchItem {
        BatchItem::new(id, format!("{id}.png"), "image/png", vec![], "webp")
    }

    #[test]
    fn test_output_file_name() {
        assert_eq!(output_file_name("photo.png", "webp"), "photo.webp");
        assert_eq!(output_file_name("archive.tar.gz", "png"), "archive.tar.png");
        assert_eq!(output_file_name("noext", "jpg"), "noext.jpg");
        assert_eq!(output_file_name("dir.d/noext", "jpg"), "dir.d/noext.jpg");
        assert_eq!(output_file_name("trailing.", "png"), "trailing..png");
    }

    #[test]
    fn test_state_folds_updates() {
        let mut state = BatchState::new(&[item("a"), item("b")]);
        assert_eq!(state.count(BatchStatus::Pending), 2);

        assert!(state.apply(BatchUpdate::working("a", BatchStatus::Converting, 33)));
        assert_eq!(state.get("a").unwrap().progress, 33);

        let done = BatchUpdate::settled("a", Ok(EncodingResult::new(vec![1, 2], "image/webp")));
        assert!(state.apply(done));
        assert_eq!(state.get("a").unwrap().status, BatchStatus::Success);
        assert_eq!(state.get("a").unwrap().progress, 100);

        // Late progress never reopens a settled item.
        assert!(!state.apply(BatchUpdate::working("a", BatchStatus::Converting, 90)));
        assert_eq!(state.get("a").unwrap().status, BatchStatus::Success);

        assert!(!state.apply(BatchUpdate::working("zzz", BatchStatus::Converting, 10)));
        assert!(!state.is_complete());

        state.apply(BatchUpdate::settled("b", Err(TaskError::Abandoned)));
        let b = state.get("b").unwrap();
        assert_eq!(b.status, BatchStatus::Error);
        assert!(b.error.as_deref().unwrap().contains("abandoned"));
        assert!(state.is_complete());
    }

    #[test]
    fn test_duplicate_items_are_collapsed() {
        let state = BatchState::new(&[item("a"), item("a")]);
        assert_eq!(state.items().len(), 1);
    }
}
