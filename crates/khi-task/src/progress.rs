//! Per-task progress records

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Lifecycle of one task inside a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    #[default]
    Waiting,
    Running,
    Done,
    Error,
    Cancelled,
}

/// Progress record of one task
#[derive(Debug, Clone, Serialize, Default)]
pub struct TaskProgress {
    pub id: String,
    pub label: String,
    pub status: ProgressStatus,
    /// 0.0 ..= 1.0, meaningful while running
    pub percentage: f32,
    pub message: String,
}

/// Registry of progress records, one per scheduled task
///
/// Records appear in scheduling order and survive task failure so partial
/// progress is reportable after an aborted run.
#[derive(Default)]
pub struct ProgressRegistry {
    entries: DashMap<String, TaskProgress>,
    order: Mutex<Vec<String>>,
}

impl ProgressRegistry {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task; later updates refer to it by id
    pub fn register(&self, id: impl Into<String>, label: impl Into<String>) {
        let id = id.into();
        self.entries.insert(
            id.clone(),
            TaskProgress {
                id: id.clone(),
                label: label.into(),
                ..TaskProgress::default()
            },
        );
        self.order.lock().push(id);
    }

    /// Mark a task running
    pub fn mark_running(&self, id: &str) {
        self.set_status(id, ProgressStatus::Running);
    }

    /// Mark a task done
    pub fn mark_done(&self, id: &str) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.status = ProgressStatus::Done;
            entry.percentage = 1.0;
        }
    }

    /// Mark a task failed with a message
    pub fn mark_error(&self, id: &str, message: impl Into<String>) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.status = ProgressStatus::Error;
            entry.message = message.into();
        }
    }

    /// Mark a task cancelled, unless it already finished
    pub fn mark_cancelled(&self, id: &str) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            if matches!(
                entry.status,
                ProgressStatus::Waiting | ProgressStatus::Running
            ) {
                entry.status = ProgressStatus::Cancelled;
            }
        }
    }

    fn set_status(&self, id: &str, status: ProgressStatus) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.status = status;
        }
    }

    /// Update percentage and message of a running task
    pub fn update(&self, id: &str, percentage: f32, message: impl Into<String>) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.percentage = percentage.clamp(0.0, 1.0);
            entry.message = message.into();
        }
    }

    /// Snapshot in registration order
    #[must_use]
    pub fn snapshot(&self) -> Vec<TaskProgress> {
        self.order
            .lock()
            .iter()
            .filter_map(|id| self.entries.get(id).map(|e| e.clone()))
            .collect()
    }

    /// Counting updater for data-parallel loops inside one task
    #[must_use]
    pub fn updater(
        self: &Arc<Self>,
        id: impl Into<String>,
        total: usize,
        message: impl Into<String>,
    ) -> ProgressUpdater {
        ProgressUpdater {
            registry: Arc::clone(self),
            id: id.into(),
            message: message.into(),
            total: total.max(1),
            done: AtomicUsize::new(0),
        }
    }
}

/// Increments a task's percentage as loop items complete
pub struct ProgressUpdater {
    registry: Arc<ProgressRegistry>,
    id: String,
    message: String,
    total: usize,
    done: AtomicUsize,
}

impl ProgressUpdater {
    /// Record one completed item
    pub fn increment(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        #[allow(clippy::cast_precision_loss)]
        let pct = done as f32 / self.total as f32;
        self.registry
            .update(&self.id, pct, format!("{} ({done}/{})", self.message, self.total));
    }
}
