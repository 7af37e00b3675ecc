//! Recorder definitions

use khi_audit::TimelineEntry;
use khi_history::{ChangeSet, HistoryBuilder, ResourcePath};
use std::any::Any;
use std::sync::Arc;

/// Errors a recorder handler may raise
///
/// Recorded and swallowed per log: the change set of the failing call is
/// discarded and the next log proceeds.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// Handler could not process the log
    #[error("recorder failed: {0}")]
    Failed(String),

    /// A payload the handler needed was missing or malformed
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl RecorderError {
    /// Shorthand for a failure message
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// State threaded between a recorder's sequential calls on one timeline
///
/// Owned by the dispatcher between calls: each handler invocation receives
/// the previous call's state by value and returns the state for the next.
pub type RecorderState = Box<dyn Any + Send + Sync>;

/// One handler invocation's view
pub struct RecordRequest<'a> {
    /// Timeline being recorded
    pub path: &'a ResourcePath,
    /// The log with its reconstructed body
    pub entry: &'a TimelineEntry,
    /// History built so far; read-only for handlers, mutations go through
    /// the change set
    pub builder: &'a HistoryBuilder,
}

/// View for the end-of-group hook
pub struct GroupEndRequest<'a> {
    pub path: &'a ResourcePath,
    /// Last entry that passed the log filter
    pub last_entry: &'a TimelineEntry,
    pub builder: &'a HistoryBuilder,
}

type HandlerFn = dyn Fn(
        &RecordRequest<'_>,
        &mut ChangeSet,
        Option<RecorderState>,
    ) -> Result<Option<RecorderState>, RecorderError>
    + Send
    + Sync;
type GroupEndFn = dyn Fn(&GroupEndRequest<'_>, &mut ChangeSet, Option<RecorderState>) -> Result<(), RecorderError>
    + Send
    + Sync;
type GroupFilterFn = dyn Fn(&ResourcePath) -> bool + Send + Sync;
type LogFilterFn = dyn Fn(&TimelineEntry) -> bool + Send + Sync;

/// A resource-kind-specific recorder
pub struct Recorder {
    name: &'static str,
    dependencies: Vec<String>,
    group_filter: Arc<GroupFilterFn>,
    log_filter: Arc<LogFilterFn>,
    handler: Arc<HandlerFn>,
    group_end: Option<Arc<GroupEndFn>>,
}

impl Recorder {
    /// Recorder named `name` with `handler`; filters default to everything
    #[must_use]
    pub fn new(
        name: &'static str,
        handler: impl Fn(
                &RecordRequest<'_>,
                &mut ChangeSet,
                Option<RecorderState>,
            ) -> Result<Option<RecorderState>, RecorderError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name,
            dependencies: Vec::new(),
            group_filter: Arc::new(|_| true),
            log_filter: Arc::new(|_| true),
            handler: Arc::new(handler),
            group_end: None,
        }
    }

    /// Restrict the timelines this recorder visits
    #[must_use]
    pub fn with_group_filter(
        mut self,
        filter: impl Fn(&ResourcePath) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.group_filter = Arc::new(filter);
        self
    }

    /// Restrict the logs this recorder visits within a timeline
    #[must_use]
    pub fn with_log_filter(
        mut self,
        filter: impl Fn(&TimelineEntry) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.log_filter = Arc::new(filter);
        self
    }

    /// Add a task reference this recorder's task depends on
    #[must_use]
    pub fn with_dependency(mut self, reference: impl Into<String>) -> Self {
        self.dependencies.push(reference.into());
        self
    }

    /// Hook invoked once after the last filtered log of each timeline
    ///
    /// Receives the final threaded state by value.
    #[must_use]
    pub fn with_group_end(
        mut self,
        hook: impl Fn(&GroupEndRequest<'_>, &mut ChangeSet, Option<RecorderState>) -> Result<(), RecorderError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.group_end = Some(Arc::new(hook));
        self
    }

    /// Recorder name; the task id is derived from it
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Extra task references this recorder's task waits for
    #[inline]
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub(crate) fn accepts_group(&self, path: &ResourcePath) -> bool {
        (self.group_filter)(path)
    }

    pub(crate) fn accepts_log(&self, entry: &TimelineEntry) -> bool {
        (self.log_filter)(entry)
    }

    pub(crate) fn handle(
        &self,
        request: &RecordRequest<'_>,
        changeset: &mut ChangeSet,
        state: Option<RecorderState>,
    ) -> Result<Option<RecorderState>, RecorderError> {
        (self.handler)(request, changeset, state)
    }

    pub(crate) fn handle_group_end(
        &self,
        request: &GroupEndRequest<'_>,
        changeset: &mut ChangeSet,
        state: Option<RecorderState>,
    ) -> Result<bool, RecorderError> {
        match &self.group_end {
            Some(hook) => {
                hook(request, changeset, state)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}
