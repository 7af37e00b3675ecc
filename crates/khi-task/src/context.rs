//! The task context
//!
//! One context is built per run and cloned into every task. It carries the
//! execution mode, cancellation, produced results, the two shared typed
//! maps, progress and metadata.

use crate::id::TaskReference;
use crate::metadata::{MetadataRegistry, ProgressMetadata};
use crate::progress::ProgressRegistry;
use crate::task::{RunMode, TaskError, TaskResult};
use crate::typedmap::{TypedKey, TypedMap};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Filesystem configuration injected into the inspection shared map
///
/// The engine never reads environment variables; everything filesystem-
/// related arrives through this value.
#[derive(Debug, Clone)]
pub struct IoConfig {
    /// Scratch space for sealed chunks and staging files
    pub temporary_dir: PathBuf,
    /// Destination directory for finished artifacts
    pub data_dir: PathBuf,
}

/// Shared-map key the [`IoConfig`] lives under
pub static IO_CONFIG: TypedKey<IoConfig> = TypedKey::new("khi/io-config");

struct ContextInner {
    mode: RunMode,
    inspection_type: String,
    cancel: CancellationToken,
    results: DashMap<String, TaskResult>,
    global: Arc<TypedMap>,
    inspection: Arc<TypedMap>,
    progress: Arc<ProgressRegistry>,
    metadata: Arc<MetadataRegistry>,
}

/// Context handed to every task of one run
#[derive(Clone)]
pub struct TaskContext {
    inner: Arc<ContextInner>,
}

impl TaskContext {
    /// Context for a fresh run with empty shared maps
    #[must_use]
    pub fn new(mode: RunMode, inspection_type: impl Into<String>) -> Self {
        Self::with_global(mode, inspection_type, Arc::new(TypedMap::new()))
    }

    /// Context reusing a process-lifetime global map
    #[must_use]
    pub fn with_global(
        mode: RunMode,
        inspection_type: impl Into<String>,
        global: Arc<TypedMap>,
    ) -> Self {
        let progress = Arc::new(ProgressRegistry::new());
        let metadata = Arc::new(MetadataRegistry::new());
        metadata.insert(Arc::new(ProgressMetadata::new(Arc::clone(&progress))));
        Self {
            inner: Arc::new(ContextInner {
                mode,
                inspection_type: inspection_type.into(),
                cancel: CancellationToken::new(),
                results: DashMap::new(),
                global,
                inspection: Arc::new(TypedMap::new()),
                progress,
                metadata,
            }),
        }
    }

    /// Execution mode of this run
    #[inline]
    #[must_use]
    pub fn mode(&self) -> RunMode {
        self.inner.mode
    }

    /// Whether this run is a dry-run
    #[inline]
    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.inner.mode == RunMode::DryRun
    }

    /// The ambient inspection type
    #[inline]
    #[must_use]
    pub fn inspection_type(&self) -> &str {
        &self.inner.inspection_type
    }

    /// Cancellation token shared by every task of the run
    #[inline]
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Whether the run was cancelled
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Process-lifetime shared map
    #[inline]
    #[must_use]
    pub fn global(&self) -> &Arc<TypedMap> {
        &self.inner.global
    }

    /// Run-lifetime shared map
    #[inline]
    #[must_use]
    pub fn inspection(&self) -> &Arc<TypedMap> {
        &self.inner.inspection
    }

    /// Per-task progress records
    #[inline]
    #[must_use]
    pub fn progress(&self) -> &Arc<ProgressRegistry> {
        &self.inner.progress
    }

    /// Run metadata registry
    #[inline]
    #[must_use]
    pub fn metadata(&self) -> &Arc<MetadataRegistry> {
        &self.inner.metadata
    }

    /// Result of a dependency, by typed reference
    ///
    /// # Errors
    /// [`TaskError::ResultMissing`] when the producer never ran (only
    /// possible for references outside the declared dependencies),
    /// [`TaskError::ResultType`] when the stored value does not match `T`.
    pub fn result<T: Send + Sync + 'static>(
        &self,
        reference: TaskReference<T>,
    ) -> Result<Arc<T>, TaskError> {
        let value = self
            .inner
            .results
            .get(reference.reference())
            .map(|v| Arc::clone(v.value()))
            .ok_or_else(|| TaskError::ResultMissing(reference.reference().to_string()))?;
        value
            .downcast::<T>()
            .map_err(|_| TaskError::ResultType(reference.reference().to_string()))
    }

    /// Result of an optional producer, `None` when absent or mistyped
    ///
    /// Discovery outputs are read this way: a missing result is legal.
    #[must_use]
    pub fn optional_result<T: Send + Sync + 'static>(
        &self,
        reference: TaskReference<T>,
    ) -> Option<Arc<T>> {
        self.result(reference).ok()
    }

    pub(crate) fn set_result(&self, reference: &str, value: TaskResult) {
        self.inner.results.insert(reference.to_string(), value);
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("mode", &self.inner.mode)
            .field("inspection_type", &self.inner.inspection_type)
            .finish_non_exhaustive()
    }
}
