//! Task definitions and errors

use crate::context::TaskContext;
use crate::id::TaskId;
use crate::label::LabelSet;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Execution mode of a run
///
/// Dry-run populates form metadata and query previews only; it must not
/// perform external io or write history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    Run,
    DryRun,
}

/// Type-erased task output
pub type TaskResult = Arc<dyn Any + Send + Sync>;

/// Boxed future a task run produces
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<TaskResult, TaskError>> + Send>>;

/// The run function stored on a definition
pub type TaskRunFn = Arc<dyn Fn(TaskContext) -> TaskFuture + Send + Sync>;

/// Fatal configuration errors, detected before any task executes
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Two registrations share reference and implementation
    #[error("duplicate task id '{0}'")]
    DuplicateTask(TaskId),

    /// Inspection type registered twice
    #[error("duplicate inspection type '{0}'")]
    DuplicateInspectionType(String),

    /// Resolution targets an unregistered inspection type
    #[error("unknown inspection type '{0}'")]
    UnknownInspectionType(String),

    /// A needed reference has no eligible implementation
    #[error("no implementation for reference '{reference}' (required by '{required_by}')")]
    MissingDependency {
        reference: String,
        required_by: String,
    },

    /// A needed reference has several eligible implementations
    #[error("reference '{0}' has multiple eligible implementations")]
    AmbiguousReference(String),

    /// The dependency graph is cyclic
    #[error("dependency cycle involving '{0}'")]
    CycleDetected(String),
}

/// Errors surfaced by task execution
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Pre-run configuration failure
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A task body failed
    #[error("task '{id}' failed: {message}")]
    Failed { id: TaskId, message: String },

    /// The run was cancelled before this task could finish
    #[error("run cancelled")]
    Cancelled,

    /// A result downcast did not match the typed reference
    #[error("result for '{0}' has an unexpected type")]
    ResultType(String),

    /// A required result was never produced
    #[error("result for '{0}' is not available")]
    ResultMissing(String),
}

impl TaskError {
    /// Wrap an arbitrary error as a task failure
    #[must_use]
    pub fn failed(id: &TaskId, err: impl std::fmt::Display) -> Self {
        Self::Failed {
            id: id.clone(),
            message: err.to_string(),
        }
    }
}

/// One registered task: identity, dependencies, labels and body
pub struct TaskDefinition {
    id: TaskId,
    dependencies: Vec<String>,
    labels: LabelSet,
    run: TaskRunFn,
}

impl TaskDefinition {
    /// Definition with a typed body; the result is erased for storage
    ///
    /// `dependencies` are reference ids this task waits for and may read
    /// results from.
    pub fn new<T, F, Fut>(
        id: TaskId,
        dependencies: Vec<String>,
        labels: LabelSet,
        body: F,
    ) -> Arc<Self>
    where
        T: Send + Sync + 'static,
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let run: TaskRunFn = Arc::new(move |ctx| {
            let fut = body(ctx);
            Box::pin(async move { fut.await.map(|v| Arc::new(v) as TaskResult) })
        });
        Arc::new(Self {
            id,
            dependencies,
            labels,
            run,
        })
    }

    /// Identity
    #[inline]
    #[must_use]
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Reference ids this task depends on
    #[inline]
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Attached labels
    #[inline]
    #[must_use]
    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// The type-erased run function
    #[inline]
    #[must_use]
    pub fn run_fn(&self) -> &TaskRunFn {
        &self.run
    }
}

impl std::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}
