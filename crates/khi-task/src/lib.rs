//! KHI Task Graph Engine
//!
//! A typed DAG of named units executed with dependency-respecting
//! concurrency, cancellation, two execution modes and progress reporting.
//!
//! # Core Concepts
//!
//! - [`TaskId`]: `(reference, implementation)` pair; consumers depend on
//!   references, providers register implementations
//! - [`TaskReference`]: a reference id typed by the producer's result type
//! - [`TaskDefinition`]: id + dependencies + labels + async run function
//! - [`TaskSet`]: registration and dependency resolution into a
//!   [`RunnableTaskSet`] (cycles rejected before execution)
//! - [`TaskRunner`]: bounded parallel scheduler; first error cancels peers
//! - [`TaskContext`]: mode, cancellation, results, shared maps, progress
//!   and metadata, handed to every task
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let mut set = TaskSet::new();
//! set.add_inspection_type(InspectionType::new("gke", "GKE"))?;
//! set.register(fetch_logs_task())?;
//! set.register(parse_logs_task())?;
//!
//! let runnable = set.resolve(&["khi/feature/audit".into()], "gke")?;
//! let ctx = TaskContext::new(RunMode::Run, "gke");
//! let handle = TaskRunner::new(runnable).start(ctx);
//! let ctx = handle.wait().await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod context;
mod form;
mod id;
mod interceptor;
mod label;
mod metadata;
mod progress;
mod registry;
mod runner;
mod task;
mod typedmap;

pub use context::{IoConfig, TaskContext, IO_CONFIG};
pub use form::{
    form_value_task, FormField, FormFieldSet, FormFieldType, FormInput, HintType,
    ValidationTiming, FORM_INPUT,
};
pub use id::{TaskId, TaskReference};
pub use interceptor::{ErrorReportInterceptor, Next, TaskInterceptor, TracingInterceptor};
pub use label::{labels, LabelSet};
pub use metadata::{
    ErrorReport, ErrorSetMetadata, FormFieldsMetadata, HeaderMetadata, MetadataEntry,
    MetadataKindTag, MetadataRegistry, PlanMetadata, ProgressMetadata, QueryEntry, QueryMetadata,
};
pub use progress::{ProgressRegistry, ProgressStatus, ProgressUpdater, TaskProgress};
pub use registry::{InspectionType, RunnableTaskSet, TaskSet};
pub use runner::{RunHandle, TaskRunner};
pub use task::{ConfigError, RunMode, TaskDefinition, TaskError, TaskResult, TaskRunFn};
pub use typedmap::{TypedKey, TypedMap};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
