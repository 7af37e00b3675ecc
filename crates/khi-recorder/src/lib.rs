//! KHI Recorder Framework
//!
//! Recorders translate normalized audit logs into [`khi_history::ChangeSet`]s
//! and flush them atomically into the history builder.
//!
//! # Dispatch discipline
//!
//! - Timelines are filtered per recorder, organized into a tree by path,
//!   and walked parent-first; siblings proceed in bounded parallel
//! - Within one timeline, handler calls are strictly sequential: each call
//!   returns the state the next call sees
//! - A handler error drops its change set and moves to the next log;
//!   handler errors are never fatal to the run
//!
//! [`recorders`] contributes the kind-specific recorders; [`tasks`]
//! assembles one task per recorder plus artifact finalization.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod dispatch;
mod parent;
mod recorder;
pub mod recorders;
pub mod tasks;

pub use dispatch::{dispatch_recorder, recorder_task, DispatchStats};
pub use parent::ParentDeletionWatcher;
pub use recorder::{
    GroupEndRequest, RecordRequest, Recorder, RecorderError, RecorderState,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
