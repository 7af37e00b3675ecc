//! KHI Log Model
//!
//! Opaque log records with structured path reads and kind-tagged field sets.
//!
//! # Core Concepts
//!
//! - [`Log`]: an immutable JSON log body plus a mutable set of parsed views
//! - [`LogReader`]: typed reads by dotted path (`a.b.c`) over a log body
//! - [`FieldSet`]: a kind-tagged parsed view attached to a log
//! - [`CommonFieldSet`]: timestamp / severity / display id every log carries
//! - [`K8sAuditFieldSet`]: the parsed view the audit pipeline requires
//!
//! A log source, meaning any task that lists log entries, produces `Vec<Log>`;
//! everything downstream addresses logs through this crate.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod fieldset;
mod log;
mod reader;
mod severity;

pub use fieldset::{CommonFieldSet, FieldSet, FieldSetMap, K8sAuditFieldSet, KindTag};
pub use log::{Log, LogError, LogId};
pub use reader::{LogReader, ReadError};
pub use severity::Severity;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
