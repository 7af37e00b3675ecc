//! KHI Audit Log Normalization Pipeline
//!
//! Turns raw Kubernetes audit logs into per-timeline sequences of
//! reconstructed manifests, ready for the recorder framework.
//!
//! # Stages
//!
//! 1. **Field extraction** ([`extract`]): provider extractor produces a
//!    [`ParsedAuditLog`] per log, in parallel; failures are dropped with a
//!    warning and counted
//! 2. **Timeline grouping** ([`group`]): a decider chain assigns each log a
//!    timeline path; delete-collection logs fan out onto their children
//! 3. **Manifest reconstruction** ([`manifest`]): per timeline, bodies are
//!    rebuilt by merging patches through the kind-indexed merge config
//! 4. Recorder dispatch lives in the `khi-recorder` crate
//!
//! [`tasks`] wires the stages (plus log ingestion) into task graph
//! definitions. Every stage is skipped in dry-run.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod extract;
pub mod gcp;
pub mod group;
pub mod manifest;
pub mod merge;
mod operation;
mod parsed;
pub mod tasks;

pub use extract::{extract_audit_logs, AuditLogExtractor, ExtractOutcome, JsonAuditExtractor};
pub use gcp::GcpAuditExtractor;
pub use group::{
    DefaultGroupDecider, GroupDecider, GroupedLogs, SubresourceGroupDecider, TimelineGrouper,
};
pub use manifest::{
    rebuild_manifests, rebuild_timeline, ManifestTimeline, ManifestTimelines, TimelineEntry,
    BODY_PLACEHOLDER,
};
pub use merge::MergeConfigRegistry;
pub use operation::KubernetesOperation;
pub use parsed::{BodyType, ParsedAuditLog};

/// Errors raised by the normalization pipeline
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// A stage observed cancellation between items
    #[error("audit pipeline cancelled")]
    Cancelled,

    /// A single log could not be extracted
    #[error("audit log extraction failed: {0}")]
    Extract(String),

    /// A stage worker panicked or was aborted
    #[error("audit pipeline worker failed: {0}")]
    Worker(String),
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
