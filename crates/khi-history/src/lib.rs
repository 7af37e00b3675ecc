//! KHI History Model
//!
//! The concurrent data structure at the center of an inspection: a tree of
//! resources, each with a timeline of revisions and events, backed by the
//! content-addressed chunk store for large bodies.
//!
//! # Core Concepts
//!
//! - [`ResourcePath`]: `#`-separated hierarchical identity of one timeline
//! - [`TimelineBuilder`]: per-resource revision/event sequence with sorted
//!   reads and a dirty-flag discipline
//! - [`HistoryBuilder`]: thread-safe tree + timeline registry + ingested
//!   log store; owns the [`khi_chunk::ChunkStore`]
//! - [`ChangeSet`]: per-log staged mutations, flushed atomically
//! - [`HistoryBuilder::finalize`]: writes the artifact (metadata, history,
//!   binary sections)
//!
//! # Lock order
//!
//! Builder tree lock → timeline lock → chunk store internals.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod builder;
mod changeset;
mod path;
mod revision;
mod serialize;
mod timeline;

pub use builder::{HistoryBuilder, HistoryError, LogAnnotation, LogDecoration};
pub use changeset::{ChangeSet, StagedRevision};
pub use path::{ResourcePath, CLUSTER_SCOPE};
pub use revision::{ParentRelationship, RelationshipKind, ResourceRevision, RevisionState, RevisionVerb};
pub use serialize::ArtifactSizes;
pub use timeline::{ResourceEvent, TimelineBuilder};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
