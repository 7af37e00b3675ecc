//! Revisions and relationships

use crate::path::ResourcePath;
use chrono::{DateTime, Utc};
use khi_chunk::BinaryReference;
use serde::{Deserialize, Serialize};

/// Operation verb that produced a revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RevisionVerb {
    #[default]
    Unknown,
    Create,
    Update,
    Patch,
    Delete,
    DeleteCollection,
}

impl RevisionVerb {
    /// Parse an audit verb string
    #[must_use]
    pub fn parse(verb: &str) -> Self {
        match verb {
            "create" => Self::Create,
            "update" => Self::Update,
            "patch" => Self::Patch,
            "delete" => Self::Delete,
            "deletecollection" => Self::DeleteCollection,
            _ => Self::Unknown,
        }
    }

    /// Whether this verb mutates the resource body
    #[inline]
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Lifecycle state a revision records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RevisionState {
    #[default]
    Unknown,
    /// Resource exists
    Existing,
    /// Deletion requested with a grace period still running
    Deleting,
    /// Resource is gone
    Deleted,
    /// Existence inferred from later evidence, not observed directly
    Inferred,
    /// Container waiting to start
    ContainerWaiting,
    /// Container running
    ContainerRunning,
    /// Container exited with code 0
    ContainerTerminatedSuccess,
    /// Container exited with a non-zero code
    ContainerTerminatedError,
}

impl RevisionState {
    /// Whether the state means the resource no longer exists
    #[inline]
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

/// One recorded change of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRevision {
    pub verb: RevisionVerb,
    pub state: RevisionState,
    /// Principal that requested the change
    pub requestor: String,
    /// When the change took effect
    pub change_time: DateTime<Utc>,
    /// Body in the chunk store
    pub body: BinaryReference,
    /// Body was reconstructed from a partial payload
    pub partial: bool,
    /// Revision synthesized rather than observed
    pub inferred: bool,
}

/// How a timeline relates to another timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// Structural child of the layer above
    Child,
    /// Subresource of its owning resource
    Subresource,
    /// Managed through a Kubernetes owner reference
    Owner,
    /// Bound to a node through a scheduling binding
    Binding,
}

/// A timeline's declared relationship to a parent timeline
///
/// Set at most once per path; recorders that disagree about an existing
/// relationship fail their change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRelationship {
    pub kind: RelationshipKind,
    pub parent: ResourcePath,
}

impl ParentRelationship {
    /// Relationship of `kind` to `parent`
    #[inline]
    #[must_use]
    pub fn new(kind: RelationshipKind, parent: ResourcePath) -> Self {
        Self { kind, parent }
    }
}
