//! The history builder

use crate::path::ResourcePath;
use crate::revision::ParentRelationship;
use crate::timeline::TimelineBuilder;
use dashmap::DashMap;
use khi_chunk::{BinaryReference, ChunkError, ChunkStore};
use khi_log::{Log, LogId, Severity};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Errors raised while mutating or serializing history
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Chunk store failure
    #[error(transparent)]
    Chunk(#[from] ChunkError),

    /// A change set disagreed with an already-recorded parent relationship
    #[error("conflicting parent relationship for '{path}'")]
    RelationshipConflict { path: ResourcePath },

    /// A log id that was never ingested
    #[error("unknown log id {0}")]
    UnknownLog(LogId),

    /// Artifact serialization failure
    #[error("artifact serialization failed: {0}")]
    Serialize(String),

    /// Artifact io failure
    #[error("artifact io error: {0}")]
    Io(#[from] std::io::Error),

    /// Finalization observed cancellation
    #[error("history finalization cancelled")]
    Cancelled,
}

/// Annotation attached to a stored log during recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogAnnotation {
    pub key: String,
    pub value: String,
}

/// Mutable decoration recorders attach to a stored log
#[derive(Debug, Clone, Default, Serialize)]
pub struct LogDecoration {
    pub summary: Option<String>,
    pub severity: Option<Severity>,
    pub annotations: Vec<LogAnnotation>,
}

/// Node of the resource tree; children keyed by the next path segment
#[derive(Debug, Default)]
struct ResourceNode {
    children: BTreeMap<String, ResourceNode>,
}

impl ResourceNode {
    fn ensure(&mut self, segments: &[&str]) {
        if let Some((head, rest)) = segments.split_first() {
            self.children
                .entry((*head).to_string())
                .or_default()
                .ensure(rest);
        }
    }
}

/// One log as stored in the builder: the record plus its body reference
#[derive(Debug, Clone)]
struct StoredLog {
    log: Arc<Log>,
    body: BinaryReference,
}

/// Tree of resources and their timelines for one inspection
///
/// Shared via `Arc` across every task of a run. The tree lock covers only
/// structure mutations; timelines lock individually; the chunk store is
/// internally synchronized.
pub struct HistoryBuilder {
    chunk_store: Arc<ChunkStore>,
    tree: RwLock<ResourceNode>,
    timelines: DashMap<ResourcePath, Arc<TimelineBuilder>>,
    logs: RwLock<Vec<StoredLog>>,
    decorations: DashMap<LogId, LogDecoration>,
    aliases: DashMap<ResourcePath, Vec<ResourcePath>>,
    relationships: DashMap<ResourcePath, ParentRelationship>,
}

impl HistoryBuilder {
    /// Builder backed by `chunk_store`
    #[must_use]
    pub fn new(chunk_store: Arc<ChunkStore>) -> Self {
        Self {
            chunk_store,
            tree: RwLock::new(ResourceNode::default()),
            timelines: DashMap::new(),
            logs: RwLock::new(Vec::new()),
            decorations: DashMap::new(),
            aliases: DashMap::new(),
            relationships: DashMap::new(),
        }
    }

    /// The chunk store revision bodies are written to
    #[inline]
    #[must_use]
    pub fn chunk_store(&self) -> &Arc<ChunkStore> {
        &self.chunk_store
    }

    /// Idempotently materialize the tree node for every `#`-prefix of `path`
    pub fn ensure_resource_path(&self, path: &ResourcePath) {
        self.tree.write().ensure(&path.segments());
    }

    /// Timeline builder for `path`, created on first use
    ///
    /// Concurrent calls on distinct paths do not serialize against each
    /// other beyond the tree-structure write.
    #[must_use]
    pub fn timeline(&self, path: &ResourcePath) -> Arc<TimelineBuilder> {
        if let Some(existing) = self.timelines.get(path) {
            return Arc::clone(&existing);
        }
        self.ensure_resource_path(path);
        Arc::clone(
            &self
                .timelines
                .entry(path.clone())
                .or_insert_with(|| Arc::new(TimelineBuilder::new(path.clone()))),
        )
    }

    /// Timeline builder for `path` if one was ever created
    #[must_use]
    pub fn try_timeline(&self, path: &ResourcePath) -> Option<Arc<TimelineBuilder>> {
        self.timelines.get(path).map(|t| Arc::clone(&t))
    }

    /// Every timeline path created so far, sorted
    #[must_use]
    pub fn timeline_paths(&self) -> Vec<ResourcePath> {
        let mut paths: Vec<_> = self.timelines.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Ingest logs, assigning dense ids in input order
    ///
    /// Each log body is also written to the chunk store so the artifact can
    /// carry the raw text. `on_each` is invoked per log for progress.
    ///
    /// # Errors
    /// [`HistoryError::Chunk`] when a body write fails.
    pub async fn serialize_logs(
        &self,
        logs: Vec<Arc<Log>>,
        mut on_each: impl FnMut(LogId) + Send,
    ) -> Result<Vec<LogId>, HistoryError> {
        let mut ids = Vec::with_capacity(logs.len());
        for log in logs {
            let raw = serde_json::to_vec(log.reader().value("").unwrap_or(&serde_json::Value::Null))
                .map_err(|e| HistoryError::Serialize(e.to_string()))?;
            let body = self.chunk_store.write(&raw).await?;
            let id = {
                let mut stored = self.logs.write();
                let id = LogId(stored.len());
                stored.push(StoredLog { log, body });
                id
            };
            on_each(id);
            ids.push(id);
        }
        debug!(count = ids.len(), "ingested logs");
        Ok(ids)
    }

    /// Stored log by id
    #[must_use]
    pub fn log(&self, id: LogId) -> Option<Arc<Log>> {
        self.logs.read().get(id.0).map(|s| Arc::clone(&s.log))
    }

    /// Number of ingested logs
    #[must_use]
    pub fn log_count(&self) -> usize {
        self.logs.read().len()
    }

    /// Set the one-line summary shown for a log
    pub fn set_log_summary(&self, id: LogId, summary: String) {
        self.decorations.entry(id).or_default().summary = Some(summary);
    }

    /// Override a log's severity
    pub fn set_log_severity(&self, id: LogId, severity: Severity) {
        self.decorations.entry(id).or_default().severity = Some(severity);
    }

    /// Attach an annotation to a log
    pub fn annotate_log(&self, id: LogId, annotation: LogAnnotation) {
        self.decorations
            .entry(id)
            .or_default()
            .annotations
            .push(annotation);
    }

    /// Decoration snapshot for a log
    #[must_use]
    pub fn log_decoration(&self, id: LogId) -> Option<LogDecoration> {
        self.decorations.get(&id).map(|d| d.clone())
    }

    /// Install an alias from `source` to `target`
    ///
    /// Duplicate installs are ignored.
    pub fn add_alias(&self, source: ResourcePath, target: ResourcePath) {
        let mut targets = self.aliases.entry(source).or_default();
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    /// Alias targets installed for `source`
    #[must_use]
    pub fn aliases_of(&self, source: &ResourcePath) -> Vec<ResourcePath> {
        self.aliases
            .get(source)
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Record a parent relationship for `path`
    ///
    /// # Errors
    /// [`HistoryError::RelationshipConflict`] when a different relationship
    /// was recorded earlier. Re-recording an equal relationship is fine.
    pub fn set_relationship(
        &self,
        path: ResourcePath,
        relationship: ParentRelationship,
    ) -> Result<(), HistoryError> {
        match self.relationships.entry(path.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                if *existing.get() == relationship {
                    Ok(())
                } else {
                    Err(HistoryError::RelationshipConflict { path })
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(relationship);
                Ok(())
            }
        }
    }

    /// Check whether a relationship could be recorded without conflict
    #[must_use]
    pub fn relationship_compatible(
        &self,
        path: &ResourcePath,
        relationship: &ParentRelationship,
    ) -> bool {
        self.relationships
            .get(path)
            .map_or(true, |existing| *existing == *relationship)
    }

    /// Recorded relationship for `path`
    #[must_use]
    pub fn relationship(&self, path: &ResourcePath) -> Option<ParentRelationship> {
        self.relationships.get(path).map(|r| r.clone())
    }

    /// Snapshot of every `(child, relationship)` pair
    #[must_use]
    pub fn relationships(&self) -> Vec<(ResourcePath, ParentRelationship)> {
        let mut all: Vec<_> = self
            .relationships
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub(crate) fn stored_log_body(&self, id: LogId) -> Option<BinaryReference> {
        self.logs.read().get(id.0).map(|s| s.body)
    }
}
