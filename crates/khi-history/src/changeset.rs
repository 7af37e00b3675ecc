//! Per-log staged history mutations

use crate::builder::{HistoryBuilder, HistoryError, LogAnnotation};
use crate::path::ResourcePath;
use crate::revision::{ParentRelationship, ResourceRevision, RevisionState, RevisionVerb};
use crate::timeline::ResourceEvent;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use khi_log::{LogId, Severity};

/// A revision staged with its body still inline
///
/// The body becomes a chunk-store reference at flush time.
#[derive(Debug, Clone)]
pub struct StagedRevision {
    pub verb: RevisionVerb,
    pub state: RevisionState,
    pub requestor: String,
    pub change_time: DateTime<Utc>,
    pub body: String,
    pub partial: bool,
    pub inferred: bool,
}

/// Staged history mutations for one log
///
/// Created per recorder invocation, mutated single-threaded, then either
/// flushed completely into the [`HistoryBuilder`] or dropped. A recorder
/// returning an error drops its change set; nothing leaks into history.
#[derive(Debug)]
pub struct ChangeSet {
    log_id: LogId,
    log_timestamp: DateTime<Utc>,
    revisions: IndexMap<ResourcePath, Vec<StagedRevision>>,
    events: IndexMap<ResourcePath, Vec<ResourceEvent>>,
    aliases: Vec<(ResourcePath, ResourcePath)>,
    relationships: Vec<(ResourcePath, ParentRelationship)>,
    summary: Option<String>,
    severity: Option<Severity>,
    annotations: Vec<LogAnnotation>,
}

impl ChangeSet {
    /// Empty change set for the log with `log_id` at `log_timestamp`
    #[must_use]
    pub fn new(log_id: LogId, log_timestamp: DateTime<Utc>) -> Self {
        Self {
            log_id,
            log_timestamp,
            revisions: IndexMap::new(),
            events: IndexMap::new(),
            aliases: Vec::new(),
            relationships: Vec::new(),
            summary: None,
            severity: None,
            annotations: Vec::new(),
        }
    }

    /// Id of the log this change set belongs to
    #[inline]
    #[must_use]
    pub fn log_id(&self) -> LogId {
        self.log_id
    }

    /// Timestamp of the log this change set belongs to
    #[inline]
    #[must_use]
    pub fn log_timestamp(&self) -> DateTime<Utc> {
        self.log_timestamp
    }

    /// Stage a revision on `path`
    pub fn add_revision(&mut self, path: ResourcePath, revision: StagedRevision) {
        self.revisions.entry(path).or_default().push(revision);
    }

    /// Stage an event on `path`, timestamped with this log
    pub fn add_event(&mut self, path: ResourcePath) {
        self.add_event_at(path, self.log_timestamp);
    }

    /// Stage an event on `path` at an explicit timestamp
    pub fn add_event_at(&mut self, path: ResourcePath, timestamp: DateTime<Utc>) {
        self.events.entry(path).or_default().push(ResourceEvent {
            log_id: self.log_id,
            timestamp,
        });
    }

    /// Stage an alias from `source` to `target`
    pub fn add_alias(&mut self, source: ResourcePath, target: ResourcePath) {
        self.aliases.push((source, target));
    }

    /// Stage a parent-relationship rewrite for `path`
    pub fn set_relationship(&mut self, path: ResourcePath, relationship: ParentRelationship) {
        self.relationships.push((path, relationship));
    }

    /// Set the log's one-line summary
    pub fn set_summary(&mut self, summary: impl Into<String>) {
        self.summary = Some(summary.into());
    }

    /// Set the log's severity
    pub fn set_severity(&mut self, severity: Severity) {
        self.severity = Some(severity);
    }

    /// Attach a log annotation
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations.push(LogAnnotation {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Whether nothing was staged
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
            && self.events.is_empty()
            && self.aliases.is_empty()
            && self.relationships.is_empty()
            && self.summary.is_none()
            && self.severity.is_none()
            && self.annotations.is_empty()
    }

    /// Apply everything to `builder`, consuming the change set
    ///
    /// Staged bodies are written to the chunk store. Returns the sorted,
    /// deduplicated set of paths whose timelines changed; callers re-sort
    /// those timelines afterwards.
    ///
    /// # Errors
    /// [`HistoryError::RelationshipConflict`] when a staged relationship
    /// disagrees with a recorded one (checked before any mutation), or a
    /// chunk-store error; in both cases history is left untouched by the
    /// revision/event stages that did not yet run.
    pub async fn flush(self, builder: &HistoryBuilder) -> Result<Vec<ResourcePath>, HistoryError> {
        // Relationship conflicts abort before any other mutation lands.
        for (path, relationship) in &self.relationships {
            if !builder.relationship_compatible(path, relationship) {
                return Err(HistoryError::RelationshipConflict { path: path.clone() });
            }
        }

        let mut affected: Vec<ResourcePath> = Vec::new();

        for (path, staged) in self.revisions {
            let timeline = builder.timeline(&path);
            for revision in staged {
                let body = builder.chunk_store().write(revision.body.as_bytes()).await?;
                timeline.add_revision(ResourceRevision {
                    verb: revision.verb,
                    state: revision.state,
                    requestor: revision.requestor,
                    change_time: revision.change_time,
                    body,
                    partial: revision.partial,
                    inferred: revision.inferred,
                });
            }
            affected.push(path);
        }

        for (path, events) in self.events {
            let timeline = builder.timeline(&path);
            for event in events {
                timeline.add_event(event);
            }
            affected.push(path);
        }

        if let Some(summary) = self.summary {
            builder.set_log_summary(self.log_id, summary);
        }
        if let Some(severity) = self.severity {
            builder.set_log_severity(self.log_id, severity);
        }
        for annotation in self.annotations {
            builder.annotate_log(self.log_id, annotation);
        }
        for (source, target) in self.aliases {
            builder.add_alias(source, target);
        }
        for (path, relationship) in self.relationships {
            builder.set_relationship(path, relationship)?;
        }

        affected.sort();
        affected.dedup();
        Ok(affected)
    }
}
