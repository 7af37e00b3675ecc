//! Run metadata registry
//!
//! Metadata entries accumulate facts about one run (header, errors,
//! queries, plan, form fields, progress). Entries flagged for inclusion are
//! rendered into the artifact's metadata section at finalization. Each
//! entry is responsible for its own locking.

use crate::form::{FormField, FormFieldSet};
use crate::progress::ProgressRegistry;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One metadata entry kind
pub trait MetadataEntry: Send + Sync + 'static {
    /// Unique kind string; doubles as the key in the metadata section
    fn kind(&self) -> &'static str;

    /// Whether the entry is written into the result artifact
    fn include_in_artifact(&self) -> bool;

    /// Serializable snapshot of the entry
    fn to_value(&self) -> Value;

    /// Upcast for typed retrieval
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Associates a metadata type with its kind string at compile time
pub trait MetadataKindTag {
    /// The kind string, equal to what [`MetadataEntry::kind`] returns
    const KIND: &'static str;
}

/// Registry of metadata entries for one run
#[derive(Default)]
pub struct MetadataRegistry {
    entries: DashMap<&'static str, Arc<dyn MetadataEntry>>,
}

impl MetadataRegistry {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing any prior entry of the same kind
    pub fn insert(&self, entry: Arc<dyn MetadataEntry>) {
        self.entries.insert(entry.kind(), entry);
    }

    /// Typed fetch of an entry
    #[must_use]
    pub fn get<T: MetadataEntry + MetadataKindTag>(&self) -> Option<Arc<T>> {
        let entry = self.entries.get(T::KIND).map(|e| Arc::clone(e.value()))?;
        entry.into_any().downcast::<T>().ok()
    }

    /// Typed fetch, inserting `T::default()` when absent
    #[must_use]
    pub fn get_or_init<T: MetadataEntry + MetadataKindTag + Default>(&self) -> Arc<T> {
        if let Some(existing) = self.get::<T>() {
            return existing;
        }
        let entry = Arc::new(T::default());
        self.entries
            .entry(T::KIND)
            .or_insert_with(|| Arc::clone(&entry) as Arc<dyn MetadataEntry>);
        // Re-read: a racing insert wins over ours.
        self.get::<T>().unwrap_or(entry)
    }

    /// Render entries flagged for the artifact, keyed by kind, sorted
    #[must_use]
    pub fn artifact_values(&self) -> Value {
        let map: BTreeMap<&'static str, Value> = self
            .entries
            .iter()
            .filter(|e| e.value().include_in_artifact())
            .map(|e| (*e.key(), e.value().to_value()))
            .collect();
        serde_json::to_value(map).unwrap_or(Value::Null)
    }

    /// Render every entry, keyed by kind, sorted
    #[must_use]
    pub fn all_values(&self) -> Value {
        let map: BTreeMap<&'static str, Value> = self
            .entries
            .iter()
            .map(|e| (*e.key(), e.value().to_value()))
            .collect();
        serde_json::to_value(map).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
struct Header {
    inspection_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_size: Option<u64>,
    #[serde(skip_serializing_if = "String::is_empty")]
    suggested_file_name: String,
}

/// Artifact header: inspection type, run times, final file size
#[derive(Debug, Default)]
pub struct HeaderMetadata {
    inner: Mutex<Header>,
}

impl HeaderMetadata {
    pub fn set_inspection_type(&self, inspection_type: impl Into<String>) {
        self.inner.lock().inspection_type = inspection_type.into();
    }

    pub fn set_start_time(&self, t: DateTime<Utc>) {
        self.inner.lock().start_time = Some(t);
    }

    pub fn set_end_time(&self, t: DateTime<Utc>) {
        self.inner.lock().end_time = Some(t);
    }

    /// Record the total artifact size once serialization finished
    pub fn set_file_size(&self, bytes: u64) {
        self.inner.lock().file_size = Some(bytes);
    }

    pub fn set_suggested_file_name(&self, name: impl Into<String>) {
        self.inner.lock().suggested_file_name = name.into();
    }

    #[must_use]
    pub fn file_size(&self) -> Option<u64> {
        self.inner.lock().file_size
    }
}

impl MetadataKindTag for HeaderMetadata {
    const KIND: &'static str = "header";
}

impl MetadataEntry for HeaderMetadata {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn include_in_artifact(&self) -> bool {
        true
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(&*self.inner.lock()).unwrap_or(Value::Null)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ---------------------------------------------------------------------------
// Error set
// ---------------------------------------------------------------------------

/// One recorded error for post-mortem
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
}

/// Errors surfaced to the user, preserved for post-mortem
#[derive(Debug, Default)]
pub struct ErrorSetMetadata {
    errors: Mutex<Vec<ErrorReport>>,
}

impl ErrorSetMetadata {
    /// Record an error without task attribution
    pub fn add(&self, message: impl Into<String>) {
        self.errors.lock().push(ErrorReport {
            message: message.into(),
            task: None,
        });
    }

    /// Record an error raised by a task
    pub fn add_for_task(&self, task: impl Into<String>, message: impl Into<String>) {
        self.errors.lock().push(ErrorReport {
            message: message.into(),
            task: Some(task.into()),
        });
    }

    /// Number of recorded errors
    #[must_use]
    pub fn count(&self) -> usize {
        self.errors.lock().len()
    }

    /// Snapshot of recorded errors
    #[must_use]
    pub fn reports(&self) -> Vec<ErrorReport> {
        self.errors.lock().clone()
    }
}

impl MetadataKindTag for ErrorSetMetadata {
    const KIND: &'static str = "error_set";
}

impl MetadataEntry for ErrorSetMetadata {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn include_in_artifact(&self) -> bool {
        true
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(&*self.errors.lock()).unwrap_or(Value::Null)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// One upstream query issued (or previewed) by a log source task
#[derive(Debug, Clone, Serialize)]
pub struct QueryEntry {
    pub id: String,
    pub query: String,
}

/// Queries issued by log source tasks; previews in dry-run
#[derive(Debug, Default)]
pub struct QueryMetadata {
    queries: Mutex<Vec<QueryEntry>>,
}

impl QueryMetadata {
    /// Record (or replace) the query produced under `id`
    pub fn set(&self, id: impl Into<String>, query: impl Into<String>) {
        let id = id.into();
        let mut queries = self.queries.lock();
        match queries.iter_mut().find(|q| q.id == id) {
            Some(existing) => existing.query = query.into(),
            None => queries.push(QueryEntry {
                id,
                query: query.into(),
            }),
        }
    }

    /// Snapshot of recorded queries
    #[must_use]
    pub fn entries(&self) -> Vec<QueryEntry> {
        self.queries.lock().clone()
    }
}

impl MetadataKindTag for QueryMetadata {
    const KIND: &'static str = "query";
}

impl MetadataEntry for QueryMetadata {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn include_in_artifact(&self) -> bool {
        true
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(&*self.queries.lock()).unwrap_or(Value::Null)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Resolved task ids of the run, in execution order
#[derive(Debug, Default)]
pub struct PlanMetadata {
    tasks: Mutex<Vec<String>>,
}

impl PlanMetadata {
    /// Record the resolved plan
    pub fn set_tasks(&self, tasks: Vec<String>) {
        *self.tasks.lock() = tasks;
    }

    /// Snapshot of the plan
    #[must_use]
    pub fn tasks(&self) -> Vec<String> {
        self.tasks.lock().clone()
    }
}

impl MetadataKindTag for PlanMetadata {
    const KIND: &'static str = "plan";
}

impl MetadataEntry for PlanMetadata {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn include_in_artifact(&self) -> bool {
        true
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(&*self.tasks.lock()).unwrap_or(Value::Null)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ---------------------------------------------------------------------------
// Form fields
// ---------------------------------------------------------------------------

/// Form fields populated during dry-run
#[derive(Debug, Default)]
pub struct FormFieldsMetadata {
    set: Mutex<FormFieldSet>,
}

impl FormFieldsMetadata {
    /// Insert or replace a field
    pub fn upsert(&self, field: FormField) {
        self.set.lock().upsert(field);
    }

    /// Snapshot in presentation order
    #[must_use]
    pub fn fields(&self) -> Vec<FormField> {
        self.set.lock().fields()
    }

    /// Number of populated fields
    #[must_use]
    pub fn len(&self) -> usize {
        self.set.lock().len()
    }

    /// Whether no field was populated
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.lock().is_empty()
    }
}

impl MetadataKindTag for FormFieldsMetadata {
    const KIND: &'static str = "form";
}

impl MetadataEntry for FormFieldsMetadata {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn include_in_artifact(&self) -> bool {
        true
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self.set.lock().fields()).unwrap_or(Value::Null)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress snapshot included in the artifact
///
/// Wraps the run's progress registry; the snapshot is taken when the
/// metadata section is rendered.
pub struct ProgressMetadata {
    registry: Arc<ProgressRegistry>,
}

impl ProgressMetadata {
    /// Entry wrapping `registry`
    #[must_use]
    pub fn new(registry: Arc<ProgressRegistry>) -> Self {
        Self { registry }
    }
}

impl MetadataKindTag for ProgressMetadata {
    const KIND: &'static str = "progress";
}

impl MetadataEntry for ProgressMetadata {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn include_in_artifact(&self) -> bool {
        true
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self.registry.snapshot()).unwrap_or(Value::Null)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
