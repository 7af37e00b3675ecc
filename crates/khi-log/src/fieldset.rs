//! Kind-tagged parsed views attached to logs
//!
//! A [`FieldSet`] is a parsed projection of a log body (timestamps, audit
//! operation fields, ...). Producers attach them once; consumers look them
//! up by kind string and downcast to the concrete type.

use crate::reader::LogReader;
use crate::severity::Severity;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A parsed view of a log, identified by a kind string
///
/// Kind strings must be unique across the process; two field set types
/// sharing a kind would shadow each other in the [`FieldSetMap`].
pub trait FieldSet: Any + Send + Sync {
    /// Unique kind string for lookup
    fn kind(&self) -> &'static str;

    /// Upcast for downcasting to the concrete field set type
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Mutable set of field sets keyed by kind
#[derive(Default)]
pub struct FieldSetMap {
    entries: RwLock<HashMap<&'static str, Arc<dyn FieldSet>>>,
}

impl FieldSetMap {
    /// Create an empty map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a field set, replacing any prior one of the same kind
    pub fn set(&self, field_set: Arc<dyn FieldSet>) {
        self.entries.write().insert(field_set.kind(), field_set);
    }

    /// Look up a field set by its concrete type
    #[must_use]
    pub fn get<T: FieldSet + KindTag>(&self) -> Option<Arc<T>> {
        let entry = self.entries.read().get(T::KIND).cloned()?;
        entry.as_any().downcast::<T>().ok()
    }

    /// Whether a field set of the given kind is attached
    #[must_use]
    pub fn has(&self, kind: &str) -> bool {
        self.entries.read().contains_key(kind)
    }
}

impl std::fmt::Debug for FieldSetMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<_> = self.entries.read().keys().copied().collect();
        f.debug_struct("FieldSetMap").field("kinds", &kinds).finish()
    }
}

/// Associates a field set type with its kind string at compile time
pub trait KindTag {
    /// The kind string, equal to what [`FieldSet::kind`] returns
    const KIND: &'static str;
}

/// Fields every ingested log must carry
#[derive(Debug, Clone)]
pub struct CommonFieldSet {
    /// Wall-clock time the log was emitted
    pub timestamp: DateTime<Utc>,
    /// Provider severity
    pub severity: Severity,
    /// Provider-stable identifier, used for display and dedup
    pub display_id: String,
}

impl KindTag for CommonFieldSet {
    const KIND: &'static str = "common";
}

impl FieldSet for CommonFieldSet {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Parsed Kubernetes audit fields the normalization pipeline requires
///
/// Request and response payloads stay as readers so downstream stages can
/// probe them without another parse.
#[derive(Debug, Clone)]
pub struct K8sAuditFieldSet {
    /// Correlates the request-received and response-complete entries of one
    /// API call
    pub operation_id: String,
    /// Entry is the first for its operation id
    pub is_first: bool,
    /// Entry is the last for its operation id
    pub is_last: bool,
    /// Authenticated principal that issued the request
    pub principal: String,
    /// HTTP-ish response code
    pub status_code: i64,
    /// Response status message, when present
    pub status_message: String,
    /// Response indicated an error
    pub is_error: bool,
    /// Request payload, when captured
    pub request: Option<LogReader>,
    /// Response payload, when captured
    pub response: Option<LogReader>,
}

impl KindTag for K8sAuditFieldSet {
    const KIND: &'static str = "k8s_audit";
}

impl FieldSet for K8sAuditFieldSet {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_common() {
        let map = FieldSetMap::new();
        map.set(Arc::new(CommonFieldSet {
            timestamp: Utc::now(),
            severity: Severity::Info,
            display_id: "insert-1".to_string(),
        }));

        let fetched = map.get::<CommonFieldSet>().unwrap();
        assert_eq!(fetched.display_id, "insert-1");
        assert!(map.has("common"));
        assert!(!map.has("k8s_audit"));
    }

    #[test]
    fn replace_same_kind() {
        let map = FieldSetMap::new();
        for id in ["a", "b"] {
            map.set(Arc::new(CommonFieldSet {
                timestamp: Utc::now(),
                severity: Severity::Info,
                display_id: id.to_string(),
            }));
        }
        assert_eq!(map.get::<CommonFieldSet>().unwrap().display_id, "b");
    }

    #[test]
    fn missing_kind_is_none() {
        let map = FieldSetMap::new();
        assert!(map.get::<K8sAuditFieldSet>().is_none());
    }
}
