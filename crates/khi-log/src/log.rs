//! The log record

use crate::fieldset::{CommonFieldSet, FieldSetMap, KindTag};
use crate::reader::LogReader;
use crate::severity::Severity;
use crate::FieldSet;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// Stable per-inspection log identifier
///
/// Assigned by the history builder when logs are ingested; dense from zero.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct LogId(pub usize);

impl std::fmt::Display for LogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "log-{}", self.0)
    }
}

/// Errors raised while constructing or interrogating logs
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// A required field set is not attached
    #[error("field set '{0}' is not attached")]
    MissingFieldSet(&'static str),

    /// The raw body is not a JSON object
    #[error("log body must be a JSON object")]
    NotAnObject,
}

/// One ingested log entry
///
/// The body is immutable and shared; parsed views accumulate in the field
/// set map as pipeline stages run.
#[derive(Debug)]
pub struct Log {
    body: Arc<Value>,
    field_sets: FieldSetMap,
}

impl Log {
    /// Wrap a raw JSON log body
    ///
    /// # Errors
    /// [`LogError::NotAnObject`] when the body is a scalar or array.
    pub fn new(body: Value) -> Result<Self, LogError> {
        if !body.is_object() {
            return Err(LogError::NotAnObject);
        }
        Ok(Self {
            body: Arc::new(body),
            field_sets: FieldSetMap::new(),
        })
    }

    /// Reader anchored at the body root
    #[inline]
    #[must_use]
    pub fn reader(&self) -> LogReader {
        LogReader::new(Arc::clone(&self.body))
    }

    /// Typed scalar read, shorthand for `self.reader().read_str(path)`
    #[must_use]
    pub fn read_str_or<'a>(&'a self, path: &str, default: &'a str) -> &'a str {
        // LogReader borrows from the Arc'd body, which outlives the reader,
        // but the signature ties the lifetime to self; go through the body.
        let mut cur: &Value = &self.body;
        for seg in path.split('.') {
            match cur.get(seg) {
                Some(v) => cur = v,
                None => return default,
            }
        }
        cur.as_str().unwrap_or(default)
    }

    /// Attach a parsed view
    pub fn set_field_set(&self, fs: Arc<dyn FieldSet>) {
        self.field_sets.set(fs);
    }

    /// Fetch a parsed view by type
    #[must_use]
    pub fn field_set<T: FieldSet + KindTag>(&self) -> Option<Arc<T>> {
        self.field_sets.get::<T>()
    }

    /// Fetch a parsed view, erroring when absent
    ///
    /// # Errors
    /// [`LogError::MissingFieldSet`].
    pub fn require_field_set<T: FieldSet + KindTag>(&self) -> Result<Arc<T>, LogError> {
        self.field_sets
            .get::<T>()
            .ok_or(LogError::MissingFieldSet(T::KIND))
    }

    /// Timestamp from the common field set
    ///
    /// # Errors
    /// [`LogError::MissingFieldSet`] when the common field set was never
    /// attached.
    pub fn timestamp(&self) -> Result<DateTime<Utc>, LogError> {
        Ok(self.require_field_set::<CommonFieldSet>()?.timestamp)
    }

    /// Severity from the common field set, `Unknown` when unattached
    #[must_use]
    pub fn severity(&self) -> Severity {
        self.field_set::<CommonFieldSet>()
            .map_or(Severity::Unknown, |fs| fs.severity)
    }

    /// Display id from the common field set, empty when unattached
    #[must_use]
    pub fn display_id(&self) -> String {
        self.field_set::<CommonFieldSet>()
            .map_or_else(String::new, |fs| fs.display_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn log_requires_object_body() {
        assert!(Log::new(json!("scalar")).is_err());
        assert!(Log::new(json!({"a": 1})).is_ok());
    }

    #[test]
    fn log_read_shorthand() {
        let log = Log::new(json!({"a": {"b": "c"}})).unwrap();
        assert_eq!(log.read_str_or("a.b", "x"), "c");
        assert_eq!(log.read_str_or("a.z", "x"), "x");
    }

    #[test]
    fn log_common_accessors() {
        let log = Log::new(json!({})).unwrap();
        assert_eq!(log.severity(), Severity::Unknown);
        assert!(log.timestamp().is_err());

        log.set_field_set(Arc::new(CommonFieldSet {
            timestamp: Utc::now(),
            severity: Severity::Warning,
            display_id: "d-1".to_string(),
        }));
        assert_eq!(log.severity(), Severity::Warning);
        assert_eq!(log.display_id(), "d-1");
        assert!(log.timestamp().is_ok());
    }
}
