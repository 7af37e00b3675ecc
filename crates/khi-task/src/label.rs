//! Task labels
//!
//! A label set is a small heterogeneous map attached to a task definition.
//! Resolution and the UI read well-known keys from [`labels`].

use crate::typedmap::TypedKey;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Well-known label keys
pub mod labels {
    use crate::typedmap::TypedKey;

    /// Task is user-selectable from the UI
    pub static FEATURE: TypedKey<bool> = TypedKey::new("khi/label/feature");
    /// Task is pulled into every run of its inspection type
    pub static REQUIRED: TypedKey<bool> = TypedKey::new("khi/label/required");
    /// Inspection types the task is eligible for; empty means all
    pub static INSPECTION_TYPES: TypedKey<Vec<String>> =
        TypedKey::new("khi/label/inspection-types");
    /// Task reports fine-grained progress
    pub static PROGRESS_REPORTABLE: TypedKey<bool> =
        TypedKey::new("khi/label/progress-reportable");
    /// Feature title shown in the UI
    pub static TITLE: TypedKey<String> = TypedKey::new("khi/label/title");
    /// Feature description shown in the UI
    pub static DESCRIPTION: TypedKey<String> = TypedKey::new("khi/label/description");
    /// Log type the feature produces
    pub static LOG_TYPE: TypedKey<String> = TypedKey::new("khi/label/log-type");
    /// Display ordering among features, ascending
    pub static ORDER: TypedKey<i64> = TypedKey::new("khi/label/order");
    /// Reference ids to also include whenever this task is included
    pub static SUBSEQUENT_TASKS: TypedKey<Vec<String>> =
        TypedKey::new("khi/label/subsequent-tasks");
}

/// Heterogeneous label map for one task
#[derive(Default, Clone)]
pub struct LabelSet {
    entries: HashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

impl LabelSet {
    /// Empty label set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(mut self, key: TypedKey<T>, value: T) -> Self {
        self.entries.insert(key.name(), Arc::new(value));
        self
    }

    /// Typed read
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self, key: TypedKey<T>) -> Option<Arc<T>> {
        self.entries
            .get(key.name())
            .and_then(|v| v.clone().downcast::<T>().ok())
    }

    /// `FEATURE` label set to true
    #[must_use]
    pub fn is_feature(&self) -> bool {
        self.get(labels::FEATURE).is_some_and(|v| *v)
    }

    /// `REQUIRED` label set to true
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.get(labels::REQUIRED).is_some_and(|v| *v)
    }

    /// Inspection-type filter; empty means eligible everywhere
    #[must_use]
    pub fn inspection_types(&self) -> Vec<String> {
        self.get(labels::INSPECTION_TYPES)
            .map(|v| (*v).clone())
            .unwrap_or_default()
    }

    /// Whether the task is eligible under `inspection_type`
    #[must_use]
    pub fn matches_inspection_type(&self, inspection_type: &str) -> bool {
        let types = self.inspection_types();
        types.is_empty() || types.iter().any(|t| t == inspection_type)
    }

    /// Reference ids listed on the subsequent-tasks label
    #[must_use]
    pub fn subsequent_tasks(&self) -> Vec<String> {
        self.get(labels::SUBSEQUENT_TASKS)
            .map(|v| (*v).clone())
            .unwrap_or_default()
    }

    /// Feature title, when labeled
    #[must_use]
    pub fn title(&self) -> Option<String> {
        self.get(labels::TITLE).map(|v| (*v).clone())
    }
}

impl std::fmt::Debug for LabelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<_> = self.entries.keys().copied().collect();
        f.debug_struct("LabelSet").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_flags() {
        let set = LabelSet::new()
            .with(labels::FEATURE, true)
            .with(labels::TITLE, "Audit logs".to_string());
        assert!(set.is_feature());
        assert!(!set.is_required());
        assert_eq!(set.title().as_deref(), Some("Audit logs"));
    }

    #[test]
    fn inspection_type_filter() {
        let unrestricted = LabelSet::new();
        assert!(unrestricted.matches_inspection_type("gke"));

        let restricted =
            LabelSet::new().with(labels::INSPECTION_TYPES, vec!["gke".to_string()]);
        assert!(restricted.matches_inspection_type("gke"));
        assert!(!restricted.matches_inspection_type("baremetal"));
    }

    #[test]
    fn subsequent_tasks_default_empty() {
        assert!(LabelSet::new().subsequent_tasks().is_empty());
        let set = LabelSet::new().with(
            labels::SUBSEQUENT_TASKS,
            vec!["khi/discovery/ip-map".to_string()],
        );
        assert_eq!(set.subsequent_tasks(), vec!["khi/discovery/ip-map"]);
    }
}
