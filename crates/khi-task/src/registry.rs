//! Task registration and dependency resolution

use crate::task::{ConfigError, TaskDefinition};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// A named inspection profile restricting task eligibility
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionType {
    pub id: String,
    pub label: String,
}

impl InspectionType {
    /// Inspection type `id` with a display label
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Registry of every known task and inspection type
#[derive(Default)]
pub struct TaskSet {
    tasks: Vec<Arc<TaskDefinition>>,
    inspection_types: Vec<InspectionType>,
}

impl TaskSet {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task
    ///
    /// # Errors
    /// [`ConfigError::DuplicateTask`] when reference and implementation
    /// collide with an earlier registration.
    pub fn register(&mut self, task: Arc<TaskDefinition>) -> Result<(), ConfigError> {
        if self.tasks.iter().any(|t| t.id() == task.id()) {
            return Err(ConfigError::DuplicateTask(task.id().clone()));
        }
        self.tasks.push(task);
        Ok(())
    }

    /// Register an inspection type
    ///
    /// # Errors
    /// [`ConfigError::DuplicateInspectionType`] on id collision.
    pub fn add_inspection_type(&mut self, it: InspectionType) -> Result<(), ConfigError> {
        if self.inspection_types.iter().any(|e| e.id == it.id) {
            return Err(ConfigError::DuplicateInspectionType(it.id));
        }
        self.inspection_types.push(it);
        Ok(())
    }

    /// Registered inspection types
    #[must_use]
    pub fn inspection_types(&self) -> &[InspectionType] {
        &self.inspection_types
    }

    /// Tasks carrying the feature label, eligible under `inspection_type`
    #[must_use]
    pub fn feature_tasks(&self, inspection_type: &str) -> Vec<Arc<TaskDefinition>> {
        self.tasks
            .iter()
            .filter(|t| t.labels().is_feature() && t.labels().matches_inspection_type(inspection_type))
            .cloned()
            .collect()
    }

    /// Resolve the executable closure for a feature selection
    ///
    /// Includes, transitively: the selected features, their dependencies,
    /// every eligible task carrying the required label, and the
    /// subsequent-task refs of anything included (when eligible; a missing
    /// subsequent ref is skipped, a missing dependency is fatal). The result
    /// is topologically ordered; cycles are rejected here, before anything
    /// executes.
    ///
    /// # Errors
    /// [`ConfigError`] for unknown inspection types, missing or ambiguous
    /// references, and cycles.
    pub fn resolve(
        &self,
        features: &[String],
        inspection_type: &str,
    ) -> Result<RunnableTaskSet, ConfigError> {
        if !self.inspection_types.iter().any(|it| it.id == inspection_type) {
            return Err(ConfigError::UnknownInspectionType(
                inspection_type.to_string(),
            ));
        }

        // Inspection-type filtering first; everything later sees only
        // eligible tasks.
        let eligible: Vec<usize> = (0..self.tasks.len())
            .filter(|&i| self.tasks[i].labels().matches_inspection_type(inspection_type))
            .collect();
        let mut by_reference: HashMap<&str, Vec<usize>> = HashMap::new();
        for &i in &eligible {
            by_reference
                .entry(self.tasks[i].id().reference())
                .or_default()
                .push(i);
        }

        let mut included: BTreeSet<usize> = BTreeSet::new();
        // (reference, required_by, optional)
        let mut worklist: VecDeque<(String, String, bool)> = VecDeque::new();

        for feature in features {
            worklist.push_back((feature.clone(), "feature selection".to_string(), false));
        }
        for &i in &eligible {
            if self.tasks[i].labels().is_required() {
                worklist.push_back((
                    self.tasks[i].id().reference().to_string(),
                    "required label".to_string(),
                    false,
                ));
            }
        }

        while let Some((reference, required_by, optional)) = worklist.pop_front() {
            let candidates = by_reference.get(reference.as_str());
            let index = match candidates.map(Vec::as_slice) {
                None | Some([]) => {
                    if optional {
                        continue;
                    }
                    return Err(ConfigError::MissingDependency {
                        reference,
                        required_by,
                    });
                }
                Some([single]) => *single,
                Some(_) => return Err(ConfigError::AmbiguousReference(reference)),
            };
            if !included.insert(index) {
                continue;
            }
            let task = &self.tasks[index];
            for dep in task.dependencies() {
                worklist.push_back((dep.clone(), task.id().to_string(), false));
            }
            for subsequent in task.labels().subsequent_tasks() {
                worklist.push_back((subsequent, task.id().to_string(), true));
            }
        }

        // Dependency edges, plus soft edges from subsequent refs so the
        // provider completes before the task that pulled it in.
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
        let reference_of = |i: usize| self.tasks[i].id().reference();
        let index_of: HashMap<&str, usize> = included
            .iter()
            .map(|&i| (reference_of(i), i))
            .collect();
        for &i in &included {
            graph.add_node(i);
        }
        for &i in &included {
            for dep in self.tasks[i].dependencies() {
                let dep_index = index_of.get(dep.as_str()).copied().ok_or_else(|| {
                    ConfigError::MissingDependency {
                        reference: dep.clone(),
                        required_by: self.tasks[i].id().to_string(),
                    }
                })?;
                graph.add_edge(dep_index, i, ());
            }
            for subsequent in self.tasks[i].labels().subsequent_tasks() {
                if let Some(&provider) = index_of.get(subsequent.as_str()) {
                    graph.add_edge(provider, i, ());
                }
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            ConfigError::CycleDetected(self.tasks[cycle.node_id()].id().to_string())
        })?;

        let tasks: Vec<Arc<TaskDefinition>> =
            order.into_iter().map(|i| self.tasks[i].clone()).collect();
        debug!(
            count = tasks.len(),
            inspection_type, "resolved runnable task set"
        );
        Ok(RunnableTaskSet { tasks })
    }
}

/// An ordered, executable closure of tasks
#[derive(Clone)]
pub struct RunnableTaskSet {
    tasks: Vec<Arc<TaskDefinition>>,
}

impl std::fmt::Debug for RunnableTaskSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableTaskSet")
            .field("tasks", &self.tasks.iter().map(|t| t.id()).collect::<Vec<_>>())
            .finish()
    }
}

impl RunnableTaskSet {
    /// Tasks in a valid execution order
    #[inline]
    #[must_use]
    pub fn tasks(&self) -> &[Arc<TaskDefinition>] {
        &self.tasks
    }

    /// Full task ids in execution order, for the plan metadata
    #[must_use]
    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.id().to_string()).collect()
    }

    /// Whether a reference is part of the closure
    #[must_use]
    pub fn contains(&self, reference: &str) -> bool {
        self.tasks.iter().any(|t| t.id().reference() == reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::TaskId;
    use crate::label::{labels, LabelSet};
    use crate::task::TaskError;

    fn noop(
        reference: &str,
        deps: Vec<&str>,
        labels: LabelSet,
    ) -> Arc<TaskDefinition> {
        TaskDefinition::new(
            TaskId::new(reference),
            deps.into_iter().map(str::to_string).collect(),
            labels,
            |_ctx| async { Ok::<_, TaskError>(()) },
        )
    }

    fn set_with(tasks: Vec<Arc<TaskDefinition>>) -> TaskSet {
        let mut set = TaskSet::new();
        set.add_inspection_type(InspectionType::new("gke", "GKE"))
            .unwrap();
        for t in tasks {
            set.register(t).unwrap();
        }
        set
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut set = TaskSet::new();
        set.register(noop("a", vec![], LabelSet::new())).unwrap();
        let err = set.register(noop("a", vec![], LabelSet::new())).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTask(_)));
    }

    #[test]
    fn closure_pulls_dependencies_and_required() {
        let set = set_with(vec![
            noop("feature", vec!["dep"], LabelSet::new().with(labels::FEATURE, true)),
            noop("dep", vec![], LabelSet::new()),
            noop("always", vec![], LabelSet::new().with(labels::REQUIRED, true)),
            noop("unrelated", vec![], LabelSet::new()),
        ]);
        let runnable = set.resolve(&["feature".to_string()], "gke").unwrap();
        assert!(runnable.contains("feature"));
        assert!(runnable.contains("dep"));
        assert!(runnable.contains("always"));
        assert!(!runnable.contains("unrelated"));

        // Dependencies precede dependents.
        let ids = runnable.task_ids();
        let pos = |r: &str| ids.iter().position(|id| id.starts_with(r)).unwrap();
        assert!(pos("dep") < pos("feature"));
    }

    #[test]
    fn cycle_rejected_before_execution() {
        let set = set_with(vec![
            noop("a", vec!["b"], LabelSet::new().with(labels::FEATURE, true)),
            noop("b", vec!["a"], LabelSet::new()),
        ]);
        let err = set.resolve(&["a".to_string()], "gke").unwrap_err();
        assert!(matches!(err, ConfigError::CycleDetected(_)));
    }

    #[test]
    fn inspection_type_filters_tasks() {
        let set = set_with(vec![
            noop(
                "gke-only",
                vec![],
                LabelSet::new()
                    .with(labels::FEATURE, true)
                    .with(labels::INSPECTION_TYPES, vec!["gke".to_string()]),
            ),
            noop(
                "baremetal-only",
                vec![],
                LabelSet::new()
                    .with(labels::REQUIRED, true)
                    .with(labels::INSPECTION_TYPES, vec!["baremetal".to_string()]),
            ),
        ]);
        let runnable = set.resolve(&["gke-only".to_string()], "gke").unwrap();
        assert!(runnable.contains("gke-only"));
        assert!(!runnable.contains("baremetal-only"));
    }

    #[test]
    fn ambiguous_implementations_rejected() {
        let mut set = TaskSet::new();
        set.add_inspection_type(InspectionType::new("gke", "GKE"))
            .unwrap();
        for implementation in ["gcp", "file"] {
            set.register(TaskDefinition::new(
                TaskId::with_implementation("source", implementation),
                vec![],
                LabelSet::new(),
                |_ctx| async { Ok::<_, TaskError>(()) },
            ))
            .unwrap();
        }
        set.register(noop(
            "feature",
            vec!["source"],
            LabelSet::new().with(labels::FEATURE, true),
        ))
        .unwrap();

        let err = set.resolve(&["feature".to_string()], "gke").unwrap_err();
        assert!(matches!(err, ConfigError::AmbiguousReference(_)));
    }

    #[test]
    fn implementations_narrowed_by_inspection_type() {
        let mut set = TaskSet::new();
        set.add_inspection_type(InspectionType::new("gke", "GKE"))
            .unwrap();
        for (implementation, it) in [("gcp", "gke"), ("file", "baremetal")] {
            set.register(TaskDefinition::new(
                TaskId::with_implementation("source", implementation),
                vec![],
                LabelSet::new().with(labels::INSPECTION_TYPES, vec![it.to_string()]),
                |_ctx| async { Ok::<_, TaskError>(()) },
            ))
            .unwrap();
        }
        set.register(noop(
            "feature",
            vec!["source"],
            LabelSet::new().with(labels::FEATURE, true),
        ))
        .unwrap();

        let runnable = set.resolve(&["feature".to_string()], "gke").unwrap();
        assert!(runnable.contains("source"));
    }

    #[test]
    fn subsequent_refs_included_when_eligible() {
        let set = set_with(vec![
            noop(
                "consumer",
                vec![],
                LabelSet::new()
                    .with(labels::FEATURE, true)
                    .with(labels::SUBSEQUENT_TASKS, vec!["discovery".to_string()]),
            ),
            noop("discovery", vec![], LabelSet::new()),
        ]);
        let runnable = set.resolve(&["consumer".to_string()], "gke").unwrap();
        assert!(runnable.contains("discovery"));

        // Provider precedes the task that pulled it in.
        let ids = runnable.task_ids();
        let pos = |r: &str| ids.iter().position(|id| id.starts_with(r)).unwrap();
        assert!(pos("discovery") < pos("consumer"));
    }

    #[test]
    fn missing_subsequent_ref_is_skipped() {
        let set = set_with(vec![noop(
            "consumer",
            vec![],
            LabelSet::new()
                .with(labels::FEATURE, true)
                .with(labels::SUBSEQUENT_TASKS, vec!["not-registered".to_string()]),
        )]);
        let runnable = set.resolve(&["consumer".to_string()], "gke").unwrap();
        assert!(runnable.contains("consumer"));
        assert_eq!(runnable.tasks().len(), 1);
    }

    #[test]
    fn missing_dependency_is_fatal() {
        let set = set_with(vec![noop(
            "feature",
            vec!["ghost"],
            LabelSet::new().with(labels::FEATURE, true),
        )]);
        let err = set.resolve(&["feature".to_string()], "gke").unwrap_err();
        assert!(matches!(err, ConfigError::MissingDependency { .. }));
    }

    #[test]
    fn unknown_inspection_type_rejected() {
        let set = set_with(vec![]);
        let err = set.resolve(&[], "nope").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownInspectionType(_)));
    }
}
