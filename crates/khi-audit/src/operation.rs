//! The Kubernetes operation extracted from one audit log

use khi_history::{ResourcePath, RevisionVerb, CLUSTER_SCOPE};

/// Plural resource names whose singular is not just the trimmed plural
const IRREGULAR_SINGULARS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("ingresses", "ingress"),
    ("statuses", "status"),
];

/// Operation fields of one audit entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubernetesOperation {
    /// Group-qualified version, `core/v1` for the core group
    pub api_version: String,
    /// Resource name as it appears in the API path (`pods`)
    pub plural_kind: String,
    /// Singular kind (`pod`)
    pub singular_kind: String,
    /// Namespace, [`CLUSTER_SCOPE`] when cluster-scoped
    pub namespace: String,
    /// Resource name; empty for collection operations
    pub name: String,
    /// Subresource name; empty when the operation targets the resource
    pub subresource: String,
    /// Operation verb
    pub verb: RevisionVerb,
}

impl KubernetesOperation {
    /// Group-qualified api version from audit `objectRef` fields
    ///
    /// An empty api group is the core group.
    #[must_use]
    pub fn qualified_api_version(api_group: &str, api_version: &str) -> String {
        if api_group.is_empty() {
            format!("core/{api_version}")
        } else {
            format!("{api_group}/{api_version}")
        }
    }

    /// Singular kind for an API plural resource name
    #[must_use]
    pub fn singularize(plural: &str) -> String {
        let lower = plural.to_ascii_lowercase();
        for (p, s) in IRREGULAR_SINGULARS {
            if lower == *p {
                return (*s).to_string();
            }
        }
        if let Some(stem) = lower.strip_suffix("ies") {
            return format!("{stem}y");
        }
        for suffix in ["ches", "shes", "xes", "zes", "sses"] {
            if let Some(stem) = lower.strip_suffix(suffix) {
                return format!("{stem}{}", &suffix[..suffix.len() - 2]);
            }
        }
        lower.strip_suffix('s').map_or(lower.clone(), str::to_string)
    }

    /// Namespace-layer path of this operation
    #[must_use]
    pub fn namespace_path(&self) -> ResourcePath {
        ResourcePath::namespace_layer(&self.api_version, &self.singular_kind, &self.namespace)
    }

    /// Resource-layer path of this operation
    #[must_use]
    pub fn resource_path(&self) -> ResourcePath {
        ResourcePath::resource(
            &self.api_version,
            &self.singular_kind,
            &self.namespace,
            &self.name,
        )
    }

    /// Subresource-layer path of this operation
    #[must_use]
    pub fn subresource_path(&self) -> ResourcePath {
        ResourcePath::subresource(
            &self.api_version,
            &self.singular_kind,
            &self.namespace,
            &self.name,
            &self.subresource,
        )
    }

    /// Whether the operation is namespace-scoped
    #[must_use]
    pub fn is_namespaced(&self) -> bool {
        self.namespace != CLUSTER_SCOPE
    }

    /// Short human description, used for log summaries
    #[must_use]
    pub fn describe(&self) -> String {
        let verb = match self.verb {
            RevisionVerb::Create => "create",
            RevisionVerb::Update => "update",
            RevisionVerb::Patch => "patch",
            RevisionVerb::Delete => "delete",
            RevisionVerb::DeleteCollection => "delete collection of",
            RevisionVerb::Unknown => "operate on",
        };
        if self.name.is_empty() {
            format!("{verb} {} in {}", self.plural_kind, self.namespace)
        } else if self.subresource.is_empty() {
            format!("{verb} {} {}/{}", self.singular_kind, self.namespace, self.name)
        } else {
            format!(
                "{verb} {} {}/{} ({})",
                self.singular_kind, self.namespace, self.name, self.subresource
            )
        }
    }
}
