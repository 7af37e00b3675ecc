//! Resource paths: the identity of a timeline

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Namespace segment used for cluster-scoped resources
pub const CLUSTER_SCOPE: &str = "cluster-scope";

/// `#`-separated hierarchical key identifying one timeline
///
/// Canonical Kubernetes layering:
/// `<apiVersion>#<kind>#<namespace>#<name>[#<subresource>]`, with namespace
/// [`CLUSTER_SCOPE`] for cluster-scoped resources. Kind segments are stored
/// lowercased so lookups are case-stable regardless of how the source log
/// spelled them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourcePath(String);

impl ResourcePath {
    /// Path from raw segments, joined with `#`
    #[must_use]
    pub fn from_segments(segments: &[&str]) -> Self {
        Self(segments.join("#"))
    }

    /// API-version layer (`core/v1`)
    #[must_use]
    pub fn api_version(api_version: &str) -> Self {
        Self(api_version.to_string())
    }

    /// Kind layer (`core/v1#pod`)
    #[must_use]
    pub fn kind_layer(api_version: &str, kind: &str) -> Self {
        Self(format!("{api_version}#{}", kind.to_ascii_lowercase()))
    }

    /// Namespace layer (`core/v1#pod#default`)
    #[must_use]
    pub fn namespace_layer(api_version: &str, kind: &str, namespace: &str) -> Self {
        Self(format!(
            "{api_version}#{}#{namespace}",
            kind.to_ascii_lowercase()
        ))
    }

    /// Resource layer (`core/v1#pod#default#nginx`)
    #[must_use]
    pub fn resource(api_version: &str, kind: &str, namespace: &str, name: &str) -> Self {
        Self(format!(
            "{api_version}#{}#{namespace}#{name}",
            kind.to_ascii_lowercase()
        ))
    }

    /// Subresource layer (`core/v1#pod#default#nginx#binding`)
    #[must_use]
    pub fn subresource(
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
        subresource: &str,
    ) -> Self {
        Self(format!(
            "{api_version}#{}#{namespace}#{name}#{subresource}",
            kind.to_ascii_lowercase()
        ))
    }

    /// The raw `#`-joined form
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments in layer order
    #[inline]
    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        self.0.split('#').collect()
    }

    /// Number of `#` separators
    ///
    /// 0 for an api-version layer path, 3 for a resource layer path.
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.matches('#').count()
    }

    /// Path one layer up, `None` at the api-version layer
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0.rfind('#').map(|i| Self(self.0[..i].to_string()))
    }

    /// Child path with one more segment
    #[must_use]
    pub fn child(&self, segment: &str) -> Self {
        Self(format!("{}#{segment}", self.0))
    }

    /// Whether `self` lies strictly under `prefix` (any number of layers)
    #[must_use]
    pub fn is_strictly_under(&self, prefix: &Self) -> bool {
        self.0.len() > prefix.0.len() + 1
            && self.0.starts_with(&prefix.0)
            && self.0.as_bytes()[prefix.0.len()] == b'#'
    }

    /// Last segment
    #[must_use]
    pub fn leaf(&self) -> &str {
        self.0.rsplit('#').next().unwrap_or(&self.0)
    }
}

impl Display for ResourcePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourcePath {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourcePath {
    fn from(s: String) -> Self {
        Self(s)
    }
}
