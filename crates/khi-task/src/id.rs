//! Task identities

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::marker::PhantomData;

/// Default implementation tag for a reference with a single provider
pub const DEFAULT_IMPLEMENTATION: &str = "default";

/// Identity of one concrete task: a reference id plus an implementation tag
///
/// Consumers depend on the reference; several implementations may provide
/// the same reference, and resolution must narrow them to exactly one per
/// run. Rendered as `<reference>@<implementation>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    reference: String,
    implementation: String,
}

impl TaskId {
    /// Id with the default implementation tag
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            implementation: DEFAULT_IMPLEMENTATION.to_string(),
        }
    }

    /// Id with an explicit implementation tag
    #[must_use]
    pub fn with_implementation(
        reference: impl Into<String>,
        implementation: impl Into<String>,
    ) -> Self {
        Self {
            reference: reference.into(),
            implementation: implementation.into(),
        }
    }

    /// The reference id consumers depend on
    #[inline]
    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// The implementation tag
    #[inline]
    #[must_use]
    pub fn implementation(&self) -> &str {
        &self.implementation
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.reference, self.implementation)
    }
}

/// Reference to a task's output, typed by the producer's result type
///
/// Only the reference string is carried at run time; the type parameter
/// keeps result downcasts honest at the consumption site.
pub struct TaskReference<T> {
    reference: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TaskReference<T> {
    /// Typed reference to `reference`
    #[inline]
    #[must_use]
    pub const fn new(reference: &'static str) -> Self {
        Self {
            reference,
            _marker: PhantomData,
        }
    }

    /// The raw reference id
    #[inline]
    #[must_use]
    pub const fn reference(&self) -> &'static str {
        self.reference
    }
}

impl<T> Clone for TaskReference<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TaskReference<T> {}

impl<T> Display for TaskReference<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference)
    }
}
