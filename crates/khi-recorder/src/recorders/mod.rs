//! Kind-specific recorders
//!
//! Each contributes one [`Recorder`]; [`all_recorders`] is the default set
//! an inspection registers.

mod binding;
mod common;
mod container;
mod endpoint_slice;
mod lease;
mod node;
mod owner;
mod parent_deletion;
mod status;

pub use binding::binding_recorder;
pub use common::{resource_recorder, INFERRED_CREATE_BODY};
pub use container::container_status_recorder;
pub use endpoint_slice::endpoint_slice_recorder;
pub use lease::lease_recorder;
pub use node::node_recorder;
pub use owner::owner_reference_recorder;
pub use parent_deletion::{parent_deletion_recorder, PARENT_DELETED_BODY};
pub use status::status_recorder;

use crate::dispatch::RECORDER_TASK_PREFIX;
use crate::recorder::Recorder;
use chrono::{DateTime, Utc};
use khi_history::ResourcePath;
use serde_json::Value;

/// Depth of a resource-layer path
pub(crate) const RESOURCE_LAYER_DEPTH: usize = 3;
/// Depth of a subresource-layer path
pub(crate) const SUBRESOURCE_LAYER_DEPTH: usize = 4;

/// Task reference of the recorder named `name`
#[must_use]
pub fn recorder_task_ref(name: &str) -> String {
    format!("{RECORDER_TASK_PREFIX}{name}")
}

/// The default recorder set, in registration order
#[must_use]
pub fn all_recorders() -> Vec<Recorder> {
    vec![
        resource_recorder(),
        status_recorder(),
        owner_reference_recorder(),
        parent_deletion_recorder(),
        container_status_recorder(),
        binding_recorder(),
        endpoint_slice_recorder(),
        node_recorder(),
        lease_recorder(),
    ]
}

/// Kind segment of a path, empty at the api-version layer
pub(crate) fn kind_segment(path: &ResourcePath) -> String {
    path.segments().get(1).map_or_else(String::new, |s| (*s).to_string())
}

/// Read `metadata.<field>` of a body as an RFC 3339 timestamp
pub(crate) fn metadata_timestamp(body: Option<&Value>, field: &str) -> Option<DateTime<Utc>> {
    let raw = body?.get("metadata")?.get(field)?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
