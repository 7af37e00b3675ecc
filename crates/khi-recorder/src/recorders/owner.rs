//! Owner-reference aliasing
//!
//! For every log whose body carries `metadata.ownerReferences`, installs an
//! alias from the resource to a subresource slot under its owner and
//! records the owner as the timeline's parent relationship.

use super::RESOURCE_LAYER_DEPTH;
use crate::recorder::{RecordRequest, Recorder, RecorderError, RecorderState};
use crate::recorders::recorder_task_ref;
use khi_history::{
    ChangeSet, ParentRelationship, RelationshipKind, ResourcePath, CLUSTER_SCOPE,
};
use serde_json::Value;

/// The owner-reference recorder
#[must_use]
pub fn owner_reference_recorder() -> Recorder {
    Recorder::new("ownerreference", handle)
        .with_group_filter(|path: &ResourcePath| path.depth() == RESOURCE_LAYER_DEPTH)
        .with_log_filter(|entry| {
            entry
                .body
                .as_ref()
                .and_then(|b| b.get("metadata")?.get("ownerReferences"))
                .and_then(Value::as_array)
                .is_some_and(|refs| !refs.is_empty())
        })
        .with_dependency(recorder_task_ref("resource"))
}

/// Group-qualify an `ownerReferences[].apiVersion` value
fn qualify(api_version: &str) -> String {
    if api_version.contains('/') {
        api_version.to_string()
    } else {
        format!("core/{api_version}")
    }
}

/// Owner path for one reference; namespaced kinds share the child's
/// namespace, cluster-scoped owners (nodes) use the cluster scope
fn owner_path(owner: &Value, child_namespace: &str) -> Option<ResourcePath> {
    let kind = owner.get("kind")?.as_str()?;
    let name = owner.get("name")?.as_str()?;
    let api_version = qualify(owner.get("apiVersion").and_then(Value::as_str).unwrap_or("v1"));
    let namespace = if kind.eq_ignore_ascii_case("node") {
        CLUSTER_SCOPE
    } else {
        child_namespace
    };
    Some(ResourcePath::resource(&api_version, kind, namespace, name))
}

fn handle(
    request: &RecordRequest<'_>,
    changeset: &mut ChangeSet,
    state: Option<RecorderState>,
) -> Result<Option<RecorderState>, RecorderError> {
    let entry = request.entry;
    let Some(owners) = entry
        .body
        .as_ref()
        .and_then(|b| b.get("metadata")?.get("ownerReferences"))
        .and_then(Value::as_array)
    else {
        return Ok(state);
    };

    let namespace = &entry.parsed.operation.namespace;
    let child_name = request.path.leaf().to_string();

    // The controller reference decides the parent relationship; other
    // owners still get aliases.
    let mut parent: Option<ResourcePath> = None;
    for owner in owners {
        let Some(path) = owner_path(owner, namespace) else {
            continue;
        };
        changeset.add_alias(request.path.clone(), path.child(&child_name));
        let is_controller = owner
            .get("controller")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if is_controller || parent.is_none() {
            parent = Some(path);
        }
    }

    if let Some(parent) = parent {
        let relationship = ParentRelationship::new(RelationshipKind::Owner, parent);
        // A conflicting owner observed later is dropped rather than
        // failing the whole change set.
        if request
            .builder
            .relationship_compatible(request.path, &relationship)
        {
            changeset.set_relationship(request.path.clone(), relationship);
        }
    }
    Ok(Some(state.unwrap_or_else(|| Box::new(()))))
}
