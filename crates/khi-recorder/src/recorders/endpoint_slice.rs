//! Endpoint slice tracking
//!
//! Surfaces endpoint membership on the referenced pods and nodes: every
//! endpoint-slice log becomes an event on the timelines of the pods it
//! targets.

use super::RESOURCE_LAYER_DEPTH;
use crate::recorder::{RecordRequest, Recorder, RecorderError, RecorderState};
use crate::recorders::{kind_segment, recorder_task_ref};
use khi_history::{ChangeSet, ResourcePath, CLUSTER_SCOPE};
use serde_json::Value;

/// The endpoint-slice recorder
#[must_use]
pub fn endpoint_slice_recorder() -> Recorder {
    Recorder::new("endpointslice", handle)
        .with_group_filter(|path: &ResourcePath| {
            path.depth() == RESOURCE_LAYER_DEPTH && kind_segment(path) == "endpointslice"
        })
        .with_log_filter(|entry| {
            entry
                .body
                .as_ref()
                .and_then(|b| b.get("endpoints"))
                .and_then(Value::as_array)
                .is_some_and(|endpoints| !endpoints.is_empty())
        })
        .with_dependency(recorder_task_ref("resource"))
}

fn handle(
    request: &RecordRequest<'_>,
    changeset: &mut ChangeSet,
    state: Option<RecorderState>,
) -> Result<Option<RecorderState>, RecorderError> {
    let entry = request.entry;
    let endpoints = entry
        .body
        .as_ref()
        .and_then(|b| b.get("endpoints"))
        .and_then(Value::as_array)
        .ok_or_else(|| RecorderError::MalformedPayload("endpoints vanished".to_string()))?;

    let mut ready = 0usize;
    for endpoint in endpoints {
        if endpoint
            .pointer("/conditions/ready")
            .and_then(Value::as_bool)
            .unwrap_or(true)
        {
            ready += 1;
        }
        let Some(target) = endpoint.get("targetRef") else {
            continue;
        };
        if target.get("kind").and_then(Value::as_str) != Some("Pod") {
            continue;
        }
        let Some(name) = target.get("name").and_then(Value::as_str) else {
            continue;
        };
        let namespace = target
            .get("namespace")
            .and_then(Value::as_str)
            .unwrap_or(&entry.parsed.operation.namespace);
        changeset.add_event(ResourcePath::resource("core/v1", "pod", namespace, name));

        if let Some(node) = endpoint.get("nodeName").and_then(Value::as_str) {
            changeset.add_event(ResourcePath::resource("core/v1", "node", CLUSTER_SCOPE, node));
        }
    }
    changeset.annotate("readyEndpoints", format!("{ready}/{}", endpoints.len()));
    Ok(Some(state.unwrap_or_else(|| Box::new(()))))
}
