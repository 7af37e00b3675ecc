//! Node readiness tracking
//!
//! Watches the `Ready` condition across node bodies and surfaces each
//! transition as an annotated event on the node's timeline.

use super::RESOURCE_LAYER_DEPTH;
use crate::recorder::{RecordRequest, Recorder, RecorderError, RecorderState};
use crate::recorders::{kind_segment, recorder_task_ref};
use khi_history::{ChangeSet, ResourcePath};
use serde_json::Value;

/// The node recorder
#[must_use]
pub fn node_recorder() -> Recorder {
    Recorder::new("node", handle)
        .with_group_filter(|path: &ResourcePath| {
            path.depth() == RESOURCE_LAYER_DEPTH && kind_segment(path) == "node"
        })
        .with_log_filter(|entry| !entry.parsed.is_error_response && entry.body.is_some())
        .with_dependency(recorder_task_ref("resource"))
}

fn ready_condition(body: &Value) -> Option<bool> {
    let conditions = body.pointer("/status/conditions")?.as_array()?;
    conditions
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some("Ready"))
        .and_then(|c| c.get("status").and_then(Value::as_str))
        .map(|status| status == "True")
}

fn handle(
    request: &RecordRequest<'_>,
    changeset: &mut ChangeSet,
    state: Option<RecorderState>,
) -> Result<Option<RecorderState>, RecorderError> {
    let previous: Option<bool> = match state.map(|s| s.downcast::<Option<bool>>()) {
        Some(Ok(prev)) => *prev,
        _ => None,
    };

    let Some(body) = request.entry.body.as_ref() else {
        return Ok(Some(Box::new(previous)));
    };
    let Some(ready) = ready_condition(body) else {
        return Ok(Some(Box::new(previous)));
    };

    if previous != Some(ready) {
        changeset.annotate("nodeReady", if ready { "True" } else { "False" });
        changeset.add_event(request.path.clone());
    }
    Ok(Some(Box::new(Some(ready))))
}
