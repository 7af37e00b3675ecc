//! Container status tracking
//!
//! Projects `status.containerStatuses` of pod bodies into one subresource
//! timeline per container, emitting a revision whenever a container's
//! state class changes.

use super::RESOURCE_LAYER_DEPTH;
use crate::recorder::{RecordRequest, Recorder, RecorderError, RecorderState};
use crate::recorders::{kind_segment, recorder_task_ref};
use khi_history::{
    ChangeSet, ParentRelationship, RelationshipKind, ResourcePath, RevisionState, StagedRevision,
};
use serde_json::Value;
use std::collections::HashMap;

/// The container-status recorder
#[must_use]
pub fn container_status_recorder() -> Recorder {
    Recorder::new("containerstatus", handle)
        .with_group_filter(|path: &ResourcePath| {
            path.depth() == RESOURCE_LAYER_DEPTH && kind_segment(path) == "pod"
        })
        .with_log_filter(|entry| {
            entry
                .body
                .as_ref()
                .and_then(|b| b.get("status")?.get("containerStatuses"))
                .and_then(Value::as_array)
                .is_some_and(|statuses| !statuses.is_empty())
        })
        .with_dependency(recorder_task_ref("resource"))
}

fn classify(status: &Value) -> RevisionState {
    let Some(state) = status.get("state") else {
        return RevisionState::Unknown;
    };
    if state.get("running").is_some() {
        return RevisionState::ContainerRunning;
    }
    if state.get("waiting").is_some() {
        return RevisionState::ContainerWaiting;
    }
    if let Some(terminated) = state.get("terminated") {
        let exit_code = terminated.get("exitCode").and_then(Value::as_i64).unwrap_or(0);
        return if exit_code == 0 {
            RevisionState::ContainerTerminatedSuccess
        } else {
            RevisionState::ContainerTerminatedError
        };
    }
    RevisionState::Unknown
}

type SeenStates = HashMap<String, RevisionState>;

fn handle(
    request: &RecordRequest<'_>,
    changeset: &mut ChangeSet,
    state: Option<RecorderState>,
) -> Result<Option<RecorderState>, RecorderError> {
    let mut seen: Box<SeenStates> = match state.map(|s| s.downcast::<SeenStates>()) {
        Some(Ok(seen)) => seen,
        _ => Box::new(SeenStates::new()),
    };

    let entry = request.entry;
    let statuses = entry
        .body
        .as_ref()
        .and_then(|b| b.get("status")?.get("containerStatuses"))
        .and_then(Value::as_array)
        .ok_or_else(|| RecorderError::MalformedPayload("containerStatuses vanished".to_string()))?;

    for status in statuses {
        let Some(name) = status.get("name").and_then(Value::as_str) else {
            continue;
        };
        let class = classify(status);
        if seen.get(name) == Some(&class) {
            continue;
        }
        seen.insert(name.to_string(), class);

        let container_path = request.path.child(name);
        let body = serde_yaml::to_string(status)
            .map_err(|e| RecorderError::MalformedPayload(e.to_string()))?;
        changeset.add_revision(
            container_path.clone(),
            StagedRevision {
                verb: entry.parsed.operation.verb,
                state: class,
                requestor: entry.parsed.requestor.clone(),
                change_time: entry.parsed.timestamp,
                body,
                partial: true,
                inferred: false,
            },
        );

        let relationship =
            ParentRelationship::new(RelationshipKind::Subresource, request.path.clone());
        if request
            .builder
            .relationship_compatible(&container_path, &relationship)
        {
            changeset.set_relationship(container_path, relationship);
        }
    }
    Ok(Some(seen))
}
