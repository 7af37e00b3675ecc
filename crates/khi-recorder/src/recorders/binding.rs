//! Pod binding tracking
//!
//! Binding subresource logs carry the scheduling decision. The recorder
//! stores the binding payload as a revision, surfaces an event on the
//! target node's timeline, and aliases the pod under the node.

use super::SUBRESOURCE_LAYER_DEPTH;
use crate::recorder::{RecordRequest, Recorder, RecorderError, RecorderState};
use crate::recorders::{kind_segment, recorder_task_ref};
use khi_audit::ParsedAuditLog;
use khi_history::{
    ChangeSet, ParentRelationship, RelationshipKind, ResourcePath, RevisionState, StagedRevision,
    CLUSTER_SCOPE,
};
use serde_json::Value;

/// The binding recorder
#[must_use]
pub fn binding_recorder() -> Recorder {
    Recorder::new("binding", handle)
        .with_group_filter(|path: &ResourcePath| {
            path.depth() == SUBRESOURCE_LAYER_DEPTH
                && path.leaf() == "binding"
                && kind_segment(path) == "pod"
        })
        .with_log_filter(|entry| binding_payload(&entry.parsed).is_some())
        .with_dependency(recorder_task_ref("resource"))
}

fn binding_payload(parsed: &ParsedAuditLog) -> Option<&Value> {
    for payload in [parsed.request.as_ref(), parsed.response.as_ref()] {
        if let Some(payload) = payload {
            if payload.get("kind").and_then(Value::as_str) == Some("Binding") {
                return Some(payload);
            }
        }
    }
    None
}

fn handle(
    request: &RecordRequest<'_>,
    changeset: &mut ChangeSet,
    state: Option<RecorderState>,
) -> Result<Option<RecorderState>, RecorderError> {
    let entry = request.entry;
    let payload = binding_payload(&entry.parsed)
        .ok_or_else(|| RecorderError::MalformedPayload("binding payload vanished".to_string()))?;

    let target_kind = payload
        .pointer("/target/kind")
        .and_then(Value::as_str)
        .unwrap_or("Node");
    let node_name = payload
        .pointer("/target/name")
        .and_then(Value::as_str)
        .ok_or_else(|| RecorderError::MalformedPayload("binding without target.name".to_string()))?;
    if !target_kind.eq_ignore_ascii_case("node") {
        return Ok(state);
    }

    let body = serde_yaml::to_string(payload)
        .map_err(|e| RecorderError::MalformedPayload(e.to_string()))?;
    changeset.add_revision(
        request.path.clone(),
        StagedRevision {
            verb: entry.parsed.operation.verb,
            state: RevisionState::Existing,
            requestor: entry.parsed.requestor.clone(),
            change_time: entry.parsed.timestamp,
            body,
            partial: false,
            inferred: false,
        },
    );

    let node_path = ResourcePath::resource("core/v1", "node", CLUSTER_SCOPE, node_name);
    changeset.add_event(node_path.clone());
    changeset.annotate("boundNode", node_name);

    if let Some(pod_path) = request.path.parent() {
        changeset.add_alias(pod_path.clone(), node_path.child(pod_path.leaf()));
        let relationship = ParentRelationship::new(RelationshipKind::Subresource, pod_path);
        if request
            .builder
            .relationship_compatible(request.path, &relationship)
        {
            changeset.set_relationship(request.path.clone(), relationship);
        }
    }
    Ok(Some(state.unwrap_or_else(|| Box::new(()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use khi_audit::{AuditLogExtractor, JsonAuditExtractor};
    use khi_log::LogId;
    use khi_test_utils::AuditLogBuilder;
    use serde_json::json;

    #[test]
    fn binding_payload_prefers_request() {
        let parsed = JsonAuditExtractor
            .extract(
                LogId(0),
                &AuditLogBuilder::new("create", "pods", "default", "a")
                    .subresource("binding")
                    .request(json!({"kind": "Binding", "target": {"kind": "Node", "name": "n1"}}))
                    .response(json!({"kind": "Status"}))
                    .build_arc(),
            )
            .unwrap();
        let payload = binding_payload(&parsed).unwrap();
        assert_eq!(payload.pointer("/target/name").unwrap(), "n1");
    }
}
