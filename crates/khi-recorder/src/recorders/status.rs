//! Status subresource recording
//!
//! Status operations whose payload named a distinct type group at the
//! subresource layer; this recorder gives those timelines their revisions
//! and ties them to the owning resource.

use super::SUBRESOURCE_LAYER_DEPTH;
use crate::recorder::{RecordRequest, Recorder, RecorderError, RecorderState};
use crate::recorders::recorder_task_ref;
use khi_history::{
    ChangeSet, ParentRelationship, RelationshipKind, ResourcePath, RevisionState, StagedRevision,
};
use khi_log::Severity;

/// The status-subresource recorder
#[must_use]
pub fn status_recorder() -> Recorder {
    Recorder::new("status", handle)
        .with_group_filter(|path: &ResourcePath| {
            path.depth() == SUBRESOURCE_LAYER_DEPTH && path.leaf() == "status"
        })
        .with_dependency(recorder_task_ref("resource"))
}

fn handle(
    request: &RecordRequest<'_>,
    changeset: &mut ChangeSet,
    state: Option<RecorderState>,
) -> Result<Option<RecorderState>, RecorderError> {
    let entry = request.entry;
    let parsed = &entry.parsed;

    changeset.set_summary(parsed.operation.describe());
    if parsed.is_error_response {
        changeset.set_severity(Severity::Error);
        changeset.add_event(request.path.clone());
        return Ok(Some(state.unwrap_or_else(|| Box::new(()))));
    }

    changeset.add_revision(
        request.path.clone(),
        StagedRevision {
            verb: parsed.operation.verb,
            state: RevisionState::Existing,
            requestor: parsed.requestor.clone(),
            change_time: parsed.timestamp,
            body: entry.body_yaml.clone(),
            partial: true,
            inferred: false,
        },
    );

    if let Some(parent) = request.path.parent() {
        let relationship = ParentRelationship::new(RelationshipKind::Subresource, parent);
        if request
            .builder
            .relationship_compatible(request.path, &relationship)
        {
            changeset.set_relationship(request.path.clone(), relationship);
        }
    }
    Ok(Some(state.unwrap_or_else(|| Box::new(()))))
}
