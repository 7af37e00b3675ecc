//! Lease holder tracking
//!
//! Lease renewals dominate lease timelines; what matters is the holder.
//! The recorder annotates and surfaces an event only when
//! `spec.holderIdentity` changes hands.

use super::RESOURCE_LAYER_DEPTH;
use crate::recorder::{RecordRequest, Recorder, RecorderError, RecorderState};
use crate::recorders::{kind_segment, recorder_task_ref};
use khi_history::{ChangeSet, ResourcePath};
use serde_json::Value;

/// The lease recorder
#[must_use]
pub fn lease_recorder() -> Recorder {
    Recorder::new("lease", handle)
        .with_group_filter(|path: &ResourcePath| {
            path.depth() == RESOURCE_LAYER_DEPTH && kind_segment(path) == "lease"
        })
        .with_log_filter(|entry| !entry.parsed.is_error_response && entry.body.is_some())
        .with_dependency(recorder_task_ref("resource"))
}

fn handle(
    request: &RecordRequest<'_>,
    changeset: &mut ChangeSet,
    state: Option<RecorderState>,
) -> Result<Option<RecorderState>, RecorderError> {
    let previous: Option<String> = match state.map(|s| s.downcast::<Option<String>>()) {
        Some(Ok(prev)) => *prev,
        _ => None,
    };

    let holder = request
        .entry
        .body
        .as_ref()
        .and_then(|b| b.pointer("/spec/holderIdentity"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let Some(holder) = holder else {
        return Ok(Some(Box::new(previous)));
    };

    if previous.as_deref() != Some(holder.as_str()) {
        changeset.annotate("leaseHolder", holder.clone());
        changeset.add_event(request.path.clone());
    }
    Ok(Some(Box::new(Some(holder))))
}
