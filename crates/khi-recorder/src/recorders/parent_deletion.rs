//! Parent-deletion propagation
//!
//! For timelines with a recorded parent relationship, merge-joins the
//! child's log stream with the parent's revision stream: each parent
//! deletion episode yields one synthesized `deleted` revision on the child
//! at the parent-deletion timestamp, including trailing episodes after the
//! child's last log.

use super::RESOURCE_LAYER_DEPTH;
use crate::parent::ParentDeletionWatcher;
use crate::recorder::{
    GroupEndRequest, RecordRequest, Recorder, RecorderError, RecorderState,
};
use crate::recorders::recorder_task_ref;
use chrono::{DateTime, Utc};
use khi_history::{ChangeSet, HistoryBuilder, ResourcePath, RevisionState, RevisionVerb, StagedRevision};

/// Body of a revision synthesized from a parent deletion
pub const PARENT_DELETED_BODY: &str = "# Deleted along with its parent resource.\n";

/// The parent-deletion recorder
#[must_use]
pub fn parent_deletion_recorder() -> Recorder {
    Recorder::new("parentdeletion", handle)
        .with_group_filter(|path: &ResourcePath| path.depth() == RESOURCE_LAYER_DEPTH)
        .with_dependency(recorder_task_ref("resource"))
        .with_dependency(recorder_task_ref("ownerreference"))
        .with_group_end(handle_group_end)
}

/// `None` means the timeline has no parent with recorded revisions
type WatcherSlot = Option<ParentDeletionWatcher>;

fn init_watcher(path: &ResourcePath, builder: &HistoryBuilder) -> WatcherSlot {
    let relationship = builder.relationship(path)?;
    let parent = builder.try_timeline(&relationship.parent)?;
    let watcher = ParentDeletionWatcher::new(&parent.revisions());
    (watcher.episode_count() > 0).then_some(watcher)
}

fn synthesize(changeset: &mut ChangeSet, path: &ResourcePath, at: DateTime<Utc>) {
    changeset.add_revision(
        path.clone(),
        StagedRevision {
            verb: RevisionVerb::Delete,
            state: RevisionState::Deleted,
            requestor: String::new(),
            change_time: at,
            body: PARENT_DELETED_BODY.to_string(),
            partial: false,
            inferred: true,
        },
    );
}

fn handle(
    request: &RecordRequest<'_>,
    changeset: &mut ChangeSet,
    state: Option<RecorderState>,
) -> Result<Option<RecorderState>, RecorderError> {
    let mut slot: Box<WatcherSlot> = match state.map(|s| s.downcast::<WatcherSlot>()) {
        Some(Ok(slot)) => slot,
        _ => Box::new(init_watcher(request.path, request.builder)),
    };

    if let Some(watcher) = slot.as_mut() {
        for episode in watcher.advance_to(request.entry.parsed.timestamp) {
            synthesize(changeset, request.path, episode);
        }
    }
    Ok(Some(slot))
}

fn handle_group_end(
    request: &GroupEndRequest<'_>,
    changeset: &mut ChangeSet,
    state: Option<RecorderState>,
) -> Result<(), RecorderError> {
    let mut slot: Box<WatcherSlot> = match state.map(|s| s.downcast::<WatcherSlot>()) {
        Some(Ok(slot)) => slot,
        _ => Box::new(init_watcher(request.path, request.builder)),
    };
    if let Some(watcher) = slot.as_mut() {
        for episode in watcher.drain_remaining() {
            synthesize(changeset, request.path, episode);
        }
    }
    Ok(())
}
