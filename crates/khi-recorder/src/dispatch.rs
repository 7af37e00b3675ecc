//! Recorder dispatch
//!
//! Walks the filtered timelines parent-first, runs the recorder
//! sequentially per timeline, flushes change sets atomically and re-sorts
//! affected timelines.

use crate::recorder::{GroupEndRequest, RecordRequest, Recorder, RecorderState};
use khi_audit::{ManifestTimeline, ManifestTimelines};
use khi_history::{ChangeSet, HistoryBuilder, ResourcePath};
use khi_task::{ErrorSetMetadata, LabelSet, TaskContext, TaskDefinition, TaskError, TaskId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default bound on concurrently processed sibling timelines
const DEFAULT_DISPATCH_WORKERS: usize = 16;

/// Reference prefix of recorder tasks
pub const RECORDER_TASK_PREFIX: &str = "khi/recorder/";

/// Outcome of dispatching one recorder
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchStats {
    /// Timelines the recorder visited
    pub timelines: usize,
    /// Handler errors (change sets discarded)
    pub errors: usize,
}

/// Process every filtered timeline with `recorder`
///
/// Parents complete before any of their children start; independent
/// subtrees run in bounded parallel. Handler errors discard the change set
/// of that log and continue.
///
/// # Errors
/// Only cancellation aborts dispatch.
pub async fn dispatch_recorder(
    recorder: &Arc<Recorder>,
    timelines: &ManifestTimelines,
    builder: &Arc<HistoryBuilder>,
    cancel: &CancellationToken,
) -> Result<DispatchStats, TaskError> {
    let filtered: Vec<ManifestTimeline> = timelines
        .timelines
        .iter()
        .filter(|t| recorder.accepts_group(&t.path))
        .cloned()
        .collect();

    // Tree levels: a timeline's processing level is one past its nearest
    // filtered ancestor's. Processing level by level keeps every parent
    // ahead of its children.
    let mut level_of: HashMap<ResourcePath, usize> = HashMap::new();
    let mut ordered: Vec<(usize, ManifestTimeline)> = Vec::with_capacity(filtered.len());
    let mut sorted = filtered;
    sorted.sort_by(|a, b| a.path.cmp(&b.path));
    for timeline in sorted {
        let mut level = 0;
        let mut ancestor = timeline.path.parent();
        while let Some(candidate) = ancestor {
            if let Some(parent_level) = level_of.get(&candidate) {
                level = parent_level + 1;
                break;
            }
            ancestor = candidate.parent();
        }
        level_of.insert(timeline.path.clone(), level);
        ordered.push((level, timeline));
    }

    let max_level = ordered.iter().map(|(l, _)| *l).max().unwrap_or(0);
    let semaphore = Arc::new(Semaphore::new(DEFAULT_DISPATCH_WORKERS));
    let mut stats = DispatchStats::default();

    for level in 0..=max_level {
        if cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        let mut workers: JoinSet<usize> = JoinSet::new();
        for (_, timeline) in ordered.iter().filter(|(l, _)| *l == level) {
            let recorder = Arc::clone(recorder);
            let builder = Arc::clone(builder);
            let timeline = timeline.clone();
            let semaphore = Arc::clone(&semaphore);
            workers.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                record_timeline(&recorder, &timeline, &builder).await
            });
        }
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(errors) => {
                    stats.timelines += 1;
                    stats.errors += errors;
                }
                Err(err) => warn!(%err, "recorder worker failed"),
            }
        }
    }

    debug!(
        recorder = recorder.name(),
        timelines = stats.timelines,
        errors = stats.errors,
        "recorder dispatch finished"
    );
    Ok(stats)
}

/// Sequential per-log recording of one timeline; returns the error count
async fn record_timeline(
    recorder: &Recorder,
    timeline: &ManifestTimeline,
    builder: &Arc<HistoryBuilder>,
) -> usize {
    let mut errors = 0usize;
    let mut state: Option<RecorderState> = None;
    let mut last_entry = None;

    for entry in &timeline.entries {
        if !recorder.accepts_log(entry) {
            continue;
        }
        let mut changeset = ChangeSet::new(entry.parsed.log_id, entry.parsed.timestamp);
        let request = RecordRequest {
            path: &timeline.path,
            entry,
            builder,
        };
        match recorder.handle(&request, &mut changeset, state.take()) {
            Ok(next_state) => {
                state = next_state;
                if let Err(err) = flush_and_sort(changeset, builder).await {
                    warn!(recorder = recorder.name(), path = %timeline.path, %err,
                        "change set flush failed; discarding");
                    errors += 1;
                }
            }
            Err(err) => {
                // Change set dropped; the next log proceeds.
                warn!(recorder = recorder.name(), path = %timeline.path, %err,
                    "recorder handler failed for one log");
                errors += 1;
            }
        }
        last_entry = Some(entry);
    }

    if let Some(reference_entry) = last_entry {
        let mut changeset = ChangeSet::new(
            reference_entry.parsed.log_id,
            reference_entry.parsed.timestamp,
        );
        let request = GroupEndRequest {
            path: &timeline.path,
            last_entry: reference_entry,
            builder,
        };
        match recorder.handle_group_end(&request, &mut changeset, state.take()) {
            Ok(true) => {
                if let Err(err) = flush_and_sort(changeset, builder).await {
                    warn!(recorder = recorder.name(), path = %timeline.path, %err,
                        "group-end flush failed; discarding");
                    errors += 1;
                }
            }
            Ok(false) => {}
            Err(err) => {
                warn!(recorder = recorder.name(), path = %timeline.path, %err,
                    "group-end hook failed");
                errors += 1;
            }
        }
    }
    errors
}

async fn flush_and_sort(
    changeset: ChangeSet,
    builder: &Arc<HistoryBuilder>,
) -> Result<(), khi_history::HistoryError> {
    let affected = changeset.flush(builder).await?;
    for path in affected {
        builder.timeline(&path).sort();
    }
    Ok(())
}

/// Wrap one recorder as a task graph definition
///
/// The task depends on the manifest stage plus the recorder's declared
/// dependencies, and returns its [`DispatchStats`]. Skipped in dry-run.
#[must_use]
pub fn recorder_task(recorder: Recorder) -> Arc<TaskDefinition> {
    let reference = format!("{RECORDER_TASK_PREFIX}{}", recorder.name());
    let id = TaskId::new(reference);
    let mut dependencies = vec![khi_audit::tasks::refs::MANIFEST_TIMELINES
        .reference()
        .to_string()];
    dependencies.extend(recorder.dependencies().iter().cloned());
    let recorder = Arc::new(recorder);

    TaskDefinition::new(
        id.clone(),
        dependencies,
        LabelSet::new(),
        move |ctx: TaskContext| {
            let id = id.clone();
            let recorder = Arc::clone(&recorder);
            async move {
                if ctx.is_dry_run() {
                    return Ok(DispatchStats::default());
                }
                let timelines = ctx.result(khi_audit::tasks::refs::MANIFEST_TIMELINES)?;
                let builder = khi_audit::tasks::history_builder(&ctx, &id)?;
                let stats =
                    dispatch_recorder(&recorder, timelines.as_ref(), &builder, ctx.cancellation())
                        .await?;
                if stats.errors > 0 {
                    ctx.metadata().get_or_init::<ErrorSetMetadata>().add_for_task(
                        id.to_string(),
                        format!("{} logs failed recording", stats.errors),
                    );
                }
                Ok(stats)
            }
        },
    )
}
