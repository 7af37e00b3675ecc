//! Inspection task assembly
//!
//! One task per recorder, the artifact serialization task, and the audit
//! feature task users enable from the UI.

use crate::dispatch::recorder_task;
use crate::recorder::Recorder;
use crate::recorders::{all_recorders, recorder_task_ref};
use khi_audit::tasks::history_builder;
use khi_audit::AuditLogExtractor;
use khi_history::ArtifactSizes;
use khi_task::{
    labels, HeaderMetadata, LabelSet, TaskContext, TaskDefinition, TaskError, TaskId,
    TaskReference, IO_CONFIG,
};
use std::sync::Arc;

/// Typed references to assembly results
pub mod refs {
    use super::{ArtifactSizes, TaskReference};

    /// Artifact serialization output
    pub static ARTIFACT: TaskReference<ArtifactSizes> =
        TaskReference::new("khi/serialize/artifact");
    /// The audit feature task
    pub static AUDIT_FEATURE: TaskReference<()> =
        TaskReference::new("khi/feature/kubernetes-audit");
}

/// One task per recorder in the default set
#[must_use]
pub fn recorder_tasks() -> Vec<Arc<TaskDefinition>> {
    all_recorders().into_iter().map(recorder_task).collect()
}

fn recorder_references() -> Vec<String> {
    all_recorders()
        .iter()
        .map(|r: &Recorder| recorder_task_ref(r.name()))
        .collect()
}

/// Artifact serialization, after every recorder finished
///
/// Carries the required label so it joins every run of this engine; in
/// dry-run it returns zero sizes without touching the filesystem.
#[must_use]
pub fn serialize_task() -> Arc<TaskDefinition> {
    let id = TaskId::new(refs::ARTIFACT.reference());
    TaskDefinition::new(
        id.clone(),
        recorder_references(),
        LabelSet::new()
            .with(labels::REQUIRED, true)
            .with(labels::PROGRESS_REPORTABLE, true),
        move |ctx: TaskContext| {
            let id = id.clone();
            async move {
                if ctx.is_dry_run() {
                    return Ok(ArtifactSizes {
                        metadata: 0,
                        history: 0,
                        chunks: 0,
                    });
                }
                let builder = history_builder(&ctx, &id)?;
                let io = ctx
                    .inspection()
                    .get(IO_CONFIG)
                    .ok_or_else(|| TaskError::failed(&id, "no io config for serialization"))?;
                let target = io
                    .data_dir
                    .join(format!("{}.khi", ctx.inspection_type()));

                let metadata_value = ctx.metadata().artifact_values();
                let progress = Arc::clone(ctx.progress());
                let id_string = id.to_string();
                let sizes = builder
                    .finalize_to_file(
                        &metadata_value,
                        &target,
                        move |done, total| {
                            #[allow(clippy::cast_precision_loss)]
                            let pct = if total == 0 {
                                1.0
                            } else {
                                done as f32 / total as f32
                            };
                            progress.update(
                                &id_string,
                                pct,
                                format!("writing chunks ({done}/{total})"),
                            );
                        },
                        ctx.cancellation(),
                    )
                    .await
                    .map_err(|e| match e {
                        khi_history::HistoryError::Cancelled => TaskError::Cancelled,
                        other => TaskError::failed(&id, other),
                    })?;

                ctx.metadata()
                    .get_or_init::<HeaderMetadata>()
                    .set_file_size(sizes.total());
                Ok(sizes)
            }
        },
    )
}

/// The user-facing audit feature
#[must_use]
pub fn audit_feature_task() -> Arc<TaskDefinition> {
    TaskDefinition::new(
        TaskId::new(refs::AUDIT_FEATURE.reference()),
        recorder_references(),
        LabelSet::new()
            .with(labels::FEATURE, true)
            .with(labels::TITLE, "Kubernetes Audit Logs".to_string())
            .with(
                labels::DESCRIPTION,
                "Reconstructs the manifest history and lifecycle of every resource \
                 observed in the Kubernetes audit logs."
                    .to_string(),
            )
            .with(labels::LOG_TYPE, "audit".to_string())
            .with(labels::ORDER, 1i64),
        |_ctx| async { Ok(()) },
    )
}

/// The complete default task set for an audit inspection
///
/// Pipeline stages, recorders, serialization and the feature task. The
/// provider-specific `khi/source/audit-logs` task is registered by the
/// embedding application.
#[must_use]
pub fn default_inspection_tasks(
    extractor: Arc<dyn AuditLogExtractor>,
) -> Vec<Arc<TaskDefinition>> {
    let mut tasks = khi_audit::tasks::default_tasks(extractor);
    tasks.extend(recorder_tasks());
    tasks.push(serialize_task());
    tasks.push(audit_feature_task());
    tasks
}
