//! Pipeline stage task definitions
//!
//! Wires log ingestion and stages 1–3 into the task graph. The audit log
//! source (`khi/source/audit-logs`) is provided by the embedding
//! application per log provider; everything downstream is provider
//! neutral. Every stage returns an empty container in dry-run.

use crate::extract::{extract_audit_logs, AuditLogExtractor, DEFAULT_EXTRACT_WORKERS};
use crate::group::{GroupedLogs, TimelineGrouper};
use crate::manifest::{rebuild_manifests, ManifestTimelines, DEFAULT_REBUILD_WORKERS};
use crate::merge::MergeConfigRegistry;
use crate::parsed::ParsedAuditLog;
use crate::AuditError;
use khi_chunk::{ChunkStore, ChunkStoreConfig};
use khi_history::HistoryBuilder;
use khi_log::{Log, LogId};
use khi_task::{
    labels, ErrorSetMetadata, LabelSet, TaskContext, TaskDefinition, TaskError, TaskId,
    TaskReference, TypedKey, IO_CONFIG,
};
use std::sync::Arc;

/// Typed references to the pipeline results
pub mod refs {
    use super::{GroupedLogs, Log, LogId, ManifestTimelines, ParsedAuditLog, TaskReference};
    use std::sync::Arc;

    /// Audit logs listed by the provider-specific source task
    pub static SOURCE_AUDIT_LOGS: TaskReference<Vec<Arc<Log>>> =
        TaskReference::new("khi/source/audit-logs");
    /// Ids assigned by log ingestion
    pub static INGESTED_LOG_IDS: TaskReference<Vec<LogId>> = TaskReference::new("khi/audit/ingest");
    /// Stage 1 output
    pub static PARSED_LOGS: TaskReference<Vec<ParsedAuditLog>> =
        TaskReference::new("khi/audit/parse");
    /// Stage 2 output
    pub static GROUPED_LOGS: TaskReference<GroupedLogs> = TaskReference::new("khi/audit/group");
    /// Stage 3 output
    pub static MANIFEST_TIMELINES: TaskReference<ManifestTimelines> =
        TaskReference::new("khi/audit/manifest");
}

/// Inspection-map key of the run's history builder
pub static HISTORY_BUILDER: TypedKey<HistoryBuilder> = TypedKey::new("khi/history-builder");

/// The run's history builder, created on first use from the io config
///
/// # Errors
/// Fails when neither a builder nor an [`IO_CONFIG`] is present in the
/// inspection shared map.
pub fn history_builder(ctx: &TaskContext, id: &TaskId) -> Result<Arc<HistoryBuilder>, TaskError> {
    if let Some(existing) = ctx.inspection().get(HISTORY_BUILDER) {
        return Ok(existing);
    }
    let io = ctx
        .inspection()
        .get(IO_CONFIG)
        .ok_or_else(|| TaskError::failed(id, "no io config in the inspection shared map"))?;
    Ok(ctx.inspection().get_or_insert_with(HISTORY_BUILDER, || {
        HistoryBuilder::new(Arc::new(ChunkStore::new(ChunkStoreConfig::new(
            io.temporary_dir.clone(),
        ))))
    }))
}

fn map_audit_err(id: &TaskId, err: AuditError) -> TaskError {
    match err {
        AuditError::Cancelled => TaskError::Cancelled,
        other => TaskError::failed(id, other),
    }
}

fn stage_labels() -> LabelSet {
    LabelSet::new().with(labels::PROGRESS_REPORTABLE, true)
}

/// Log ingestion: copy source logs into the history builder
#[must_use]
pub fn ingest_task() -> Arc<TaskDefinition> {
    let id = TaskId::new(refs::INGESTED_LOG_IDS.reference());
    TaskDefinition::new(
        id.clone(),
        vec![refs::SOURCE_AUDIT_LOGS.reference().to_string()],
        stage_labels(),
        move |ctx: TaskContext| {
            let id = id.clone();
            async move {
                if ctx.is_dry_run() {
                    return Ok(Vec::<LogId>::new());
                }
                let logs = ctx.result(refs::SOURCE_AUDIT_LOGS)?;
                let builder = history_builder(&ctx, &id)?;
                let updater =
                    ctx.progress()
                        .updater(id.to_string(), logs.len(), "ingesting audit logs");
                let ids = builder
                    .serialize_logs((*logs).clone(), |_| updater.increment())
                    .await
                    .map_err(|e| TaskError::failed(&id, e))?;
                Ok(ids)
            }
        },
    )
}

/// Stage 1: field extraction
#[must_use]
pub fn parse_task(extractor: Arc<dyn AuditLogExtractor>) -> Arc<TaskDefinition> {
    let id = TaskId::new(refs::PARSED_LOGS.reference());
    TaskDefinition::new(
        id.clone(),
        vec![refs::INGESTED_LOG_IDS.reference().to_string()],
        stage_labels(),
        move |ctx: TaskContext| {
            let id = id.clone();
            let extractor = Arc::clone(&extractor);
            async move {
                if ctx.is_dry_run() {
                    return Ok(Vec::<ParsedAuditLog>::new());
                }
                let ids = ctx.result(refs::INGESTED_LOG_IDS)?;
                let builder = history_builder(&ctx, &id)?;
                let logs: Vec<(LogId, Arc<Log>)> = ids
                    .iter()
                    .filter_map(|log_id| builder.log(*log_id).map(|log| (*log_id, log)))
                    .collect();

                let updater =
                    ctx.progress()
                        .updater(id.to_string(), logs.len(), "extracting audit fields");
                let outcome = extract_audit_logs(
                    logs,
                    extractor,
                    DEFAULT_EXTRACT_WORKERS,
                    ctx.cancellation(),
                    move || updater.increment(),
                )
                .await
                .map_err(|e| map_audit_err(&id, e))?;

                if outcome.dropped > 0 {
                    ctx.metadata().get_or_init::<ErrorSetMetadata>().add_for_task(
                        id.to_string(),
                        format!("{} audit logs failed field extraction", outcome.dropped),
                    );
                }
                Ok(outcome.parsed)
            }
        },
    )
}

/// Stage 2: timeline grouping and delete-collection fan-out
#[must_use]
pub fn group_task() -> Arc<TaskDefinition> {
    let id = TaskId::new(refs::GROUPED_LOGS.reference());
    TaskDefinition::new(
        id.clone(),
        vec![refs::PARSED_LOGS.reference().to_string()],
        stage_labels(),
        move |ctx: TaskContext| {
            let id = id.clone();
            async move {
                if ctx.is_dry_run() {
                    return Ok(GroupedLogs::default());
                }
                let parsed = ctx.result(refs::PARSED_LOGS)?;
                let grouped = TimelineGrouper::new().group((*parsed).clone());
                if grouped.undecided > 0 {
                    ctx.metadata().get_or_init::<ErrorSetMetadata>().add_for_task(
                        id.to_string(),
                        format!("{} audit logs matched no timeline group", grouped.undecided),
                    );
                }
                Ok(grouped)
            }
        },
    )
}

/// Stage 3: manifest reconstruction
#[must_use]
pub fn manifest_task(merge_config: Arc<MergeConfigRegistry>) -> Arc<TaskDefinition> {
    let id = TaskId::new(refs::MANIFEST_TIMELINES.reference());
    TaskDefinition::new(
        id.clone(),
        vec![refs::GROUPED_LOGS.reference().to_string()],
        stage_labels(),
        move |ctx: TaskContext| {
            let id = id.clone();
            let merge_config = Arc::clone(&merge_config);
            async move {
                if ctx.is_dry_run() {
                    return Ok(ManifestTimelines::default());
                }
                let grouped = ctx.result(refs::GROUPED_LOGS)?;
                let updater = ctx.progress().updater(
                    id.to_string(),
                    grouped.groups.len(),
                    "reconstructing manifests",
                );
                rebuild_manifests(
                    (*grouped).clone(),
                    merge_config,
                    DEFAULT_REBUILD_WORKERS,
                    ctx.cancellation(),
                    move || updater.increment(),
                )
                .await
                .map_err(|e| map_audit_err(&id, e))
            }
        },
    )
}

/// Every pipeline stage task with defaults
#[must_use]
pub fn default_tasks(extractor: Arc<dyn AuditLogExtractor>) -> Vec<Arc<TaskDefinition>> {
    vec![
        ingest_task(),
        parse_task(extractor),
        group_task(),
        manifest_task(Arc::new(MergeConfigRegistry::new())),
    ]
}
