//! Artifact serialization
//!
//! The artifact layout, in order:
//!
//! 1. `[u32 BE length][metadata JSON]`: every metadata entry flagged for
//!    inclusion, pre-rendered by the caller
//! 2. `[u32 BE length][history JSON]`: timelines with revisions referencing
//!    binary chunks, plus the ingested log records
//! 3. binary section: `[u32 BE length][gzip chunk]` records from the chunk
//!    store

use crate::builder::{HistoryBuilder, HistoryError, LogAnnotation};
use crate::path::ResourcePath;
use crate::revision::{ParentRelationship, ResourceRevision};
use crate::timeline::ResourceEvent;
use byteorder::{BigEndian, WriteBytesExt};
use chrono::{DateTime, Utc};
use khi_chunk::BinaryReference;
use khi_log::{LogId, Severity};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Byte sizes of each artifact section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArtifactSizes {
    pub metadata: u64,
    pub history: u64,
    pub chunks: u64,
}

impl ArtifactSizes {
    /// Total artifact size
    #[inline]
    #[must_use]
    pub fn total(&self) -> u64 {
        self.metadata + self.history + self.chunks
    }
}

#[derive(Serialize)]
struct TimelineRecord {
    path: ResourcePath,
    #[serde(skip_serializing_if = "Option::is_none")]
    relationship: Option<ParentRelationship>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    aliases: Vec<ResourcePath>,
    revisions: Vec<ResourceRevision>,
    events: Vec<ResourceEvent>,
}

#[derive(Serialize)]
struct LogRecord {
    id: LogId,
    display_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
    severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    annotations: Vec<LogAnnotation>,
    body: BinaryReference,
}

#[derive(Serialize)]
struct HistorySection {
    timelines: Vec<TimelineRecord>,
    logs: Vec<LogRecord>,
}

impl HistoryBuilder {
    fn history_section(&self) -> HistorySection {
        let timelines = self
            .timeline_paths()
            .into_iter()
            .filter_map(|path| {
                let timeline = self.try_timeline(&path)?;
                Some(TimelineRecord {
                    relationship: self.relationship(&path),
                    aliases: self.aliases_of(&path),
                    revisions: timeline.revisions(),
                    events: timeline.events(),
                    path,
                })
            })
            .collect();

        let logs = (0..self.log_count())
            .filter_map(|i| {
                let id = LogId(i);
                let log = self.log(id)?;
                let body = self.stored_log_body(id)?;
                let decoration = self.log_decoration(id).unwrap_or_default();
                Some(LogRecord {
                    id,
                    display_id: log.display_id(),
                    timestamp: log.timestamp().ok(),
                    severity: decoration.severity.unwrap_or_else(|| log.severity()),
                    summary: decoration.summary,
                    annotations: decoration.annotations,
                    body,
                })
            })
            .collect();

        HistorySection { timelines, logs }
    }

    /// Write the complete artifact to `out`
    ///
    /// `metadata` is the pre-rendered metadata section. Progress is reported
    /// per binary chunk. Returns the per-section sizes; the caller records
    /// the total on its header metadata.
    ///
    /// # Errors
    /// [`HistoryError::Cancelled`] when `cancel` fires between sections or
    /// chunks (output must then be discarded), serialization and io errors
    /// otherwise.
    pub async fn finalize<W>(
        &self,
        metadata: &serde_json::Value,
        out: &mut W,
        on_progress: impl FnMut(u32, u32),
        cancel: &CancellationToken,
    ) -> Result<ArtifactSizes, HistoryError>
    where
        W: Write + Send,
    {
        if cancel.is_cancelled() {
            return Err(HistoryError::Cancelled);
        }
        let metadata_bytes =
            serde_json::to_vec(metadata).map_err(|e| HistoryError::Serialize(e.to_string()))?;
        write_section(out, &metadata_bytes)?;

        if cancel.is_cancelled() {
            return Err(HistoryError::Cancelled);
        }
        let history_bytes = serde_json::to_vec(&self.history_section())
            .map_err(|e| HistoryError::Serialize(e.to_string()))?;
        write_section(out, &history_bytes)?;

        let chunks = self
            .chunk_store()
            .build(out, on_progress, cancel)
            .await
            .map_err(|e| match e {
                khi_chunk::ChunkError::Cancelled => HistoryError::Cancelled,
                other => HistoryError::Chunk(other),
            })?;

        let sizes = ArtifactSizes {
            metadata: 4 + metadata_bytes.len() as u64,
            history: 4 + history_bytes.len() as u64,
            chunks,
        };
        info!(total = sizes.total(), "wrote inspection artifact");
        Ok(sizes)
    }

    /// Write the artifact to `path`, leaving nothing behind on failure
    ///
    /// Writes to a sibling `.part` file and renames only on success.
    ///
    /// # Errors
    /// Same as [`HistoryBuilder::finalize`]; the partial file is removed
    /// before the error is returned.
    pub async fn finalize_to_file(
        &self,
        metadata: &serde_json::Value,
        path: &Path,
        on_progress: impl FnMut(u32, u32),
        cancel: &CancellationToken,
    ) -> Result<ArtifactSizes, HistoryError> {
        let partial = path.with_extension("khi.part");
        let result = async {
            let mut file = std::fs::File::create(&partial)?;
            let sizes = self.finalize(metadata, &mut file, on_progress, cancel).await?;
            file.flush()?;
            Ok::<_, HistoryError>(sizes)
        }
        .await;

        match result {
            Ok(sizes) => {
                std::fs::rename(&partial, path)?;
                Ok(sizes)
            }
            Err(err) => {
                let _ = std::fs::remove_file(&partial);
                Err(err)
            }
        }
    }
}

fn write_section<W: Write>(out: &mut W, bytes: &[u8]) -> Result<(), HistoryError> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| HistoryError::Serialize("section exceeds u32 length".to_string()))?;
    out.write_u32::<BigEndian>(len)?;
    out.write_all(bytes)?;
    Ok(())
}
