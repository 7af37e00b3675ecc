//! The chunk store

use crate::reference::BinaryReference;
use byteorder::{BigEndian, WriteBytesExt};
use dashmap::DashMap;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default number of parallel writers
const DEFAULT_WRITER_COUNT: usize = 10;
/// Default ceiling for one in-memory chunk (50 MiB)
const DEFAULT_MAX_CHUNK_SIZE: usize = 50 * 1024 * 1024;
/// Default shard count for the content-hash map
const DEFAULT_SHARD_COUNT: usize = 128;
/// Default byte budget for the sealed-buffer cache (256 MiB)
const DEFAULT_SEAL_CACHE_CAPACITY: u64 = 256 * 1024 * 1024;

/// Errors raised by the chunk store
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// Filesystem failure while sealing or reading a chunk
    #[error("chunk io error: {0}")]
    Io(#[from] std::io::Error),

    /// Build was cancelled between chunks
    #[error("chunk build cancelled")]
    Cancelled,

    /// Reference names a chunk this store never issued
    #[error("unknown chunk index {0}")]
    UnknownChunk(u32),

    /// Reference region exceeds its chunk
    #[error("reference {0} is out of range for its chunk")]
    OutOfRange(BinaryReference),

    /// A single record larger than the chunk ceiling cannot be stored
    #[error("record of {size} bytes exceeds chunk ceiling of {max} bytes")]
    RecordTooLarge { size: usize, max: usize },

    /// The writer pool channel was closed
    #[error("chunk writer pool closed")]
    WritersClosed,

    /// Compression worker panicked or was aborted
    #[error("chunk compression failed: {0}")]
    Compression(String),
}

/// Construction parameters for [`ChunkStore`]
#[derive(Debug, Clone)]
pub struct ChunkStoreConfig {
    /// Directory sealed chunks are flushed into
    pub temp_dir: PathBuf,
    /// Parallel writer count
    pub writer_count: usize,
    /// Ceiling for one in-memory chunk
    pub max_chunk_size: usize,
    /// Shard count for the content-hash map
    pub shard_count: usize,
    /// Byte budget for the cache of recently sealed buffers
    pub seal_cache_capacity: u64,
}

impl ChunkStoreConfig {
    /// Config with defaults, sealing into `temp_dir`
    #[must_use]
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            writer_count: DEFAULT_WRITER_COUNT,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            shard_count: DEFAULT_SHARD_COUNT,
            seal_cache_capacity: DEFAULT_SEAL_CACHE_CAPACITY,
        }
    }

    /// Override the chunk ceiling
    #[must_use]
    pub fn with_max_chunk_size(mut self, bytes: usize) -> Self {
        self.max_chunk_size = bytes;
        self
    }

    /// Override the writer count
    #[must_use]
    pub fn with_writer_count(mut self, count: usize) -> Self {
        self.writer_count = count.max(1);
        self
    }
}

/// Where a chunk's bytes currently live
enum ChunkState {
    /// Still being appended to by its writer
    Open(Arc<RwLock<Vec<u8>>>),
    /// Flushed to disk, immutable
    Sealed { path: PathBuf, size: u32 },
}

/// One borrowed writer: an in-memory buffer plus its chunk index
///
/// The index is allocated lazily on first append so empty writers never
/// occupy a chunk slot.
struct ChunkWriter {
    index: Option<u32>,
    buffer: Arc<RwLock<Vec<u8>>>,
}

impl ChunkWriter {
    fn fresh() -> Self {
        Self {
            index: None,
            buffer: Arc::new(RwLock::new(Vec::new())),
        }
    }

    fn len(&self) -> usize {
        self.buffer.read().len()
    }
}

/// Content-addressed arena of sealed, deduplicated chunks
///
/// Thread-safe; shared via `Arc` between every recorder task of a run.
pub struct ChunkStore {
    config: ChunkStoreConfig,
    shards: Vec<Mutex<HashMap<[u8; 32], BinaryReference>>>,
    chunks: DashMap<u32, ChunkState>,
    next_index: AtomicU32,
    writer_tx: mpsc::Sender<ChunkWriter>,
    writer_rx: Mutex<mpsc::Receiver<ChunkWriter>>,
    sealed_cache: moka::sync::Cache<u32, Arc<Vec<u8>>>,
}

impl ChunkStore {
    /// Create a store; sealed chunks land in `config.temp_dir`
    #[must_use]
    pub fn new(config: ChunkStoreConfig) -> Self {
        let (writer_tx, writer_rx) = mpsc::channel(config.writer_count);
        for _ in 0..config.writer_count {
            // Channel capacity equals writer count, so this never blocks.
            writer_tx
                .try_send(ChunkWriter::fresh())
                .unwrap_or_else(|_| unreachable!("writer pool sized to capacity"));
        }
        let sealed_cache = moka::sync::Cache::builder()
            .max_capacity(config.seal_cache_capacity)
            .weigher(|_: &u32, v: &Arc<Vec<u8>>| u32::try_from(v.len()).unwrap_or(u32::MAX))
            .build();
        Self {
            shards: (0..config.shard_count.max(1))
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
            chunks: DashMap::new(),
            next_index: AtomicU32::new(0),
            writer_tx,
            writer_rx: Mutex::new(writer_rx),
            sealed_cache,
            config,
        }
    }

    /// Number of chunks allocated so far
    #[inline]
    #[must_use]
    pub fn chunk_count(&self) -> u32 {
        self.next_index.load(Ordering::SeqCst)
    }

    /// Store `bytes`, returning a stable reference
    ///
    /// Idempotent on content: identical bytes yield an equal reference.
    ///
    /// # Errors
    /// [`ChunkError::RecordTooLarge`] when one record exceeds the chunk
    /// ceiling, [`ChunkError::Io`] when sealing fails.
    pub async fn write(&self, bytes: &[u8]) -> Result<BinaryReference, ChunkError> {
        if bytes.len() > self.config.max_chunk_size {
            return Err(ChunkError::RecordTooLarge {
                size: bytes.len(),
                max: self.config.max_chunk_size,
            });
        }

        let digest: [u8; 32] = Sha256::digest(bytes).into();
        let shard_index = digest[31] as usize % self.shards.len();

        // Shard lock first, then the writer channel (fixed order).
        let mut shard = self.shards[shard_index].lock().await;
        if let Some(existing) = shard.get(&digest) {
            return Ok(*existing);
        }

        let mut writer = {
            let mut rx = self.writer_rx.lock().await;
            rx.recv().await.ok_or(ChunkError::WritersClosed)?
        };

        if writer.index.is_some() && writer.len() + bytes.len() > self.config.max_chunk_size {
            self.seal(&mut writer).await?;
        }

        let index = match writer.index {
            Some(i) => i,
            None => {
                let i = self.next_index.fetch_add(1, Ordering::SeqCst);
                self.chunks
                    .insert(i, ChunkState::Open(Arc::clone(&writer.buffer)));
                writer.index = Some(i);
                i
            }
        };

        let offset = {
            let mut buf = writer.buffer.write();
            let offset = buf.len();
            buf.extend_from_slice(bytes);
            offset
        };

        #[allow(clippy::cast_possible_truncation)]
        let reference = BinaryReference::new(index, offset as u32, bytes.len() as u32);
        shard.insert(digest, reference);
        drop(shard);

        // Return the writer; a closed pool only happens on shutdown.
        let _ = self.writer_tx.send(writer).await;
        Ok(reference)
    }

    /// Read back the exact bytes behind `reference`
    ///
    /// Consults the open buffer, the sealed-buffer cache, then the sealed
    /// file, in that order.
    ///
    /// # Errors
    /// [`ChunkError::UnknownChunk`] / [`ChunkError::OutOfRange`] for a
    /// reference this store never issued; [`ChunkError::Io`] on file reads.
    pub async fn read(&self, reference: &BinaryReference) -> Result<Vec<u8>, ChunkError> {
        let (path, size) = match self
            .chunks
            .get(&reference.buffer_index)
            .ok_or(ChunkError::UnknownChunk(reference.buffer_index))?
            .value()
        {
            ChunkState::Open(buffer) => {
                let buf = buffer.read();
                return slice_region(&buf, reference).map(<[u8]>::to_vec);
            }
            ChunkState::Sealed { path, size } => (path.clone(), *size),
        };

        if reference.end() > u64::from(size) {
            return Err(ChunkError::OutOfRange(*reference));
        }
        if let Some(cached) = self.sealed_cache.get(&reference.buffer_index) {
            return slice_region(&cached, reference).map(<[u8]>::to_vec);
        }

        let bytes = Arc::new(tokio::fs::read(&path).await?);
        self.sealed_cache
            .insert(reference.buffer_index, Arc::clone(&bytes));
        slice_region(&bytes, reference).map(<[u8]>::to_vec)
    }

    /// Flush a writer's buffer to disk and hand it a fresh buffer
    async fn seal(&self, writer: &mut ChunkWriter) -> Result<(), ChunkError> {
        let Some(index) = writer.index else {
            return Ok(());
        };
        let bytes = Arc::new(std::mem::take(&mut *writer.buffer.write()));
        let path = self.config.temp_dir.join(format!("chunk-{index}.bin"));
        tokio::fs::write(&path, bytes.as_slice()).await?;
        debug!(index, size = bytes.len(), "sealed chunk");

        #[allow(clippy::cast_possible_truncation)]
        self.chunks.insert(
            index,
            ChunkState::Sealed {
                path,
                size: bytes.len() as u32,
            },
        );
        self.sealed_cache.insert(index, bytes);
        *writer = ChunkWriter::fresh();
        Ok(())
    }

    /// Full bytes of one (sealed) chunk
    async fn chunk_bytes(&self, index: u32) -> Result<Arc<Vec<u8>>, ChunkError> {
        let path = match self
            .chunks
            .get(&index)
            .ok_or(ChunkError::UnknownChunk(index))?
            .value()
        {
            ChunkState::Open(buffer) => return Ok(Arc::new(buffer.read().clone())),
            ChunkState::Sealed { path, .. } => path.clone(),
        };
        if let Some(cached) = self.sealed_cache.get(&index) {
            return Ok(cached);
        }
        let bytes = Arc::new(tokio::fs::read(&path).await?);
        self.sealed_cache.insert(index, Arc::clone(&bytes));
        Ok(bytes)
    }

    /// Seal every writer. Must not race with in-flight `write` calls.
    async fn seal_all(&self) -> Result<(), ChunkError> {
        let mut rx = self.writer_rx.lock().await;
        for _ in 0..self.config.writer_count {
            let mut writer = rx.recv().await.ok_or(ChunkError::WritersClosed)?;
            self.seal(&mut writer).await?;
            let _ = self.writer_tx.send(writer).await;
        }
        Ok(())
    }

    /// Compress and emit every chunk as `[u32 BE length][gzip bytes]`
    ///
    /// Chunks are compressed concurrently but written strictly in
    /// chunk-index order. Returns the total bytes written.
    ///
    /// # Errors
    /// [`ChunkError::Cancelled`] when `cancel` fires between chunks; the
    /// output is then only partially written and must be discarded by the
    /// caller.
    pub async fn build<W>(
        &self,
        out: &mut W,
        mut on_progress: impl FnMut(u32, u32),
        cancel: &CancellationToken,
    ) -> Result<u64, ChunkError>
    where
        W: Write + Send,
    {
        self.seal_all().await?;
        let count = self.chunk_count();

        let mut workers: JoinSet<Result<(u32, Vec<u8>), ChunkError>> = JoinSet::new();
        for index in 0..count {
            if cancel.is_cancelled() {
                workers.abort_all();
                return Err(ChunkError::Cancelled);
            }
            let bytes = self.chunk_bytes(index).await?;
            workers.spawn_blocking(move || {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&bytes)?;
                Ok((index, encoder.finish()?))
            });
        }

        let mut compressed: Vec<Option<Vec<u8>>> = vec![None; count as usize];
        while let Some(joined) = workers.join_next().await {
            let (index, bytes) = joined.map_err(|e| ChunkError::Compression(e.to_string()))??;
            compressed[index as usize] = Some(bytes);
        }

        let mut total = 0u64;
        for (i, chunk) in compressed.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ChunkError::Cancelled);
            }
            let chunk = chunk.ok_or_else(|| {
                ChunkError::Compression(format!("chunk {i} produced no output"))
            })?;
            #[allow(clippy::cast_possible_truncation)]
            out.write_u32::<BigEndian>(chunk.len() as u32)?;
            out.write_all(&chunk)?;
            total += 4 + chunk.len() as u64;
            #[allow(clippy::cast_possible_truncation)]
            on_progress(i as u32 + 1, count);
        }
        Ok(total)
    }
}

fn slice_region<'a>(
    buf: &'a [u8],
    reference: &BinaryReference,
) -> Result<&'a [u8], ChunkError> {
    if reference.end() > buf.len() as u64 {
        return Err(ChunkError::OutOfRange(*reference));
    }
    let start = reference.offset as usize;
    Ok(&buf[start..start + reference.length as usize])
}
