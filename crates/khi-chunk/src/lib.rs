//! KHI Binary Chunk Store
//!
//! Append-only, content-addressed arena for large resource bodies.
//!
//! # Core Concepts
//!
//! - [`BinaryReference`]: `(buffer index, offset, length)` pointer into the
//!   store; the only thing timelines persist for a revision body
//! - [`ChunkStore::write`]: idempotent on content; identical bytes yield
//!   equal references, keyed by SHA-256
//! - Sealing: a writer whose buffer cannot fit an incoming record flushes
//!   to a temp file and is replaced; sealed chunks are immutable
//! - [`ChunkStore::build`]: gzip-compresses every chunk and emits
//!   `[u32 BE length][compressed bytes]` records in chunk-index order
//!
//! # Concurrency
//!
//! Writers are borrowed from a bounded channel and held exclusively for one
//! `write`. The content map is sharded to bound lock contention. Lock
//! order: shard lock, then the writer-availability channel.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod reference;
mod store;

pub use reference::BinaryReference;
pub use store::{ChunkError, ChunkStore, ChunkStoreConfig};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
