//! Index persistence over pluggable backing stores.
//!
//! The [`IndexStore`] trait is the read/write contract for the serialized
//! index. Two families of adapters implement it:
//!
//! | Backend | Index store | Backing interface | Seed listing | Raw uploads |
//! |---------|-------------|-------------------|--------------|-------------|
//! | `sharded` | [`ShardedIndexStore`] | [`KvStore`] (`get`/`put`) | none (always empty) | discarded |
//! | `blob` | [`BlobIndexStore`] | [`ObjectStore`] (`get`/`put`/`list`) | paginated prefix listing | retained |
//!
//! Missing-index semantics differ: the sharded store reports an
//! empty index (`{"chunks":[]}`) when nothing was ever written, while the blob
//! store reports `None` so callers can answer "not found".
//!
//! There is no locking across requests. Two concurrent builds race and the
//! last writer wins on every key.

pub mod blob;
pub mod kv;
pub mod object;
pub mod s3;
pub mod sharded;

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::{BackendKind, Config, KvKind, ObjectsKind};
use crate::models::{Chunk, SourceDocument};

pub use blob::{BlobIndexStore, ObjectDocuments};
pub use kv::{KvStore, MemoryKv, SqliteKv};
pub use object::{FsObjectStore, ListPage, MemoryObjectStore, ObjectInfo, ObjectStore};
pub use s3::S3ObjectStore;
pub use sharded::ShardedIndexStore;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Predicate over seed file names. Higher-ranked so it can be applied to
/// names borrowed from a listing that lives inside the async body.
pub type NameFilter = dyn for<'a> Fn(&'a str) -> bool + Send + Sync;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("value for key '{key}' is {size} bytes, exceeding the {limit}-byte limit")]
    ValueTooLarge {
        key: String,
        size: usize,
        limit: usize,
    },

    #[error("shard {index} of '{key}' is missing")]
    MissingShard { key: String, index: usize },

    #[error("corrupt index metadata under '{key}': {message}")]
    CorruptMeta { key: String, message: String },

    #[error("object '{0}' is not valid UTF-8")]
    NotUtf8(String),

    #[error("invalid object key: '{0}'")]
    InvalidKey(String),

    #[error("object store request failed: {0}")]
    Remote(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Persists and returns the complete serialized index.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Replace the stored index with `chunks`.
    async fn write(&self, chunks: &[Chunk]) -> Result<()>;

    /// The stored payload as ready-to-serve JSON text, or `None` when the
    /// backend distinguishes "never written" from "empty".
    async fn read(&self) -> Result<Option<String>>;
}

/// Where index builds get their documents from, and where raw uploads go.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// All seed documents whose file name passes `accept`, ordered by key.
    async fn seed_documents(
        &self,
        accept: &NameFilter,
    ) -> Result<Vec<SourceDocument>>;

    /// Keep a copy of an uploaded document. Returns the key it was stored
    /// under, or `None` if this backend does not retain uploads.
    async fn retain_upload(&self, doc: &SourceDocument) -> Result<Option<String>>;
}

/// Document source for backends without a listing capability: seeding always
/// yields nothing and uploads are not retained.
pub struct NoDocuments;

#[async_trait]
impl DocumentSource for NoDocuments {
    async fn seed_documents(
        &self,
        _accept: &NameFilter,
    ) -> Result<Vec<SourceDocument>> {
        Ok(Vec::new())
    }

    async fn retain_upload(&self, _doc: &SourceDocument) -> Result<Option<String>> {
        Ok(None)
    }
}

/// An index store paired with its document source.
#[derive(Clone)]
pub struct Backend {
    pub kind: BackendKind,
    pub index: Arc<dyn IndexStore>,
    pub documents: Arc<dyn DocumentSource>,
}

impl Backend {
    pub fn sharded<K: KvStore + 'static>(kv: K, index_key: &str, shard_bytes: usize) -> Self {
        Self {
            kind: BackendKind::Sharded,
            index: Arc::new(ShardedIndexStore::new(Arc::new(kv), index_key, shard_bytes)),
            documents: Arc::new(NoDocuments),
        }
    }

    pub fn blob<O: ObjectStore + 'static>(objects: O, config: &crate::config::BlobConfig) -> Self {
        let objects = Arc::new(objects);
        Self {
            kind: BackendKind::Blob,
            index: Arc::new(BlobIndexStore::new(objects.clone(), &config.index_key)),
            documents: Arc::new(ObjectDocuments::new(
                objects,
                &config.seed_prefix,
                &config.upload_prefix,
                config.list_page_size,
            )),
        }
    }
}

/// Build the backend selected in `[store]`.
pub async fn open_backend(config: &Config) -> anyhow::Result<Backend> {
    let backend = match config.store.backend {
        BackendKind::Sharded => {
            let sharded = &config.store.sharded;
            match sharded.kv {
                KvKind::Sqlite => {
                    let kv = SqliteKv::open(&sharded.path).await.with_context(|| {
                        format!("Failed to open key-value store: {}", sharded.path.display())
                    })?;
                    Backend::sharded(kv, &sharded.index_key, sharded.shard_bytes)
                }
                KvKind::Memory => {
                    Backend::sharded(MemoryKv::new(), &sharded.index_key, sharded.shard_bytes)
                }
            }
        }
        BackendKind::Blob => {
            let blob = &config.store.blob;
            match blob.objects {
                ObjectsKind::Filesystem => {
                    Backend::blob(FsObjectStore::new(blob.root.clone()), blob)
                }
                ObjectsKind::Memory => Backend::blob(MemoryObjectStore::new(), blob),
                ObjectsKind::S3 => {
                    let s3 = blob
                        .s3
                        .clone()
                        .context("store.blob.objects = \"s3\" requires a [store.blob.s3] table")?;
                    Backend::blob(S3ObjectStore::from_env(s3)?, blob)
                }
            }
        }
    };
    tracing::info!(
        backend = backend.index.name(),
        "index store ready"
    );
    Ok(backend)
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    chunks: &'a [Chunk],
}

/// Serialize `{chunks}` exactly as it is served to readers.
pub fn serialize_index(chunks: &[Chunk]) -> Result<String> {
    Ok(serde_json::to_string(&PayloadRef { chunks })?)
}
