//! Sharded index persistence over a size-limited key-value store.
//!
//! The serialized payload is cut into shards of at most `shard_bytes` bytes,
//! always on UTF-8 character boundaries, and stored under
//! `<index_key>:shard:<n>`. A metadata record under `<index_key>:meta`
//! holds the shard count. Reads fetch every shard concurrently and
//! concatenate them in shard-index order.
//!
//! Shard writes run concurrently and the metadata record is written only after
//! all of them succeed. This is not atomic: a reader running during a write
//! can see new shards under the previous shard count. Once the new count is
//! recorded, shards left over from a longer previous write are deleted; if
//! that cleanup fails they stay behind and are ignored by reads.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use super::{serialize_index, IndexStore, KvStore, Result, StoreError};
use crate::models::{Chunk, IndexPayload};

#[derive(Debug, Serialize, Deserialize)]
struct ShardMeta {
    shards: usize,
    #[serde(default)]
    bytes: usize,
}

pub struct ShardedIndexStore<K> {
    kv: Arc<K>,
    index_key: String,
    shard_bytes: usize,
}

impl<K: KvStore> ShardedIndexStore<K> {
    pub fn new(kv: Arc<K>, index_key: &str, shard_bytes: usize) -> Self {
        Self {
            kv,
            index_key: index_key.to_string(),
            shard_bytes,
        }
    }

    pub fn meta_key(&self) -> String {
        format!("{}:meta", self.index_key)
    }

    pub fn shard_key(&self, index: usize) -> String {
        format!("{}:shard:{}", self.index_key, index)
    }

    /// Number of shards recorded by the last completed write.
    pub async fn shard_count(&self) -> Result<Option<usize>> {
        Ok(self.read_meta().await?.map(|meta| meta.shards))
    }

    async fn read_meta(&self) -> Result<Option<ShardMeta>> {
        let key = self.meta_key();
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        let meta = serde_json::from_str(&raw).map_err(|e| StoreError::CorruptMeta {
            key,
            message: e.to_string(),
        })?;
        Ok(Some(meta))
    }
}

#[async_trait]
impl<K: KvStore + 'static> IndexStore for ShardedIndexStore<K> {
    fn name(&self) -> &'static str {
        "sharded"
    }

    async fn write(&self, chunks: &[Chunk]) -> Result<()> {
        let payload = serialize_index(chunks)?;
        let shards = split_utf8(&payload, self.shard_bytes);
        let previous = match self.read_meta().await {
            Ok(meta) => meta.map_or(0, |meta| meta.shards),
            Err(error) => {
                tracing::warn!(
                    key = %self.index_key,
                    error = %error,
                    "previous shard count unreadable"
                );
                0
            }
        };

        try_join_all(
            shards
                .iter()
                .enumerate()
                .map(|(index, shard)| {
                    let key = self.shard_key(index);
                    async move { self.kv.put(&key, shard).await }
                }),
        )
        .await?;

        let meta = ShardMeta {
            shards: shards.len(),
            bytes: payload.len(),
        };
        self.kv
            .put(&self.meta_key(), &serde_json::to_string(&meta)?)
            .await?;

        if previous > shards.len() {
            let stale = try_join_all((shards.len()..previous).map(|index| {
                let key = self.shard_key(index);
                async move { self.kv.delete(&key).await }
            }))
            .await;
            if let Err(error) = stale {
                tracing::warn!(
                    key = %self.index_key,
                    error = %error,
                    "stale shard cleanup failed"
                );
            }
        }

        tracing::info!(
            key = %self.index_key,
            chunks = chunks.len(),
            shards = shards.len(),
            bytes = payload.len(),
            "sharded index written"
        );
        Ok(())
    }

    async fn read(&self) -> Result<Option<String>> {
        let Some(meta) = self.read_meta().await? else {
            return Ok(Some(IndexPayload::EMPTY_JSON.to_string()));
        };

        // try_join_all yields results in input order, whatever order the
        // reads complete in.
        let shards = try_join_all((0..meta.shards).map(|index| {
            let key = self.shard_key(index);
            async move {
                self.kv.get(&key).await?.ok_or(StoreError::MissingShard {
                    key: self.index_key.clone(),
                    index,
                })
            }
        }))
        .await?;

        Ok(Some(shards.concat()))
    }
}

/// Cut `text` into consecutive slices of at most `max_bytes` bytes, each
/// ending on a character boundary. A character wider than `max_bytes` gets a
/// slice of its own.
pub fn split_utf8(text: &str, max_bytes: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut cut = max_bytes.min(rest.len());
        while cut > 0 && !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            cut = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
        }
        let (head, tail) = rest.split_at(cut);
        out.push(head);
        rest = tail;
    }
    out
}
