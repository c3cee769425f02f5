//! Single-blob index persistence and seed/upload documents over an
//! [`ObjectStore`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::try_join_all;

use super::object::{list_all, ObjectStore};
use super::{serialize_index, DocumentSource, IndexStore, NameFilter, Result, StoreError};
use crate::models::{Chunk, SourceDocument};

/// Stores the whole serialized index as one object.
pub struct BlobIndexStore<O> {
    objects: Arc<O>,
    index_key: String,
}

impl<O: ObjectStore> BlobIndexStore<O> {
    pub fn new(objects: Arc<O>, index_key: &str) -> Self {
        Self {
            objects,
            index_key: index_key.to_string(),
        }
    }
}

#[async_trait]
impl<O: ObjectStore + 'static> IndexStore for BlobIndexStore<O> {
    fn name(&self) -> &'static str {
        "blob"
    }

    async fn write(&self, chunks: &[Chunk]) -> Result<()> {
        let payload = serialize_index(chunks)?;
        let bytes = payload.len();
        self.objects
            .put(&self.index_key, payload.into_bytes(), "application/json")
            .await?;
        tracing::info!(
            key = %self.index_key,
            chunks = chunks.len(),
            bytes,
            "blob index written"
        );
        Ok(())
    }

    async fn read(&self) -> Result<Option<String>> {
        match self.objects.get(&self.index_key).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| StoreError::NotUtf8(self.index_key.clone())),
            None => Ok(None),
        }
    }
}

/// Seed listing and upload retention under configurable key prefixes.
pub struct ObjectDocuments<O> {
    objects: Arc<O>,
    seed_prefix: String,
    upload_prefix: String,
    page_size: usize,
}

impl<O: ObjectStore> ObjectDocuments<O> {
    pub fn new(objects: Arc<O>, seed_prefix: &str, upload_prefix: &str, page_size: usize) -> Self {
        Self {
            objects,
            seed_prefix: seed_prefix.to_string(),
            upload_prefix: upload_prefix.to_string(),
            page_size,
        }
    }

    /// Key for a retained upload: `<upload_prefix><unix millis>-<file name>`.
    pub fn upload_key(&self, name: &str, millis: i64) -> String {
        let safe: String = name
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        format!("{}{}-{}", self.upload_prefix, millis, safe)
    }
}

/// Last `/`-separated segment of an object key.
pub fn file_name_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[async_trait]
impl<O: ObjectStore + 'static> DocumentSource for ObjectDocuments<O> {
    async fn seed_documents(
        &self,
        accept: &NameFilter,
    ) -> Result<Vec<SourceDocument>> {
        let mut listed = list_all(self.objects.as_ref(), &self.seed_prefix, self.page_size).await?;
        listed.sort_by(|a, b| a.key.cmp(&b.key));
        listed.retain(|o| accept(file_name_of(&o.key)));

        tracing::debug!(
            prefix = %self.seed_prefix,
            objects = listed.len(),
            "seed listing complete"
        );

        let fetched = try_join_all(listed.iter().map(|object| async move {
            let bytes = self.objects.get(&object.key).await?;
            Ok::<_, StoreError>((object.key.as_str(), bytes))
        }))
        .await?;

        let mut documents = Vec::with_capacity(fetched.len());
        for (key, bytes) in fetched {
            match bytes {
                Some(bytes) => documents.push(SourceDocument::new(file_name_of(key), bytes)),
                None => tracing::warn!(key, "seed object vanished after listing"),
            }
        }
        Ok(documents)
    }

    async fn retain_upload(&self, doc: &SourceDocument) -> Result<Option<String>> {
        let key = self.upload_key(&doc.name, Utc::now().timestamp_millis());
        self.objects
            .put(
                &key,
                doc.bytes.clone(),
                crate::extract::content_type_for(&doc.name),
            )
            .await?;
        tracing::debug!(key = %key, bytes = doc.bytes.len(), "upload retained");
        Ok(Some(key))
    }
}
