//! Object-store backing interface for the single-blob index and seed listing.
//!
//! Listing follows the `ListObjectsV2` model: results are ordered by key,
//! bounded by a page size, and resumed with an opaque cursor until a page
//! comes back untruncated.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use walkdir::WalkDir;

use super::{Result, StoreError};

/// Metadata for one listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    pub truncated: bool,
    /// Pass back to [`ObjectStore::list`] to fetch the next page.
    pub cursor: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: Vec<u8>, content_type: &str) -> Result<()>;
    async fn list(&self, prefix: &str, cursor: Option<&str>, limit: usize) -> Result<ListPage>;
}

/// Walk every page of a prefix listing.
///
/// Pages depend on the previous cursor, so they are fetched one after another.
pub async fn list_all<O: ObjectStore + ?Sized>(
    store: &O,
    prefix: &str,
    page_size: usize,
) -> Result<Vec<ObjectInfo>> {
    let mut objects = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = store.list(prefix, cursor.as_deref(), page_size).await?;
        objects.extend(page.objects);
        match (page.truncated, page.cursor) {
            (true, Some(next)) => cursor = Some(next),
            (true, None) => {
                return Err(StoreError::Remote(format!(
                    "listing of '{}' truncated without a cursor",
                    prefix
                )))
            }
            (false, _) => break,
        }
    }
    Ok(objects)
}

/// Page through a sorted key set. The cursor is the last key returned.
fn page_of<'a, I>(keys: I, prefix: &str, cursor: Option<&str>, limit: usize) -> ListPage
where
    I: Iterator<Item = (&'a String, u64)>,
{
    let mut matching = keys
        .filter(|(key, _)| key.starts_with(prefix))
        .filter(|(key, _)| cursor.map_or(true, |c| key.as_str() > c))
        .peekable();

    let mut objects = Vec::new();
    while objects.len() < limit.max(1) {
        match matching.next() {
            Some((key, size)) => objects.push(ObjectInfo {
                key: key.clone(),
                size,
            }),
            None => break,
        }
    }
    let truncated = matching.peek().is_some();
    let cursor = if truncated {
        objects.last().map(|o| o.key.clone())
    } else {
        None
    };
    ListPage {
        objects,
        truncated,
        cursor,
    }
}

struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// In-process object store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.content_type.clone())
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.read().await.get(key).map(|o| o.bytes.clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>, content_type: &str) -> Result<()> {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                bytes: value,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>, limit: usize) -> Result<ListPage> {
        let objects = self.objects.read().await;
        Ok(page_of(
            objects.iter().map(|(k, o)| (k, o.bytes.len() as u64)),
            prefix,
            cursor,
            limit,
        ))
    }
}

/// Object store rooted at a local directory. Keys are `/`-separated paths
/// relative to the root. Content types are not recorded.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.ends_with('/')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

const PARTIAL_SUFFIX: &str = ".partial";

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, _content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write beside the target and rename so readers never see a torn file.
        let mut partial = path.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);
        tokio::fs::write(&partial, value).await?;
        tokio::fs::rename(&partial, &path).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>, limit: usize) -> Result<ListPage> {
        let root = self.root.clone();
        let keys = tokio::task::spawn_blocking(move || walk_keys(&root))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;
        Ok(page_of(
            keys.iter().map(|(k, size)| (k, *size)),
            prefix,
            cursor,
            limit,
        ))
    }
}

/// All file keys under `root`, sorted.
fn walk_keys(root: &Path) -> Result<BTreeMap<String, u64>> {
    let mut keys = BTreeMap::new();
    if !root.exists() {
        return Ok(keys);
    }
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.to_string_lossy().ends_with(PARTIAL_SUFFIX) {
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        keys.insert(key, size);
    }
    Ok(keys)
}
