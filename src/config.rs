use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable that overrides `server.auth_token`.
pub const TOKEN_ENV: &str = "ARA_INDEX_TOKEN";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Bearer token required on every request when set.
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
            auth_token: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

/// Sliding-window parameters, measured in characters.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    /// Distance between the starts of consecutive windows.
    /// Never zero, even for an unvalidated config.
    pub fn step(&self) -> usize {
        self.chunk_size
            .max(1)
            .saturating_sub(self.chunk_overlap)
            .max(1)
    }
}

fn default_chunk_size() -> usize {
    1200
}
fn default_chunk_overlap() -> usize {
    150
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexingConfig {
    /// Skip documents that fail extraction instead of aborting the build.
    #[serde(default)]
    pub skip_unreadable: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sharded,
    Blob,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub sharded: ShardedConfig,
    #[serde(default)]
    pub blob: BlobConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KvKind {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ShardedConfig {
    #[serde(default)]
    pub kv: KvKind,
    #[serde(default = "default_kv_path")]
    pub path: PathBuf,
    #[serde(default = "default_sharded_index_key")]
    pub index_key: String,
    #[serde(default = "default_shard_bytes")]
    pub shard_bytes: usize,
}

impl Default for ShardedConfig {
    fn default() -> Self {
        Self {
            kv: KvKind::default(),
            path: default_kv_path(),
            index_key: default_sharded_index_key(),
            shard_bytes: default_shard_bytes(),
        }
    }
}

fn default_kv_path() -> PathBuf {
    PathBuf::from("data/index-kv.sqlite")
}
fn default_sharded_index_key() -> String {
    "rag_index".to_string()
}
fn default_shard_bytes() -> usize {
    900_000
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObjectsKind {
    #[default]
    Filesystem,
    S3,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlobConfig {
    #[serde(default)]
    pub objects: ObjectsKind,
    #[serde(default = "default_objects_root")]
    pub root: PathBuf,
    #[serde(default = "default_blob_index_key")]
    pub index_key: String,
    #[serde(default = "default_seed_prefix")]
    pub seed_prefix: String,
    #[serde(default = "default_upload_prefix")]
    pub upload_prefix: String,
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
    #[serde(default)]
    pub s3: Option<S3Config>,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            objects: ObjectsKind::default(),
            root: default_objects_root(),
            index_key: default_blob_index_key(),
            seed_prefix: default_seed_prefix(),
            upload_prefix: default_upload_prefix(),
            list_page_size: default_list_page_size(),
            s3: None,
        }
    }
}

fn default_objects_root() -> PathBuf {
    PathBuf::from("data/objects")
}
fn default_blob_index_key() -> String {
    "rag/index.json".to_string()
}
fn default_seed_prefix() -> String {
    "seed/".to_string()
}
fn default_upload_prefix() -> String {
    "uploads/".to_string()
}
fn default_list_page_size() -> usize {
    1000
}

/// S3 bucket settings. Credentials come from `AWS_ACCESS_KEY_ID`,
/// `AWS_SECRET_ACCESS_KEY` and optionally `AWS_SESSION_TOKEN`.
#[derive(Debug, Deserialize, Clone)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, R2, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Config {
    /// Defaults with an in-memory sharded store. Used when running without a
    /// config file and in tests.
    pub fn minimal() -> Self {
        let mut config = Self {
            server: ServerConfig::default(),
            chunking: ChunkingConfig::default(),
            indexing: IndexingConfig::default(),
            store: StoreConfig::default(),
        };
        config.store.sharded.kv = KvKind::Memory;
        config
    }

    /// The configured bearer token, if any. Empty strings count as unset.
    pub fn auth_token(&self) -> Option<&str> {
        self.server
            .auth_token
            .as_deref()
            .filter(|token| !token.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            anyhow::bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            anyhow::bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }
        if self.store.sharded.shard_bytes < 4 {
            anyhow::bail!("store.sharded.shard_bytes must be >= 4");
        }
        if self.store.sharded.index_key.is_empty() {
            anyhow::bail!("store.sharded.index_key must not be empty");
        }
        if self.store.blob.index_key.is_empty() {
            anyhow::bail!("store.blob.index_key must not be empty");
        }
        if self.store.blob.list_page_size == 0 {
            anyhow::bail!("store.blob.list_page_size must be >= 1");
        }
        if self.store.backend == BackendKind::Blob
            && self.store.blob.objects == ObjectsKind::S3
            && self.store.blob.s3.is_none()
        {
            anyhow::bail!("store.blob.objects = \"s3\" requires a [store.blob.s3] table");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config);
    config.validate()?;

    Ok(config)
}

pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.is_empty() {
            config.server.auth_token = Some(token);
        }
    }
}
