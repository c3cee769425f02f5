//! Index-build operations: seed-reindex and upload-and-reindex.
//!
//! A build runs extraction and chunking over every document in order,
//! accumulating one chunk list, and writes it to the index store only once
//! the whole list is assembled. Each build replaces the previous index.
//!
//! Extraction and chunking are CPU-bound and run on tokio's blocking pool.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

use crate::chunk::ChunkAssembler;
use crate::config::{ChunkingConfig, Config};
use crate::extract::{ExtractError, ExtractorRegistry};
use crate::models::{Chunk, IndexReport, SourceDocument};
use crate::store::{Backend, StoreError};

pub const STATUS_INDEXED: &str = "indexed";
pub const STATUS_UPLOADED: &str = "uploaded_and_indexed";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("no files were provided")]
    NoFiles,

    #[error("failed to read '{name}': {error}")]
    Extract {
        name: String,
        #[source]
        error: ExtractError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("index build task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Chunks produced by one build plus the documents left out of it.
#[derive(Debug, Default)]
pub struct BuildOutcome {
    pub chunks: Vec<Chunk>,
    pub skipped: Vec<String>,
}

pub struct Indexer {
    extractors: Arc<ExtractorRegistry>,
    chunking: ChunkingConfig,
    skip_unreadable: bool,
    backend: Backend,
}

impl Indexer {
    pub fn new(config: &Config, backend: Backend) -> Self {
        Self {
            extractors: Arc::new(ExtractorRegistry::with_defaults()),
            chunking: config.chunking,
            skip_unreadable: config.indexing.skip_unreadable,
            backend,
        }
    }

    /// Replace the extractor registry, e.g. to support extra formats.
    pub fn with_extractors(mut self, extractors: ExtractorRegistry) -> Self {
        self.extractors = Arc::new(extractors);
        self
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// The stored index as JSON text, `None` when the backend reports it
    /// missing.
    pub async fn read_index(&self) -> Result<Option<String>, IndexError> {
        Ok(self.backend.index.read().await?)
    }

    /// Rebuild the index from every supported document in the seed area.
    pub async fn seed(&self) -> Result<IndexReport, IndexError> {
        let extractors = Arc::clone(&self.extractors);
        let accept = move |name: &str| extractors.supports(name);
        let documents = self.backend.documents.seed_documents(&accept).await?;
        tracing::info!(documents = documents.len(), "seed reindex started");

        let outcome = self.build(documents).await?;
        self.persist(&outcome.chunks).await?;
        Ok(report(STATUS_INDEXED, outcome))
    }

    /// Retain the uploaded files (where the backend keeps them) and rebuild
    /// the index from exactly these files.
    pub async fn upload(&self, files: Vec<SourceDocument>) -> Result<IndexReport, IndexError> {
        if files.is_empty() {
            return Err(IndexError::NoFiles);
        }
        for file in &files {
            if let Some(key) = self.backend.documents.retain_upload(file).await? {
                tracing::info!(name = %file.name, key = %key, "stored upload");
            }
        }

        let outcome = self.build(files).await?;
        self.persist(&outcome.chunks).await?;
        Ok(report(STATUS_UPLOADED, outcome))
    }

    /// Extract and chunk `documents` in order on a blocking thread. Nothing
    /// is persisted.
    pub async fn build(&self, documents: Vec<SourceDocument>) -> Result<BuildOutcome, IndexError> {
        let extractors = self.extractors.clone();
        let chunking = self.chunking;
        let skip_unreadable = self.skip_unreadable;

        tokio::task::spawn_blocking(move || {
            run_build(&extractors, &chunking, skip_unreadable, &documents)
        })
        .await?
    }

    async fn persist(&self, chunks: &[Chunk]) -> Result<(), IndexError> {
        self.backend.index.write(chunks).await?;
        tracing::info!(
            backend = self.backend.index.name(),
            chunks = chunks.len(),
            "index replaced"
        );
        Ok(())
    }
}

fn run_build(
    extractors: &ExtractorRegistry,
    chunking: &ChunkingConfig,
    skip_unreadable: bool,
    documents: &[SourceDocument],
) -> Result<BuildOutcome, IndexError> {
    let mut assembler = ChunkAssembler::new();
    let mut skipped = Vec::new();

    for doc in documents {
        let pages = match extractors.extract(&doc.name, &doc.bytes) {
            Ok(pages) => pages,
            Err(error) if skip_unreadable => {
                tracing::warn!(name = %doc.name, error = %error, "skipping unreadable document");
                skipped.push(doc.name.clone());
                continue;
            }
            Err(error) => {
                return Err(IndexError::Extract {
                    name: doc.name.clone(),
                    error,
                })
            }
        };

        let before = assembler.len();
        assembler.push_document(&doc.name, &pages, chunking);
        tracing::debug!(
            name = %doc.name,
            pages = pages.len(),
            chunks = assembler.len() - before,
            "document chunked"
        );
    }

    Ok(BuildOutcome {
        chunks: assembler.into_chunks(),
        skipped,
    })
}

/// Unique source names across `chunks`, sorted.
pub fn summarize(chunks: &[Chunk]) -> Vec<String> {
    chunks
        .iter()
        .map(|c| c.source.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn report(status: &str, outcome: BuildOutcome) -> IndexReport {
    IndexReport {
        status: status.to_string(),
        indexed_chunks: outcome.chunks.len(),
        sources: summarize(&outcome.chunks),
        skipped: outcome.skipped,
    }
}
