//! Core data models used throughout the indexer.
//!
//! These types represent the documents, extracted pages, and chunks that flow
//! through the extraction → chunking → persistence pipeline, plus the
//! serialized index shape consumed by downstream retrieval.

use serde::{Deserialize, Serialize};

/// A raw document handed to an index build, either listed from the seed area
/// of an object store or received as an upload.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// File name, used verbatim as the chunk `source`.
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// One unit of extracted text. `page` is 1-based for paginated formats and
/// `None` for formats without a page concept (plain text, Markdown).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page: Option<u32>,
    pub text: String,
}

/// The atomic retrieval unit persisted in the index.
///
/// Field order and names are the durable wire contract read by the analysis
/// backend: `{id, source, page, text}` with `page` serialized as `null` when
/// absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source: String,
    pub page: Option<u32>,
    pub text: String,
}

/// The logical index: every chunk from the most recent build, in build order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPayload {
    pub chunks: Vec<Chunk>,
}

impl IndexPayload {
    /// Serialized form of an index with no chunks.
    pub const EMPTY_JSON: &'static str = r#"{"chunks":[]}"#;
}

/// Result of an index-build operation, returned by both the HTTP gateway and
/// the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    pub status: String,
    pub indexed_chunks: usize,
    /// Unique source names, case-sensitive, lexicographically sorted.
    pub sources: Vec<String>,
    /// Sources dropped because they could not be read (only populated when
    /// `indexing.skip_unreadable` is enabled).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}
