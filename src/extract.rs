//! Page-level text extraction for indexable documents (PDF, Markdown, plain text).
//!
//! Extraction is dispatched on the file name's lowercase extension through an
//! [`ExtractorRegistry`]. Unknown extensions extract to an empty page list so
//! batch builds skip them silently.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::models::PageText;

/// Extraction failure for a single document.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Converts a raw document buffer into ordered `(page, text)` units.
pub trait Extractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<PageText>, ExtractError>;
}

/// Per-page PDF text. Pages that are blank after whitespace normalization are
/// dropped; the remaining pages keep their physical 1-based numbers.
pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
        let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string()))?;
        Ok(pages_from_raw(pages))
    }
}

/// Builds page units from raw per-page strings, numbering from 1.
pub fn pages_from_raw<I, S>(raw_pages: I) -> Vec<PageText>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw_pages
        .into_iter()
        .enumerate()
        .filter_map(|(idx, raw)| {
            let text = collapse_whitespace(raw.as_ref());
            if text.is_empty() {
                None
            } else {
                Some(PageText {
                    page: Some(idx as u32 + 1),
                    text,
                })
            }
        })
        .collect()
}

/// Joins whitespace-separated items with single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whole-buffer text as a single page-less unit. Invalid UTF-8 sequences are
/// replaced rather than rejected.
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
        let text = String::from_utf8_lossy(bytes);
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![PageText {
            page: None,
            text: text.to_string(),
        }])
    }
}

/// Extractor lookup keyed by normalized lowercase extension.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    by_extension: HashMap<String, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// An empty registry: every document extracts to nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// `pdf` → [`PdfExtractor`], `md`/`txt` → [`PlainTextExtractor`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("pdf", Arc::new(PdfExtractor));
        let plain: Arc<dyn Extractor> = Arc::new(PlainTextExtractor);
        registry.register("md", plain.clone());
        registry.register("txt", plain);
        registry
    }

    pub fn register(&mut self, extension: &str, extractor: Arc<dyn Extractor>) {
        self.by_extension
            .insert(extension.to_ascii_lowercase(), extractor);
    }

    pub fn supports(&self, file_name: &str) -> bool {
        self.find(file_name).is_some()
    }

    pub fn find(&self, file_name: &str) -> Option<&dyn Extractor> {
        let ext = extension_of(file_name)?;
        self.by_extension.get(&ext).map(|e| e.as_ref())
    }

    /// Extracts pages from `bytes`, or returns an empty list when no
    /// extractor is registered for the file's extension.
    pub fn extract(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
        match self.find(file_name) {
            Some(extractor) => extractor.extract(bytes),
            None => Ok(Vec::new()),
        }
    }
}

/// Lowercase extension of a file name, without the dot.
pub fn extension_of(file_name: &str) -> Option<String> {
    let base = file_name.rsplit('/').next().unwrap_or(file_name);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Content type recorded when retaining an upload in an object store.
pub fn content_type_for(file_name: &str) -> &'static str {
    match extension_of(file_name).as_deref() {
        Some("pdf") => "application/pdf",
        Some("md") => "text/markdown",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}
