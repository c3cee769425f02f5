//! Sliding-window text chunker and chunk identifier assembly.
//!
//! Windows are `chunk_size` characters long and advance by
//! `chunk_size - chunk_overlap`, so consecutive windows share
//! `chunk_overlap` characters. Each window is trimmed; windows that are
//! empty after trimming are dropped and do not consume a sequence number.
//!
//! Chunk ids are `<source>[-p<page>]-c<seq>` where `seq` restarts at 0 for
//! every page.

use crate::config::ChunkingConfig;
use crate::models::{Chunk, PageText};

/// Split text into overlapping, trimmed, non-empty windows.
///
/// Offsets are counted in characters, never splitting a code point.
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    bounds.push(text.len());
    let char_len = bounds.len() - 1;

    let size = config.chunk_size.max(1);
    let step = config.step();

    let mut pieces = Vec::new();
    let mut start = 0usize;
    while start < char_len {
        let end = (start + size).min(char_len);
        let piece = text[bounds[start]..bounds[end]].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        if end == char_len {
            break;
        }
        start += step;
    }
    pieces
}

/// Accumulates chunks for one index build in processing order.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    chunks: Vec<Chunk>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the chunks of one page (or one page-less document).
    pub fn push_page(&mut self, source: &str, page: Option<u32>, pieces: Vec<String>) {
        for (seq, text) in pieces.into_iter().enumerate() {
            self.chunks.push(Chunk {
                id: chunk_id(source, page, seq),
                source: source.to_string(),
                page,
                text,
            });
        }
    }

    /// Chunk every extracted page of `source` and append the results.
    pub fn push_document(&mut self, source: &str, pages: &[PageText], config: &ChunkingConfig) {
        for page in pages {
            self.push_page(source, page.page, split_text(&page.text, config));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }
}

pub fn chunk_id(source: &str, page: Option<u32>, seq: usize) -> String {
    match page {
        Some(page) => format!("{}-p{}-c{}", source, page, seq),
        None => format!("{}-c{}", source, seq),
    }
}
