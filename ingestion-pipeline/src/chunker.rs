//! Overlapping text chunking for fine-grained retrieval.
//!
//! Sections are sliced into ~2000-character windows with 400 characters of
//! overlap so context is not lost at boundaries. Breaks prefer sentence
//! endings inside a search window rather than cutting mid-sentence.

use crate::sources::ParsedSection;

pub const DEFAULT_CHUNK_SIZE: usize = 2000;
pub const DEFAULT_OVERLAP: usize = 400;

/// A chunk of section text awaiting embedding and insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChunk {
    pub content: String,
    pub section_index: usize,
    pub chunk_index: usize,
}

/// Split one section's text into overlapping chunks. Texts at or under the
/// chunk size yield a single chunk.
pub fn chunk_text(
    text: &str,
    section_index: usize,
    chunk_size: usize,
    overlap: usize,
) -> Vec<PendingChunk> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    debug_assert!(overlap < chunk_size, "overlap must be less than chunk_size");

    if text.len() <= chunk_size {
        return vec![PendingChunk {
            content: text.to_string(),
            section_index,
            chunk_index: 0,
        }];
    }

    let bytes = text.as_bytes();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut chunk_index = 0usize;

    while start < text.len() {
        let mut end = (start + chunk_size).min(text.len());

        // Prefer a sentence boundary inside [start + size/2, start + size + 200]
        if end < text.len() {
            let search_start = start + chunk_size / 2;
            let search_end = (start + chunk_size + 200).min(text.len());
            if let Some(boundary) = last_sentence_boundary(bytes, search_start, search_end) {
                if boundary > start {
                    end = boundary + 1; // include the punctuation
                }
            }
        }

        // Keep slices on char boundaries for non-ASCII text
        while end < text.len() && !text.is_char_boundary(end) {
            end += 1;
        }

        if let Some(slice) = text.get(start..end) {
            let content = slice.trim();
            if !content.is_empty() {
                chunks.push(PendingChunk {
                    content: content.to_string(),
                    section_index,
                    chunk_index,
                });
                chunk_index += 1;
            }
        }

        if end >= text.len() {
            break;
        }
        let next = end.saturating_sub(overlap);
        // Overlap must still make forward progress
        start = if next > start { next } else { end };
        while start < text.len() && !text.is_char_boundary(start) {
            start += 1;
        }
    }

    chunks
}

/// Byte offset of the last sentence-ending punctuation followed by
/// whitespace within `[from, to)`, if any.
fn last_sentence_boundary(bytes: &[u8], from: usize, to: usize) -> Option<usize> {
    if from >= to || to > bytes.len() {
        return None;
    }
    let mut best = None;
    for i in from..to.saturating_sub(1) {
        let c = bytes[i];
        let next = bytes[i + 1];
        if matches!(c, b'.' | b'?' | b'!') && (next == b' ' || next == b'\n') {
            best = Some(i);
        }
    }
    best
}

/// Chunk every section of an article, numbering chunks per section.
pub fn chunk_sections(sections: &[ParsedSection]) -> Vec<PendingChunk> {
    sections
        .iter()
        .enumerate()
        .flat_map(|(i, section)| {
            chunk_text(&section.content, i, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP)
        })
        .collect()
}
