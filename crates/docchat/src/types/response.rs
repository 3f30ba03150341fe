//! Retrieval and answer types

use serde::{Deserialize, Serialize};

use super::document::Chunk;

/// One retrieved chunk with its similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// The retrieved chunk
    pub chunk: Chunk,
    /// Cosine similarity (-1.0 to 1.0, higher is more similar)
    pub score: f32,
}

impl SearchHit {
    /// First `max_chars` characters of the chunk with whitespace collapsed,
    /// ending in `...` when cut short
    pub fn snippet(&self, max_chars: usize) -> String {
        let collapsed = self.chunk.text.split_whitespace().collect::<Vec<_>>().join(" ");
        match collapsed.char_indices().nth(max_chars) {
            Some((cut, _)) => format!("{}...", collapsed[..cut].trim_end()),
            None => collapsed,
        }
    }
}

/// Result of one completed conversational query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// Full generated answer text
    pub text: String,
    /// Chunks used as grounding context, most similar first
    pub sources: Vec<SearchHit>,
}

impl Answer {
    /// Source chunks in retrieval order
    pub fn source_chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.sources.iter().map(|hit| &hit.chunk)
    }

    /// Citation labels for display, e.g. `sales.xlsx, Sheet: Q1, Row 7`
    pub fn source_labels(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|hit| hit.chunk.metadata.format_citation())
            .collect()
    }
}
