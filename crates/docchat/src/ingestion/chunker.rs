//! Recursive text chunking with exact, character-level overlap
//!
//! Each chunk is a window `[start, end)` over the document's characters. The
//! end of a window is the last paragraph break that fits, else the last line
//! break, sentence boundary, or word boundary, else the hard size limit. The
//! next window starts exactly `overlap` characters before the previous end, so
//! dropping the first `overlap` characters of every chunk after the first
//! reconstructs the document.

use unicode_segmentation::UnicodeSegmentation;

use crate::error::{Error, Result};
use crate::types::{Chunk, Document};

/// Text chunker with configurable size and overlap (both in characters)
#[derive(Debug, Clone)]
pub struct TextChunker {
    /// Maximum chunk size in characters
    chunk_size: usize,
    /// Characters shared by consecutive chunks
    overlap: usize,
}

impl TextChunker {
    /// Create a new chunker; `overlap` must be smaller than `chunk_size`
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::config("chunk_size must be greater than 0"));
        }
        if overlap >= chunk_size {
            return Err(Error::config(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split every document, preserving document order
    pub fn split(&self, documents: &[Document]) -> Vec<Chunk> {
        let chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|doc| self.chunk_document(doc))
            .collect();

        tracing::debug!(
            "Split {} documents into {} chunks (size {}, overlap {})",
            documents.len(),
            chunks.len(),
            self.chunk_size,
            self.overlap
        );

        chunks
    }

    /// Chunk a single document; blank documents produce no chunks
    pub fn chunk_document(&self, doc: &Document) -> Vec<Chunk> {
        if doc.text.trim().is_empty() {
            return Vec::new();
        }

        let text = doc.text.as_str();
        // byte offset of every char, plus the end of the text
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total = offsets.len() - 1;
        let breaks = BreakPoints::new(text);

        let mut chunks = Vec::new();
        let mut start = 0usize;

        loop {
            let limit = start + self.chunk_size;
            let end = if limit >= total {
                total
            } else {
                breaks.last_within(start + self.overlap + 1, limit)
            };

            chunks.push(Chunk {
                text: text[offsets[start]..offsets[end]].to_string(),
                metadata: doc.metadata.clone(),
                sequence_index: chunks.len() as u32,
                char_start: start,
                char_end: end,
            });

            if end == total {
                break;
            }
            start = end - self.overlap;
        }

        chunks
    }
}

/// Candidate chunk end positions (char indices), coarsest level first
struct BreakPoints {
    levels: [Vec<usize>; 4],
}

impl BreakPoints {
    fn new(text: &str) -> Self {
        let chars: Vec<char> = text.chars().collect();

        let mut paragraphs = Vec::new();
        let mut lines = Vec::new();
        let mut words = Vec::new();
        for (i, c) in chars.iter().enumerate() {
            let after = i + 1;
            if *c == '\n' {
                lines.push(after);
                if i > 0 && chars[i - 1] == '\n' {
                    paragraphs.push(after);
                }
            }
            if c.is_whitespace() {
                words.push(after);
            }
        }

        let mut sentences = Vec::new();
        let mut pos = 0usize;
        for sentence in text.split_sentence_bounds() {
            pos += sentence.chars().count();
            sentences.push(pos);
        }

        Self {
            levels: [paragraphs, lines, sentences, words],
        }
    }

    /// Last break in `[lo, hi]` at the coarsest level that has one, else `hi`
    fn last_within(&self, lo: usize, hi: usize) -> usize {
        for level in &self.levels {
            let idx = level.partition_point(|&p| p <= hi);
            if idx > 0 && level[idx - 1] >= lo {
                return level[idx - 1];
            }
        }
        hi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentMetadata;
    use proptest::prelude::*;

    fn doc(text: &str) -> Document {
        Document::new(text, DocumentMetadata::file("doc.txt"))
    }

    fn reconstruct(chunks: &[Chunk], overlap: usize) -> String {
        let mut out = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let skip = if i == 0 { 0 } else { overlap };
            out.extend(chunk.text.chars().skip(skip));
        }
        out
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_size() {
        assert!(TextChunker::new(100, 100).is_err());
        assert!(TextChunker::new(0, 0).is_err());
        assert!(TextChunker::new(100, 99).is_ok());
    }

    #[test]
    fn test_short_document_is_single_chunk() {
        let chunker = TextChunker::new(100, 20).unwrap();
        let chunks = chunker.chunk_document(&doc("Only one short paragraph."));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Only one short paragraph.");
        assert_eq!(chunks[0].sequence_index, 0);
    }

    #[test]
    fn test_blank_document_has_no_chunks() {
        let chunker = TextChunker::new(100, 20).unwrap();
        assert!(chunker.chunk_document(&doc("")).is_empty());
        assert!(chunker.chunk_document(&doc(" \n\n\t")).is_empty());
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let first = "Warehouse A ships on Mondays. Returns go to dock 4.";
        let second = "Warehouse B ships on Fridays. It has no returns dock.";
        let text = format!("{}\n\n{}", first, second);
        let chunker = TextChunker::new(70, 10).unwrap();

        let chunks = chunker.chunk_document(&doc(&text));
        assert_eq!(chunks[0].text, format!("{}\n\n", first));
    }

    #[test]
    fn test_prefers_sentence_over_word_boundary() {
        let text = "Alpha beta gamma. Delta epsilon zeta eta theta iota kappa lambda.";
        let chunker = TextChunker::new(40, 5).unwrap();

        let chunks = chunker.chunk_document(&doc(text));
        assert_eq!(chunks[0].text, "Alpha beta gamma. ");
    }

    #[test]
    fn test_hard_split_without_boundaries() {
        let text = "x".repeat(25);
        let chunker = TextChunker::new(10, 3).unwrap();
        let chunks = chunker.chunk_document(&doc(&text));

        let lens: Vec<usize> = chunks.iter().map(|c| c.text.len()).collect();
        assert_eq!(lens, vec![10, 10, 10, 4]);
        assert_eq!(reconstruct(&chunks, 3), text);
    }

    #[test]
    fn test_multibyte_text_counts_chars() {
        let text = "Preço é ótimo. ".repeat(10);
        let chunker = TextChunker::new(20, 4).unwrap();
        let chunks = chunker.chunk_document(&doc(&text));

        assert!(chunks.iter().all(|c| c.text.chars().count() <= 20));
        assert_eq!(reconstruct(&chunks, 4), text);
    }

    #[test]
    fn test_sequence_index_restarts_per_document() {
        let chunker = TextChunker::new(12, 2).unwrap();
        let a = Document::new("one two three four five", DocumentMetadata::file("a.txt"));
        let b = Document::new(
            "six seven eight",
            DocumentMetadata::row("b.xlsx", "S", 3),
        );

        let chunks = chunker.split(&[a, b]);
        let a_chunks: Vec<_> = chunks.iter().filter(|c| c.metadata.source.ends_with("a.txt")).collect();
        let b_chunks: Vec<_> = chunks.iter().filter(|c| c.metadata.sheet.is_some()).collect();

        assert!(a_chunks.len() > 1);
        assert!(a_chunks.iter().enumerate().all(|(i, c)| c.sequence_index == i as u32));
        assert_eq!(b_chunks[0].sequence_index, 0);
        assert_eq!(b_chunks[0].metadata, DocumentMetadata::row("b.xlsx", "S", 3));
    }

    #[test]
    fn test_deterministic() {
        let text = "Some sentence here. Another one follows.\n\nNew paragraph with words. ".repeat(20);
        let chunker = TextChunker::new(90, 30).unwrap();
        assert_eq!(
            chunker.chunk_document(&doc(&text)),
            chunker.chunk_document(&doc(&text))
        );
    }

    proptest! {
        #[test]
        fn prop_chunks_cover_text_with_exact_overlap(
            text in "[a-zA-Zçé0-9 .,!?\n]{1,600}",
            (size, overlap) in (1usize..120).prop_flat_map(|s| (Just(s), 0..s)),
        ) {
            prop_assume!(!text.trim().is_empty());
            let chunker = TextChunker::new(size, overlap).unwrap();
            let chunks = chunker.chunk_document(&doc(&text));

            prop_assert_eq!(reconstruct(&chunks, overlap), text.clone());

            for chunk in &chunks {
                prop_assert!(chunk.text.chars().count() <= size);
                prop_assert_eq!(chunk.text.chars().count(), chunk.char_len());
            }

            for pair in chunks.windows(2) {
                let prev: Vec<char> = pair[0].text.chars().collect();
                let next: Vec<char> = pair[1].text.chars().collect();
                prop_assert_eq!(pair[1].char_start, pair[0].char_end - overlap);
                prop_assert_eq!(&prev[prev.len() - overlap..], &next[..overlap]);
            }
        }
    }
}
