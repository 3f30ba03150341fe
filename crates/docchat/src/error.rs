//! Error types for the document chat pipeline

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
///
/// Per-file (`Extraction`) and per-query (`Embedding`, `Generation`) errors are
/// contained at their boundary. `IndexUnavailable` is the only error that blocks
/// every later query; see [`Error::is_fatal`].
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A single file could not be extracted
    #[error("Failed to extract '{}': {message}", path.display())]
    Extraction { path: PathBuf, message: String },

    /// The vector index is missing, corrupt, or could not be built
    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// Query-time embedding failure
    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    /// Language model unreachable or produced a malformed stream
    #[error("Generation failed: {0}")]
    Generation(String),

    /// No documents could be extracted from the source folder
    #[error("No documents extracted from {files_seen} file(s); index not written")]
    EmptyBatch { files_seen: usize },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an extraction error for a file
    pub fn extraction(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Extraction {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an index-unavailable error
    pub fn index_unavailable(message: impl Into<String>) -> Self {
        Self::IndexUnavailable(message.into())
    }

    /// Create an embedding error
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    /// Create a generation error
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error halts the whole pipeline rather than one file or one query
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::IndexUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_index_unavailable_is_fatal() {
        assert!(Error::index_unavailable("missing").is_fatal());
        assert!(!Error::generation("timeout").is_fatal());
        assert!(!Error::extraction("a.pdf", "bad xref").is_fatal());
        assert!(!Error::EmptyBatch { files_seen: 3 }.is_fatal());
    }

    #[test]
    fn test_extraction_message_names_file() {
        let err = Error::extraction("docs/report.docx", "not a zip archive");
        assert_eq!(
            err.to_string(),
            "Failed to extract 'docs/report.docx': not a zip archive"
        );
    }
}
