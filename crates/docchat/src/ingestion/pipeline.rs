//! Build phase: folder scan, extraction, chunking, index build and save

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::providers::EmbeddingProvider;
use crate::retrieval::VectorIndex;
use crate::types::{Document, FileType};

use super::chunker::TextChunker;
use super::parser::FileParser;

/// A file that could not be extracted; the batch continues without it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Progress notification emitted once per file, in file order
#[derive(Debug, Clone)]
pub struct IngestProgress<'a> {
    /// Files finished so far, including this one
    pub processed: usize,
    pub total: usize,
    pub path: &'a Path,
    /// Documents extracted from this file
    pub documents: usize,
    /// Extraction error for this file, if any
    pub error: Option<&'a str>,
}

/// Output of [`IngestPipeline::load_folder`]
#[derive(Debug, Default)]
pub struct LoadReport {
    pub files_seen: usize,
    pub unsupported_skipped: usize,
    pub documents: Vec<Document>,
    pub failures: Vec<ExtractionFailure>,
}

/// Summary of a completed build
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub files_seen: usize,
    pub documents: usize,
    pub chunks: usize,
    pub unsupported_skipped: usize,
    pub failures: Vec<ExtractionFailure>,
    pub location: PathBuf,
}

/// Main ingestion pipeline
pub struct IngestPipeline {
    /// Text chunker
    chunker: TextChunker,
    /// Files extracted concurrently
    parallel_files: usize,
}

impl IngestPipeline {
    /// Create a new ingestion pipeline
    pub fn new(chunker: TextChunker, parallel_files: usize) -> Self {
        Self {
            chunker,
            parallel_files: parallel_files.max(1),
        }
    }

    /// Pipeline configured from the `chunking` and `processing` sections
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        let chunker = TextChunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;
        Ok(Self::new(chunker, config.processing.worker_count()))
    }

    pub fn chunker(&self) -> &TextChunker {
        &self.chunker
    }

    /// All regular files under `dir`, recursively, sorted by path
    pub fn discover_files(dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(Error::config(format!(
                "Source folder {} does not exist or is not a directory",
                dir.display()
            )));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable entry: {}", e),
            }
        }
        Ok(files)
    }

    /// Extract every file under `dir` into documents
    ///
    /// Per-file failures are recorded and never abort the batch. Files are
    /// extracted on blocking worker threads, at most `parallel_files` at once,
    /// and reported in path order.
    pub async fn load_folder<F>(&self, dir: &Path, mut progress: F) -> Result<LoadReport>
    where
        F: FnMut(&IngestProgress<'_>),
    {
        let files = Self::discover_files(dir)?;
        let total = files.len();
        tracing::info!(
            "Ingesting {} files from {} ({} workers)",
            total,
            dir.display(),
            self.parallel_files
        );

        let mut report = LoadReport {
            files_seen: total,
            ..LoadReport::default()
        };

        let mut extracted = stream::iter(files)
            .map(|path| async move {
                let worker_path = path.clone();
                let result = tokio::task::spawn_blocking(move || FileParser::extract(&worker_path))
                    .await
                    .unwrap_or_else(|e| Err(Error::extraction(&path, format!("extraction task failed: {}", e))));
                (path, result)
            })
            .buffered(self.parallel_files);

        let mut processed = 0;
        while let Some((path, result)) = extracted.next().await {
            processed += 1;

            match result {
                Ok(documents) => {
                    if !FileType::from_path(&path).is_supported() {
                        report.unsupported_skipped += 1;
                    }
                    progress(&IngestProgress {
                        processed,
                        total,
                        path: &path,
                        documents: documents.len(),
                        error: None,
                    });
                    report.documents.extend(documents);
                }
                Err(e) => {
                    let message = match e {
                        Error::Extraction { message, .. } => message,
                        other => other.to_string(),
                    };
                    tracing::warn!("Failed to extract {}: {}", path.display(), message);
                    progress(&IngestProgress {
                        processed,
                        total,
                        path: &path,
                        documents: 0,
                        error: Some(&message),
                    });
                    report.failures.push(ExtractionFailure { path, message });
                }
            }
        }

        tracing::info!(
            "Extracted {} documents from {} files ({} failed, {} unsupported)",
            report.documents.len(),
            report.files_seen,
            report.failures.len(),
            report.unsupported_skipped
        );

        Ok(report)
    }

    /// Full build: extract, chunk, embed, and persist the index to `location`
    ///
    /// Returns [`Error::EmptyBatch`] without touching `location` when no
    /// document could be extracted.
    pub async fn build<F>(
        &self,
        source_dir: &Path,
        embedder: &dyn EmbeddingProvider,
        location: &Path,
        progress: F,
    ) -> Result<BuildReport>
    where
        F: FnMut(&IngestProgress<'_>),
    {
        let loaded = self.load_folder(source_dir, progress).await?;

        if loaded.documents.is_empty() {
            tracing::error!(
                "No documents extracted from {} files; index not written",
                loaded.files_seen
            );
            return Err(Error::EmptyBatch {
                files_seen: loaded.files_seen,
            });
        }

        let chunks = self.chunker.split(&loaded.documents);
        let chunk_count = chunks.len();

        let index = VectorIndex::build(chunks, embedder).await?;
        index.save(location).map_err(|e| {
            Error::index_unavailable(format!("cannot write index to {}: {}", location.display(), e))
        })?;

        Ok(BuildReport {
            files_seen: loaded.files_seen,
            documents: loaded.documents.len(),
            chunks: chunk_count,
            unsupported_skipped: loaded.unsupported_skipped,
            failures: loaded.failures,
            location: location.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::HashEmbedder;
    use std::fs;
    use tempfile::tempdir;

    fn pipeline() -> IngestPipeline {
        IngestPipeline::new(TextChunker::new(200, 20).unwrap(), 3)
    }

    fn write(dir: &Path, name: &str, data: &[u8]) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, data).unwrap();
    }

    #[tokio::test]
    async fn test_one_bad_file_does_not_abort_batch() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", b"Returns are handled at dock 4.");
        write(dir.path(), "b.txt", b"Invoices are due in 30 days.");
        write(dir.path(), "nested/c.txt", b"The warehouse opens at 6am.");
        write(dir.path(), "broken.txt", &[0x66, 0x6f, 0xff, 0xfe, 0x6f]);
        write(dir.path(), "photo.jpg", &[0xff, 0xd8, 0xff]);

        let mut seen = Vec::new();
        let report = pipeline()
            .load_folder(dir.path(), |p| seen.push((p.processed, p.error.is_some())))
            .await
            .unwrap();

        assert_eq!(report.files_seen, 5);
        assert_eq!(report.documents.len(), 3);
        assert_eq!(report.unsupported_skipped, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("broken.txt"));

        assert_eq!(seen.len(), 5);
        assert_eq!(
            seen.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        assert_eq!(seen.iter().filter(|(_, failed)| *failed).count(), 1);
    }

    #[tokio::test]
    async fn test_documents_follow_path_order() {
        let dir = tempdir().unwrap();
        write(dir.path(), "b.txt", b"second");
        write(dir.path(), "a.txt", b"first");
        write(dir.path(), "c.txt", b"third");

        let report = pipeline().load_folder(dir.path(), |_| {}).await.unwrap();
        let texts: Vec<&str> = report.documents.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_missing_folder_is_config_error() {
        let dir = tempdir().unwrap();
        let result = pipeline().load_folder(&dir.path().join("absent"), |_| {}).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_all_failures_is_empty_batch() {
        let dir = tempdir().unwrap();
        write(dir.path(), "broken.txt", &[0xff, 0xfe, 0xfd]);
        write(dir.path(), "blank.txt", b"   \n");
        let location = dir.path().join("kb");
        let embedder = HashEmbedder::new("hash-model", 16);

        let err = pipeline()
            .build(dir.path(), &embedder, &location, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, Error::EmptyBatch { files_seen: 2 }));
        assert!(!location.exists());
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_folder_is_empty_batch() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("docs");
        fs::create_dir(&source).unwrap();
        let embedder = HashEmbedder::new("hash-model", 16);

        let err = pipeline()
            .build(&source, &embedder, &dir.path().join("kb"), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyBatch { files_seen: 0 }));
    }

    #[tokio::test]
    async fn test_build_persists_loadable_index() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("docs");
        write(&source, "ops.txt", b"Returns are handled at dock 4.\n\nTrucks leave at 6am.");
        write(&source, "bad.docx", b"not a zip");
        let location = dir.path().join("kb");
        let embedder = HashEmbedder::new("hash-model", 64);

        let report = pipeline()
            .build(&source, &embedder, &location, |_| {})
            .await
            .unwrap();

        assert_eq!(report.documents, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.chunks >= 1);

        let index = VectorIndex::load(&location).unwrap();
        assert_eq!(index.len(), report.chunks);
        assert_eq!(index.embedding_model(), "hash-model");
    }

    #[tokio::test]
    async fn test_embedding_outage_fails_build() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("docs");
        write(&source, "ops.txt", b"Returns are handled at dock 4.");
        let location = dir.path().join("kb");

        let err = pipeline()
            .build(&source, &HashEmbedder::failing("hash-model", 8), &location, |_| {})
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(!location.join("manifest.json").exists());
    }

    #[tokio::test]
    async fn test_unwritable_location_is_fatal() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("docs");
        write(&source, "ops.txt", b"Returns are handled at dock 4.");
        // a regular file where the index directory should go
        let location = dir.path().join("kb");
        fs::write(&location, b"occupied").unwrap();

        let err = pipeline()
            .build(&source, &HashEmbedder::new("hash-model", 16), &location, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, Error::IndexUnavailable(_)));
        assert!(err.is_fatal());
    }
}
