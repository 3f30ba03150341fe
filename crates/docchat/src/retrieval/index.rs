//! Flat vector index: exact cosine search over (embedding, chunk) pairs
//!
//! On disk an index is a directory holding `index.bin` (bincode-encoded
//! entries) and `manifest.json`. The manifest is written last and records the
//! payload's SHA-256, so a half-written or tampered payload is detected on load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::providers::EmbeddingProvider;
use crate::types::{Chunk, SearchHit};

const MANIFEST_FILE: &str = "manifest.json";
const PAYLOAD_FILE: &str = "index.bin";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    vector: Vec<f32>,
    chunk: Chunk,
}

/// Metadata stored next to the payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    /// Embedding model the vectors were produced with
    pub embedding_model: String,
    pub dimensions: usize,
    pub entries: usize,
    pub created_at: DateTime<Utc>,
    /// Hex SHA-256 of `index.bin`
    pub payload_sha256: String,
}

/// In-memory vector index; read-only once built or loaded
#[derive(Debug, Clone)]
pub struct VectorIndex {
    embedding_model: String,
    dimensions: usize,
    entries: Vec<IndexEntry>,
    /// L2 norm of each entry's vector, parallel to `entries`
    norms: Vec<f32>,
}

impl VectorIndex {
    /// Create an empty index for vectors from `embedding_model`
    pub fn new(embedding_model: impl Into<String>) -> Self {
        Self {
            embedding_model: embedding_model.into(),
            dimensions: 0,
            entries: Vec::new(),
            norms: Vec::new(),
        }
    }

    /// Embed every chunk and index it, in chunk order
    ///
    /// Identical chunk texts are embedded once. Any embedding failure aborts
    /// the build with [`Error::IndexUnavailable`].
    pub async fn build(chunks: Vec<Chunk>, embedder: &dyn EmbeddingProvider) -> Result<Self> {
        let mut index = Self::new(embedder.model());
        let mut cache: HashMap<String, Vec<f32>> = HashMap::new();
        let total = chunks.len();

        tracing::info!(
            "Building index from {} chunks with {} ({})",
            total,
            embedder.name(),
            embedder.model()
        );

        for (i, chunk) in chunks.into_iter().enumerate() {
            let vector = match cache.get(&chunk.text) {
                Some(vector) => vector.clone(),
                None => {
                    let vector = embedder.embed(&chunk.text).await.map_err(|e| {
                        tracing::error!("Embedding failed while building index: {}", e);
                        Error::index_unavailable(format!("embedding service failed: {}", e))
                    })?;
                    cache.insert(chunk.text.clone(), vector.clone());
                    vector
                }
            };

            index
                .add(chunk, vector)
                .map_err(|e| Error::index_unavailable(e.to_string()))?;

            if (i + 1) % 100 == 0 {
                tracing::debug!("Embedded {}/{} chunks", i + 1, total);
            }
        }

        tracing::info!(
            "Index built: {} entries, {} unique texts, {} dimensions",
            index.len(),
            cache.len(),
            index.dimensions
        );

        Ok(index)
    }

    /// Append one pair; the first vector fixes the index dimension
    pub fn add(&mut self, chunk: Chunk, vector: Vec<f32>) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::embedding("empty embedding vector"));
        }
        if !vector.iter().all(|x| x.is_finite()) {
            return Err(Error::embedding("embedding vector contains NaN or infinite values"));
        }
        if self.entries.is_empty() {
            self.dimensions = vector.len();
        } else if vector.len() != self.dimensions {
            return Err(Error::embedding(format!(
                "vector dimension {} does not match index dimension {}",
                vector.len(),
                self.dimensions
            )));
        }

        self.norms.push(l2_norm(&vector));
        self.entries.push(IndexEntry { vector, chunk });
        Ok(())
    }

    /// Top `k` chunks by descending cosine similarity
    ///
    /// Ties keep insertion order, `k` is clamped to the index size, and an
    /// empty index yields no hits.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimensions {
            return Err(Error::embedding(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimensions
            )));
        }
        if !query.iter().all(|x| x.is_finite()) {
            return Err(Error::embedding("query vector contains NaN or infinite values"));
        }

        let query_norm = l2_norm(query);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(i, (entry, &norm))| (i, cosine(query, query_norm, &entry.vector, norm)))
            .collect();

        // stable sort: equal scores stay in insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k.min(self.entries.len()));

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchHit {
                chunk: self.entries[i].chunk.clone(),
                score,
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding model recorded for this index
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Vector dimension (0 for an empty index)
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Persist to the directory `location`, replacing any previous index there
    pub fn save(&self, location: impl AsRef<Path>) -> Result<()> {
        let location = location.as_ref();
        fs::create_dir_all(location)?;

        let payload = bincode::serde::encode_to_vec(&self.entries, bincode::config::standard())
            .map_err(|e| Error::internal(format!("Failed to encode index: {}", e)))?;

        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            embedding_model: self.embedding_model.clone(),
            dimensions: self.dimensions,
            entries: self.entries.len(),
            created_at: Utc::now(),
            payload_sha256: hex::encode(Sha256::digest(&payload)),
        };

        write_atomic(&location.join(PAYLOAD_FILE), &payload)?;
        write_atomic(
            &location.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?.as_bytes(),
        )?;

        tracing::info!(
            "Saved index ({} entries) to {}",
            self.entries.len(),
            location.display()
        );
        Ok(())
    }

    /// Load an index saved with [`VectorIndex::save`]
    ///
    /// Missing, truncated, or otherwise corrupt data is [`Error::IndexUnavailable`].
    pub fn load(location: impl AsRef<Path>) -> Result<Self> {
        let location = location.as_ref();
        let manifest = Self::read_manifest(location)?;

        let payload = fs::read(location.join(PAYLOAD_FILE)).map_err(|e| {
            Error::index_unavailable(format!("cannot read {}: {}", PAYLOAD_FILE, e))
        })?;

        if hex::encode(Sha256::digest(&payload)) != manifest.payload_sha256 {
            tracing::error!("Index checksum mismatch at {}", location.display());
            return Err(Error::index_unavailable(format!(
                "{} is corrupt (checksum mismatch)",
                PAYLOAD_FILE
            )));
        }

        let (entries, _): (Vec<IndexEntry>, usize) =
            bincode::serde::decode_from_slice(&payload, bincode::config::standard())
                .map_err(|e| Error::index_unavailable(format!("cannot decode index: {}", e)))?;

        if entries.len() != manifest.entries {
            return Err(Error::index_unavailable(format!(
                "manifest lists {} entries but payload has {}",
                manifest.entries,
                entries.len()
            )));
        }

        let mut index = Self::new(manifest.embedding_model);
        for entry in entries {
            index
                .add(entry.chunk, entry.vector)
                .map_err(|e| Error::index_unavailable(format!("corrupt entry: {}", e)))?;
        }
        if !index.is_empty() && index.dimensions != manifest.dimensions {
            return Err(Error::index_unavailable(format!(
                "manifest dimension {} does not match stored vectors ({})",
                manifest.dimensions, index.dimensions
            )));
        }

        tracing::info!(
            "Loaded index from {}: {} entries, model {}",
            location.display(),
            index.len(),
            index.embedding_model
        );
        Ok(index)
    }

    /// Read only the manifest of a saved index
    pub fn read_manifest(location: impl AsRef<Path>) -> Result<IndexManifest> {
        let path = location.as_ref().join(MANIFEST_FILE);
        let raw = fs::read_to_string(&path).map_err(|e| {
            Error::index_unavailable(format!(
                "no index at {} ({}); run ingestion first",
                location.as_ref().display(),
                e
            ))
        })?;

        let manifest: IndexManifest = serde_json::from_str(&raw)
            .map_err(|e| Error::index_unavailable(format!("corrupt manifest: {}", e)))?;

        if manifest.format_version != FORMAT_VERSION {
            return Err(Error::index_unavailable(format!(
                "unsupported index format version {} (expected {})",
                manifest.format_version, FORMAT_VERSION
            )));
        }

        Ok(manifest)
    }
}

/// Write through a temporary sibling file, then rename over the target
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity; zero-norm vectors score 0
fn cosine(a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (a_norm * b_norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::HashEmbedder;
    use crate::types::DocumentMetadata;
    use tempfile::tempdir;

    fn chunk(text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            metadata: DocumentMetadata::file("doc.txt"),
            sequence_index: 0,
            char_start: 0,
            char_end: text.chars().count(),
        }
    }

    fn sample_index() -> VectorIndex {
        let mut index = VectorIndex::new("test-model");
        index.add(chunk("east"), vec![1.0, 0.0, 0.0]).unwrap();
        index.add(chunk("north"), vec![0.0, 1.0, 0.0]).unwrap();
        index.add(chunk("north-east"), vec![1.0, 1.0, 0.0]).unwrap();
        index.add(chunk("up"), vec![0.0, 0.0, 2.0]).unwrap();
        index
    }

    fn texts(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.chunk.text.as_str()).collect()
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let index = sample_index();
        let hits = index.search(&[1.0, 0.2, 0.0], 3).unwrap();

        assert_eq!(texts(&hits), vec!["east", "north-east", "north"]);
        assert!(hits[0].score >= hits[1].score && hits[1].score >= hits[2].score);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut index = VectorIndex::new("test-model");
        index.add(chunk("first"), vec![0.0, 1.0]).unwrap();
        index.add(chunk("second"), vec![0.0, 3.0]).unwrap();
        index.add(chunk("third"), vec![0.0, 0.5]).unwrap();

        let hits = index.search(&[0.0, 1.0], 3).unwrap();
        assert_eq!(texts(&hits), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_k_is_clamped_and_empty_index_is_not_error() {
        let index = sample_index();
        assert_eq!(index.search(&[1.0, 0.0, 0.0], 50).unwrap().len(), 4);
        assert!(index.search(&[1.0, 0.0, 0.0], 0).unwrap().is_empty());

        let empty = VectorIndex::new("test-model");
        assert!(empty.search(&[1.0, 2.0], 4).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = sample_index();
        assert!(matches!(index.search(&[1.0, 0.0], 2), Err(Error::Embedding(_))));
        assert!(index.add(chunk("bad"), vec![1.0]).is_err());
    }

    #[test]
    fn test_non_finite_vectors_are_rejected() {
        let mut index = sample_index();
        assert!(matches!(
            index.add(chunk("nan"), vec![f32::NAN, 0.0, 0.0]),
            Err(Error::Embedding(_))
        ));
        assert!(matches!(
            index.add(chunk("inf"), vec![0.0, f32::INFINITY, 0.0]),
            Err(Error::Embedding(_))
        ));
        assert_eq!(index.len(), 4);

        assert!(matches!(
            index.search(&[f32::NAN, 1.0, 0.0], 2),
            Err(Error::Embedding(_))
        ));
        let hits = index.search(&[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(texts(&hits), vec!["east"]);
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let index = sample_index();
        let hits = index.search(&[0.0, 0.0, 0.0], 4).unwrap();
        assert!(hits.iter().all(|h| h.score == 0.0));
        assert_eq!(texts(&hits), vec!["east", "north", "north-east", "up"]);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let location = dir.path().join("kb");
        let index = sample_index();
        index.save(&location).unwrap();

        let loaded = VectorIndex::load(&location).unwrap();
        assert_eq!(loaded.len(), index.len());
        assert_eq!(loaded.embedding_model(), "test-model");
        assert_eq!(loaded.dimensions(), 3);

        let queries = [[1.0, 0.2, 0.0], [0.0, 0.0, 1.0], [-1.0, 0.5, 0.3]];
        for query in &queries {
            for k in 0..6 {
                assert_eq!(index.search(query, k).unwrap(), loaded.search(query, k).unwrap());
            }
        }

        let manifest = VectorIndex::read_manifest(&location).unwrap();
        assert_eq!(manifest.entries, 4);
        assert!(!location.join("index.tmp").exists());
    }

    #[test]
    fn test_empty_index_round_trip() {
        let dir = tempdir().unwrap();
        VectorIndex::new("m").save(dir.path()).unwrap();

        let loaded = VectorIndex::load(dir.path()).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.embedding_model(), "m");
    }

    #[test]
    fn test_missing_index_is_unavailable() {
        let dir = tempdir().unwrap();
        let err = VectorIndex::load(dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::IndexUnavailable(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_corrupt_payload_is_unavailable() {
        let dir = tempdir().unwrap();
        sample_index().save(dir.path()).unwrap();

        let payload_path = dir.path().join(PAYLOAD_FILE);
        let mut payload = fs::read(&payload_path).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0xFF;
        fs::write(&payload_path, payload).unwrap();

        assert!(matches!(
            VectorIndex::load(dir.path()),
            Err(Error::IndexUnavailable(_))
        ));
    }

    #[test]
    fn test_corrupt_manifest_is_unavailable() {
        let dir = tempdir().unwrap();
        sample_index().save(dir.path()).unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "{ not json").unwrap();

        assert!(matches!(
            VectorIndex::load(dir.path()),
            Err(Error::IndexUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_build_embeds_duplicates_once() {
        let embedder = HashEmbedder::new("hash-model", 32);
        let chunks = vec![chunk("dock four"), chunk("returns desk"), chunk("dock four")];

        let index = VectorIndex::build(chunks, &embedder).await.unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(embedder.calls(), 2);
        assert_eq!(index.embedding_model(), "hash-model");
        assert_eq!(index.dimensions(), 32);
    }

    #[tokio::test]
    async fn test_build_with_failing_embedder_is_unavailable() {
        let embedder = HashEmbedder::failing("hash-model", 8);
        let err = VectorIndex::build(vec![chunk("x")], &embedder).await.unwrap_err();
        assert!(matches!(err, Error::IndexUnavailable(_)));
    }
}
