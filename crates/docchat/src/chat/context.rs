//! Shared, read-only query context: index plus the two services

use std::sync::Arc;

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::providers::{EmbeddingProvider, LlmProvider};
use crate::retrieval::VectorIndex;
use crate::types::SearchHit;

/// Everything a conversation needs to answer queries
///
/// Cheap to clone; clones share the same index and providers, so any number
/// of conversations can query one index concurrently.
#[derive(Clone)]
pub struct RagContext {
    inner: Arc<RagContextInner>,
}

struct RagContextInner {
    index: VectorIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    top_k: usize,
}

impl RagContext {
    /// Assemble a context, checking that `embedder` matches the index's model
    pub fn new(
        index: VectorIndex,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        top_k: usize,
    ) -> Result<Self> {
        if top_k == 0 {
            return Err(Error::config("top_k must be greater than 0"));
        }
        if index.embedding_model() != embedder.model() {
            return Err(Error::config(format!(
                "index was built with embedding model '{}' but the configured model is '{}'; \
                 re-run ingestion or change llm.embed_model",
                index.embedding_model(),
                embedder.model()
            )));
        }

        tracing::info!(
            "Query context ready: {} chunks, embeddings {} ({}), generation {} ({})",
            index.len(),
            embedder.model(),
            embedder.name(),
            llm.model(),
            llm.name()
        );

        Ok(Self {
            inner: Arc::new(RagContextInner {
                index,
                embedder,
                llm,
                top_k,
            }),
        })
    }

    /// Load the persisted index named by `config` and assemble a context
    ///
    /// Fails with [`Error::IndexUnavailable`] when the index cannot be read or
    /// the embedding service does not answer, since no query could succeed.
    pub async fn load(
        config: &RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
    ) -> Result<Self> {
        let index = VectorIndex::load(&config.index.location)?;

        match embedder.health_check().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(Error::index_unavailable(format!(
                    "embedding service {} is not reachable",
                    embedder.name()
                )))
            }
            Err(e) => {
                return Err(Error::index_unavailable(format!(
                    "embedding service {} is not reachable: {}",
                    embedder.name(),
                    e
                )))
            }
        }

        Self::new(index, embedder, llm, config.retrieval.top_k)
    }

    pub fn index(&self) -> &VectorIndex {
        &self.inner.index
    }

    pub fn llm(&self) -> &dyn LlmProvider {
        self.inner.llm.as_ref()
    }

    pub fn top_k(&self) -> usize {
        self.inner.top_k
    }

    /// Embed `question` and return its top-k chunks
    pub async fn retrieve(&self, question: &str) -> Result<Vec<SearchHit>> {
        if self.inner.index.is_empty() {
            tracing::debug!("Index is empty; skipping query embedding");
            return Ok(Vec::new());
        }

        let query_vector = self
            .inner
            .embedder
            .embed(question)
            .await
            .map_err(|e| match e {
                Error::Embedding(_) => e,
                other => Error::embedding(other.to_string()),
            })?;

        let hits = self.inner.index.search(&query_vector, self.inner.top_k)?;
        tracing::debug!("Retrieved {} chunks", hits.len());
        Ok(hits)
    }
}
