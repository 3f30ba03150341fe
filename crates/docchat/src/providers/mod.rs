//! Provider abstractions for the two external services: embeddings and the chat LLM
//!
//! Both are trait objects so the pipeline can run against Ollama in production
//! and deterministic fakes in tests.

pub mod embedding;
pub mod llm;
pub mod ollama;

pub use embedding::EmbeddingProvider;
pub use llm::{LlmProvider, TokenStream};
pub use ollama::{OllamaEmbedder, OllamaLlm, OllamaProvider};
