//! docchat: conversational question answering over a folder of documents
//!
//! Two phases share one crate:
//! - **Build**: [`IngestPipeline`] extracts text from PDF, DOCX, TXT, EML,
//!   PPTX, XLSX and XLS files, chunks it, embeds every chunk and persists a
//!   [`VectorIndex`].
//! - **Query**: a [`Conversation`] embeds each question, retrieves the closest
//!   chunks and streams a grounded answer from the language model, keeping a
//!   multi-turn history.
//!
//! Both external services (embeddings and chat) sit behind the traits in
//! [`providers`]; [`providers::ollama`] talks to a local Ollama server.

pub mod chat;
pub mod config;
pub mod error;
pub mod generation;
pub mod ingestion;
pub mod providers;
pub mod retrieval;
pub mod types;

#[cfg(test)]
mod test_support;

pub use chat::{AnswerStream, Conversation, RagContext, TurnPhase};
pub use config::RagConfig;
pub use error::{Error, Result};
pub use ingestion::{BuildReport, IngestPipeline, IngestProgress};
pub use retrieval::VectorIndex;
pub use types::{Answer, Chunk, Document, DocumentMetadata, FileType, SearchHit};
