//! Core types for the pipeline

pub mod conversation;
pub mod document;
pub mod response;

pub use conversation::{ChatMessage, ConversationHistory, Role};
pub use document::{Chunk, Document, DocumentMetadata, FileType};
pub use response::{Answer, SearchHit};
