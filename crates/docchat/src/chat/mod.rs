//! Query phase: shared context and per-session conversations

mod context;
mod conversation;

pub use context::RagContext;
pub use conversation::{AnswerStream, Conversation, TurnPhase};
