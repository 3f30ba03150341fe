//! Chat messages and conversation history

use serde::{Deserialize, Serialize};

/// Speaker of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions and grounding context; never stored in history
    System,
    User,
    Assistant,
}

/// One message sent to the language model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered log of user/assistant turns for one chat session
///
/// Turns are only ever added as complete question/answer pairs, so a failed
/// or abandoned query leaves the history exactly as it was.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: Vec<ChatMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// All turns, oldest first
    pub fn turns(&self) -> &[ChatMessage] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Append a completed exchange (user question followed by assistant answer)
    pub(crate) fn push_exchange(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.turns.push(ChatMessage::user(question));
        self.turns.push(ChatMessage::assistant(answer));
    }

    /// Forget every turn
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
