//! Prompt templates for grounded conversational answers

use crate::types::{ChatMessage, ConversationHistory, SearchHit};

/// Placed in the context slot when retrieval returned nothing
pub const EMPTY_CONTEXT: &str = "(no relevant passages were found in the knowledge base)";

/// Prompt builder for RAG queries
pub struct PromptBuilder;

impl PromptBuilder {
    /// Build context from search results, numbered in retrieval order
    pub fn build_context(hits: &[SearchHit]) -> String {
        if hits.is_empty() {
            return EMPTY_CONTEXT.to_string();
        }

        let mut context = String::new();
        for (i, hit) in hits.iter().enumerate() {
            context.push_str(&format!(
                "[{}] {}\n\nContent:\n{}\n\n---\n\n",
                i + 1,
                hit.chunk.metadata.format_citation(),
                hit.chunk.text
            ));
        }

        context
    }

    /// System message carrying the grounding rules and the retrieved context
    pub fn build_system_prompt(context: &str) -> String {
        format!(
            r#"You are an assistant that answers questions about the user's documents.

RULES:
1. Answer using the CONTEXT below and the earlier conversation
2. When a fact comes from the context, cite it with its number, e.g. [2]
3. If the context does not contain the answer, say that the documents do not cover it
4. Do not invent file names, numbers, or quotes
5. Answer in the same language as the question

CONTEXT FROM DOCUMENTS:
{context}"#,
            context = context
        )
    }

    /// Full message list: system prompt with context, prior turns, then the new question
    pub fn build_messages(
        hits: &[SearchHit],
        history: &ConversationHistory,
        question: &str,
    ) -> Vec<ChatMessage> {
        let context = Self::build_context(hits);

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(Self::build_system_prompt(&context)));
        messages.extend(history.turns().iter().cloned());
        messages.push(ChatMessage::user(question));
        messages
    }

    /// User request asking for a summary and key points of one attached file
    pub fn build_file_analysis_request(file_name: &str, text: &str) -> String {
        format!(
            r#"Analyze the following text from the file '{file_name}' and give me a concise summary, followed by its most important points as a bullet-point list.

Text to analyze:
---
{text}
---"#,
            file_name = file_name,
            text = text.trim()
        )
    }

    /// Prior turns followed by a file analysis request
    ///
    /// No retrieved context is attached; the file text is the whole grounding.
    pub fn build_file_analysis_messages(
        history: &ConversationHistory,
        request: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.extend(history.turns().iter().cloned());
        messages.push(ChatMessage::user(request));
        messages
    }
}
