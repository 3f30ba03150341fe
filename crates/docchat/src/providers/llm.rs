//! LLM provider trait for streaming chat completions

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::types::ChatMessage;

/// Lazy, finite, non-restartable sequence of generated text tokens
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Trait for chat-style answer generation
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Start generating a reply to `messages`
    ///
    /// Connection failures are returned directly; failures after the first
    /// token arrive as an `Err` item and end the stream.
    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<TokenStream>;

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;
}
