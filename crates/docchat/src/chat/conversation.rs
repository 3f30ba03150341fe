//! Conversation orchestrator: retrieve, prompt, stream, commit
//!
//! A turn moves `Idle -> Retrieving -> Generating -> Idle`. History is only
//! touched when the token stream completes, so a failed or abandoned turn
//! leaves it exactly as it was.

use futures::stream::Stream;
use futures::StreamExt;
use std::path::Path;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use crate::error::{Error, Result};
use crate::generation::PromptBuilder;
use crate::ingestion::FileParser;
use crate::providers::TokenStream;
use crate::types::{Answer, ChatMessage, ConversationHistory, SearchHit};

use super::context::RagContext;

/// Where a conversation is within its current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// Ready for a question
    Idle,
    /// Embedding the question and searching the index, or reading an attached file
    Retrieving,
    /// Streaming the answer
    Generating,
    /// The last turn failed; history is unchanged and a new question may be asked
    Failed,
}

/// One chat session: a query context plus its own history
pub struct Conversation {
    context: RagContext,
    history: ConversationHistory,
    phase: TurnPhase,
}

impl Conversation {
    pub fn new(context: RagContext) -> Self {
        Self::with_history(context, ConversationHistory::new())
    }

    /// Resume a session from an existing history
    pub fn with_history(context: RagContext, history: ConversationHistory) -> Self {
        Self {
            context,
            history,
            phase: TurnPhase::Idle,
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn context(&self) -> &RagContext {
        &self.context
    }

    /// Forget all prior turns
    pub fn reset(&mut self) {
        self.history.clear();
        self.phase = TurnPhase::Idle;
        tracing::info!("Conversation history cleared");
    }

    /// Start answering `question`, returning a stream of answer tokens
    ///
    /// The exclusive borrow keeps a second question from starting while this
    /// one is in flight. Drain the stream (or call [`AnswerStream::finish`])
    /// to commit the turn to history.
    pub async fn ask_stream(&mut self, question: &str) -> Result<AnswerStream<'_>> {
        tracing::info!("Query: {}", question);

        self.phase = TurnPhase::Retrieving;
        let sources = match self.context.retrieve(question).await {
            Ok(hits) => hits,
            Err(e) => return Err(self.fail(e)),
        };

        let messages = PromptBuilder::build_messages(&sources, &self.history, question);
        self.generate(question.to_string(), sources, messages).await
    }

    /// Stream a concise summary and key points of the file at `path`
    ///
    /// The file goes through the same normalizer as ingestion but is not
    /// indexed. On completion the analysis request and the answer join the
    /// history like any other turn, so follow-up questions can refer to it.
    pub async fn analyze_file(&mut self, path: &Path) -> Result<AnswerStream<'_>> {
        tracing::info!("Analyzing file: {}", path.display());

        self.phase = TurnPhase::Retrieving;
        let worker_path = path.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || FileParser::extract(&worker_path))
            .await
            .unwrap_or_else(|e| Err(Error::extraction(path, format!("extraction task failed: {}", e))));
        let documents = match extracted {
            Ok(documents) if documents.is_empty() => {
                return Err(self.fail(Error::extraction(
                    path,
                    "unsupported file type or no extractable text",
                )))
            }
            Ok(documents) => documents,
            Err(e) => return Err(self.fail(e)),
        };

        let text = documents
            .iter()
            .map(|d| d.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        tracing::debug!("Extracted {} chars from {}", text.len(), file_name);

        let request = PromptBuilder::build_file_analysis_request(&file_name, &text);
        let messages = PromptBuilder::build_file_analysis_messages(&self.history, &request);
        self.generate(request, Vec::new(), messages).await
    }

    async fn generate(
        &mut self,
        question: String,
        sources: Vec<SearchHit>,
        messages: Vec<ChatMessage>,
    ) -> Result<AnswerStream<'_>> {
        self.phase = TurnPhase::Generating;
        let tokens = match self.context.llm().chat_stream(&messages).await {
            Ok(tokens) => tokens,
            Err(e) => return Err(self.fail(e)),
        };

        Ok(AnswerStream {
            question,
            sources,
            tokens,
            text: String::new(),
            status: StreamStatus::Streaming,
            conversation: self,
        })
    }

    /// Answer `question` without incremental output
    pub async fn ask(&mut self, question: &str) -> Result<Answer> {
        self.ask_stream(question).await?.finish().await
    }

    fn fail(&mut self, error: Error) -> Error {
        tracing::warn!("Query failed, history unchanged: {}", error);
        self.phase = TurnPhase::Failed;
        error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamStatus {
    Streaming,
    Completed,
    Failed,
}

/// Tokens of one answer as they are generated
///
/// Yields each token once, in order. When the underlying stream ends
/// normally the question and full answer are appended to history; an error
/// item or dropping the stream early leaves history untouched.
pub struct AnswerStream<'a> {
    conversation: &'a mut Conversation,
    question: String,
    sources: Vec<SearchHit>,
    tokens: TokenStream,
    text: String,
    status: StreamStatus,
}

impl AnswerStream<'_> {
    /// Chunks used as grounding context, most similar first
    pub fn sources(&self) -> &[SearchHit] {
        &self.sources
    }

    /// Answer text received so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Consume the remaining tokens and return the completed answer
    pub async fn finish(mut self) -> Result<Answer> {
        while let Some(token) = self.next().await {
            token?;
        }

        match self.status {
            StreamStatus::Completed => Ok(Answer {
                text: std::mem::take(&mut self.text),
                sources: std::mem::take(&mut self.sources),
            }),
            _ => Err(Error::generation("answer stream ended without completing")),
        }
    }

    fn commit(&mut self) {
        self.status = StreamStatus::Completed;
        self.conversation
            .history
            .push_exchange(self.question.as_str(), self.text.as_str());
        self.conversation.phase = TurnPhase::Idle;
        tracing::info!(
            "Answer complete: {} chars, {} sources, {} turns in history",
            self.text.len(),
            self.sources.len(),
            self.conversation.history.len()
        );
    }
}

impl Stream for AnswerStream<'_> {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.status != StreamStatus::Streaming {
            return Poll::Ready(None);
        }

        match ready!(this.tokens.poll_next_unpin(cx)) {
            Some(Ok(token)) => {
                tracing::trace!("token: {:?}", token);
                this.text.push_str(&token);
                Poll::Ready(Some(Ok(token)))
            }
            Some(Err(e)) => {
                this.status = StreamStatus::Failed;
                Poll::Ready(Some(Err(this.conversation.fail(e))))
            }
            None => {
                this.commit();
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for AnswerStream<'_> {
    fn drop(&mut self) {
        if self.status == StreamStatus::Streaming {
            tracing::debug!("Answer stream abandoned; history unchanged");
            self.conversation.phase = TurnPhase::Idle;
        }
    }
}
