//! Deterministic in-process fakes of the provider traits

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::providers::{EmbeddingProvider, LlmProvider, TokenStream};
use crate::types::ChatMessage;

/// Bag-of-words embedder: each lowercase word adds 1.0 to a hashed bucket
pub struct HashEmbedder {
    model: String,
    dimensions: usize,
    fail: bool,
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(model: &str, dimensions: usize) -> Self {
        Self {
            model: model.to_string(),
            dimensions,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(model: &str, dimensions: usize) -> Self {
        Self {
            fail: true,
            ..Self::new(model, dimensions)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf29ce484222325u64, |hash, b| {
        (hash ^ b as u64).wrapping_mul(0x100000001b3)
    })
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::embedding("connection refused"));
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = (fnv1a(&word.to_lowercase()) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.fail)
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// How a [`ScriptedLlm`] behaves on each call
#[derive(Clone)]
pub enum Script {
    /// Yield these tokens, then end normally
    Tokens(Vec<&'static str>),
    /// Yield these tokens, then fail mid-stream
    FailAfter(Vec<&'static str>),
    /// Fail before any token (service unreachable)
    Unreachable,
}

/// LLM that replays a script and records every prompt it receives
pub struct ScriptedLlm {
    script: Mutex<Script>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    pub fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Change behavior for subsequent calls
    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    /// Every message list passed to `chat_stream`, in call order
    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        let script = self.script.lock().unwrap().clone();

        let items: Vec<Result<String>> = match script {
            Script::Tokens(tokens) => tokens.into_iter().map(|t| Ok(t.to_string())).collect(),
            Script::FailAfter(tokens) => tokens
                .into_iter()
                .map(|t| Ok(t.to_string()))
                .chain(std::iter::once(Err(Error::generation("connection reset"))))
                .collect(),
            Script::Unreachable => return Err(Error::generation("connection refused")),
        };

        Ok(stream::iter(items).boxed())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }
}
