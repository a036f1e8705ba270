//! Model provider abstractions
//!
//! Provides one capability interface per role — `Chat`, `Embedder`,
//! `Reranker` — plus a registry that resolves a configured model ID to a
//! concrete implementation. Vendor adapters are interchangeable
//! implementations of these narrow traits, never a subclass hierarchy.

mod mock;
mod openai;
mod rerank;

pub use mock::{MockChat, MockEmbedder, MockReranker};
pub use openai::{OpenAIChat, OpenAIEmbedder};
pub use rerank::HttpReranker;

use crate::errors::{PipelineError, Result};
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

/// One message in a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// Generation parameters passed through to the chat model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub seed: Option<u64>,
    pub max_tokens: Option<u32>,
    pub max_completion_tokens: Option<u32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    /// Whether the model may emit thinking content (stripped before
    /// delivery by the stream filter)
    pub thinking: Option<bool>,
}

/// Token usage counters returned by a completed generation
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete (non-streaming) chat response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// One delta from a streaming generation
#[derive(Debug, Clone, PartialEq)]
pub enum ChatStreamChunk {
    /// Answer text delta
    Content { delta: String },
    /// Tool invocation requested by the model
    ToolCall { name: String, arguments: String },
    /// Generation finished; usage counters when the provider reports them
    Done { usage: Option<TokenUsage> },
}

/// Ordered token-delta feed from a streaming generation. `Sync` so the
/// feed can sit on a shared execution context between stages.
pub type ChatDeltaStream =
    Pin<Box<dyn Stream<Item = Result<ChatStreamChunk>> + Send + Sync + 'static>>;

/// Trait for chat completion providers
#[async_trait]
pub trait Chat: Send + Sync {
    /// Block until the model returns a complete answer
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<ChatResponse>;

    /// Open a token-delta feed; the stream ends with `Done`
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatDeltaStream>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync + std::fmt::Debug {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// One candidate score produced by a reranker, index into the input list
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RerankScore {
    pub index: usize,
    pub score: f32,
}

/// Trait for second-pass relevance scoring
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score each document against the query; order of the returned list
    /// is unspecified, callers sort by score.
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankScore>>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Registry resolving configured model IDs to provider implementations.
///
/// Built once at composition time and read-only afterward; safe to share
/// across concurrent requests.
#[derive(Default)]
pub struct ProviderRegistry {
    chat: HashMap<String, Arc<dyn Chat>>,
    embedders: HashMap<String, Arc<dyn Embedder>>,
    rerankers: HashMap<String, Arc<dyn Reranker>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_chat(&mut self, model_id: impl Into<String>, provider: Arc<dyn Chat>) {
        self.chat.insert(model_id.into(), provider);
    }

    pub fn register_embedder(&mut self, model_id: impl Into<String>, provider: Arc<dyn Embedder>) {
        self.embedders.insert(model_id.into(), provider);
    }

    pub fn register_reranker(&mut self, model_id: impl Into<String>, provider: Arc<dyn Reranker>) {
        self.rerankers.insert(model_id.into(), provider);
    }

    pub fn chat(&self, model_id: &str) -> Result<Arc<dyn Chat>> {
        self.chat.get(model_id).cloned().ok_or_else(|| {
            PipelineError::configuration(format!("unknown chat model: {model_id}"))
        })
    }

    pub fn embedder(&self, model_id: &str) -> Result<Arc<dyn Embedder>> {
        self.embedders.get(model_id).cloned().ok_or_else(|| {
            PipelineError::configuration(format!("unknown embedding model: {model_id}"))
        })
    }

    pub fn reranker(&self, model_id: &str) -> Result<Arc<dyn Reranker>> {
        self.rerankers.get(model_id).cloned().ok_or_else(|| {
            PipelineError::configuration(format!("unknown rerank model: {model_id}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolution() {
        let mut registry = ProviderRegistry::new();
        registry.register_embedder("emb-1", Arc::new(MockEmbedder::new(8)));

        assert!(registry.embedder("emb-1").is_ok());
        let err = registry.embedder("missing").unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::ConfigurationError);
    }

    #[test]
    fn test_message_constructors() {
        let msg = ChatMessage::assistant("hi");
        assert_eq!(msg.role, "assistant");
        assert_eq!(msg.content, "hi");
    }
}
