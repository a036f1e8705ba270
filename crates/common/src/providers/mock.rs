//! Mock providers for testing and offline development
//!
//! Deterministic where it matters (rerank scoring, scripted chat replies)
//! so pipeline tests can assert on exact outcomes without network access.

use super::{
    Chat, ChatDeltaStream, ChatMessage, ChatOptions, ChatResponse, ChatStreamChunk, Embedder,
    Reranker, RerankScore, TokenUsage,
};
use crate::errors::Result;
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;

/// Chat provider replaying scripted replies.
///
/// Replies are matched by substring against the last user message; the
/// default reply covers everything else. Streaming splits the reply into
/// small deltas so stream-consuming code is exercised realistically.
pub struct MockChat {
    model: String,
    scripted: Vec<(String, String)>,
    default_reply: String,
    /// Deltas emitted verbatim when set, bypassing reply splitting
    scripted_stream: Mutex<Option<Vec<ChatStreamChunk>>>,
}

impl MockChat {
    pub fn new() -> Self {
        Self {
            model: "mock-chat".to_string(),
            scripted: Vec::new(),
            default_reply: "This is a mock reply.".to_string(),
            scripted_stream: Mutex::new(None),
        }
    }

    pub fn with_reply(mut self, trigger: impl Into<String>, reply: impl Into<String>) -> Self {
        self.scripted.push((trigger.into(), reply.into()));
        self
    }

    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    /// Replace the next streamed response with exact chunks. A terminal
    /// `Done` is appended if the script does not end with one.
    pub fn script_stream(&self, chunks: Vec<ChatStreamChunk>) {
        if let Ok(mut slot) = self.scripted_stream.lock() {
            *slot = Some(chunks);
        }
    }

    fn reply_for(&self, messages: &[ChatMessage]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        self.scripted
            .iter()
            .find(|(trigger, _)| last_user.contains(trigger.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.default_reply.clone())
    }
}

impl Default for MockChat {
    fn default() -> Self {
        Self::new()
    }
}

fn mock_usage(reply: &str) -> TokenUsage {
    let completion = reply.split_whitespace().count() as u32;
    TokenUsage {
        prompt_tokens: 10,
        completion_tokens: completion,
        total_tokens: 10 + completion,
    }
}

#[async_trait]
impl Chat for MockChat {
    async fn chat(&self, messages: &[ChatMessage], _options: &ChatOptions) -> Result<ChatResponse> {
        let content = self.reply_for(messages);
        let usage = mock_usage(&content);
        Ok(ChatResponse { content, usage: Some(usage) })
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<ChatDeltaStream> {
        let scripted = self.scripted_stream.lock().ok().and_then(|mut slot| slot.take());

        let mut chunks: Vec<Result<ChatStreamChunk>> = match scripted {
            Some(script) => script.into_iter().map(Ok).collect(),
            None => {
                let reply = self.reply_for(messages);
                let usage = mock_usage(&reply);
                // Split on char boundaries in ~4-char deltas
                let mut deltas = Vec::new();
                let mut current = String::new();
                for ch in reply.chars() {
                    current.push(ch);
                    if current.chars().count() >= 4 {
                        deltas.push(Ok(ChatStreamChunk::Content {
                            delta: std::mem::take(&mut current),
                        }));
                    }
                }
                if !current.is_empty() {
                    deltas.push(Ok(ChatStreamChunk::Content { delta: current }));
                }
                deltas.push(Ok(ChatStreamChunk::Done { usage: Some(usage) }));
                deltas
            }
        };

        let has_done = chunks
            .iter()
            .any(|c| matches!(c, Ok(ChatStreamChunk::Done { .. })));
        if !has_done {
            chunks.push(Ok(ChatStreamChunk::Done { usage: None }));
        }

        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Mock embedding provider for testing
#[derive(Debug)]
pub struct MockEmbedder {
    dimension: usize,
    model: String,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension, model: "mock-embedder".to_string() }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        let mut rng = rand::thread_rng();
        Ok((0..self.dimension).map(|_| rng.gen_range(-1.0..1.0)).collect())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Reranker scoring by token overlap between query and document.
///
/// Deterministic, so tests can predict the post-rerank ordering.
pub struct MockReranker {
    model: String,
}

impl MockReranker {
    pub fn new() -> Self {
        Self { model: "mock-reranker".to_string() }
    }
}

impl Default for MockReranker {
    fn default() -> Self {
        Self::new()
    }
}

fn tokens(text: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
        if !token.is_empty() {
            *counts.entry(token.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

#[async_trait]
impl Reranker for MockReranker {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankScore>> {
        let query_tokens = tokens(query);
        let query_total: usize = query_tokens.values().sum();

        let scores = documents
            .iter()
            .enumerate()
            .map(|(index, doc)| {
                let doc_tokens = tokens(doc);
                let overlap: usize = query_tokens
                    .iter()
                    .map(|(t, &n)| n.min(doc_tokens.get(t).copied().unwrap_or(0)))
                    .sum();
                let score = if query_total == 0 {
                    0.0
                } else {
                    overlap as f32 / query_total as f32
                };
                RerankScore { index, score }
            })
            .collect();

        Ok(scores)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_scripted_replies() {
        let chat = MockChat::new()
            .with_reply("weather", "It is sunny.")
            .with_default_reply("I do not know.");

        let reply = chat
            .chat(&[ChatMessage::user("what is the weather like")], &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(reply.content, "It is sunny.");

        let reply = chat
            .chat(&[ChatMessage::user("unrelated")], &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(reply.content, "I do not know.");
    }

    #[tokio::test]
    async fn test_stream_reassembles_reply() {
        let chat = MockChat::new().with_default_reply("hello streaming world");
        let mut stream = chat
            .chat_stream(&[ChatMessage::user("hi")], &ChatOptions::default())
            .await
            .unwrap();

        let mut assembled = String::new();
        let mut saw_done = false;
        while let Some(chunk) = stream.next().await {
            match chunk.unwrap() {
                ChatStreamChunk::Content { delta } => assembled.push_str(&delta),
                ChatStreamChunk::Done { .. } => saw_done = true,
                ChatStreamChunk::ToolCall { .. } => {}
            }
        }
        assert_eq!(assembled, "hello streaming world");
        assert!(saw_done);
    }

    #[tokio::test]
    async fn test_scripted_stream_appends_done() {
        let chat = MockChat::new();
        chat.script_stream(vec![ChatStreamChunk::Content { delta: "partial".to_string() }]);
        let mut stream = chat
            .chat_stream(&[ChatMessage::user("q")], &ChatOptions::default())
            .await
            .unwrap();

        let mut last = None;
        while let Some(chunk) = stream.next().await {
            last = Some(chunk.unwrap());
        }
        assert!(matches!(last, Some(ChatStreamChunk::Done { .. })));
    }

    #[tokio::test]
    async fn test_overlap_scoring_orders_documents() {
        let reranker = MockReranker::new();
        let docs = vec![
            "completely unrelated text".to_string(),
            "how to reset the device".to_string(),
        ];
        let scores = reranker.rerank("reset the device", &docs).await.unwrap();
        assert!(scores[1].score > scores[0].score);
    }

    #[tokio::test]
    async fn test_embedder_dimension() {
        let embedder = MockEmbedder::new(16);
        let v = embedder.embed("text").await.unwrap();
        assert_eq!(v.len(), 16);
    }
}
