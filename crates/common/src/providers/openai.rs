//! OpenAI-compatible chat and embedding adapters
//!
//! Works against any endpoint that speaks the OpenAI wire format
//! (chat/completions with SSE streaming, embeddings). Requests retry with
//! exponential backoff on transient failures.

use super::{
    Chat, ChatDeltaStream, ChatMessage, ChatOptions, ChatResponse, ChatStreamChunk, Embedder,
    TokenUsage,
};
use crate::errors::{PipelineError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible chat client
pub struct OpenAIChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<WireUsage> for TokenUsage {
    fn from(u: WireUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Deserialize)]
struct StreamToolCall {
    function: Option<StreamToolFunction>,
}

#[derive(Deserialize)]
struct StreamToolFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

impl OpenAIChat {
    pub fn new(
        api_key: String,
        model: impl Into<String>,
        base_url: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PipelineError::configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    fn request_body<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        options: &ChatOptions,
        stream: bool,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages,
            temperature: options.temperature,
            top_p: options.top_p,
            seed: options.seed,
            max_tokens: options.max_tokens,
            max_completion_tokens: options.max_completion_tokens,
            frequency_penalty: options.frequency_penalty,
            presence_penalty: options.presence_penalty,
            stream,
        }
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(messages, options, stream);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::chat("chat_completion", format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::chat(
                "chat_completion",
                format!("API error {status}: {text}"),
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl Chat for OpenAIChat {
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<ChatResponse> {
        let response = self.send(messages, options, false).await?;

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::chat("chat_completion", format!("bad response: {e}")))?;

        let content = completion
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| PipelineError::chat("chat_completion", "empty response"))?;

        Ok(ChatResponse { content, usage: completion.usage.map(Into::into) })
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatDeltaStream> {
        let response = self.send(messages, options, true).await?;
        let mut bytes = response.bytes_stream();

        let (tx, mut rx) = tokio::sync::mpsc::channel::<Result<ChatStreamChunk>>(16);

        // SSE lines arrive split arbitrarily across network frames; keep a
        // carry buffer and cut on newlines.
        tokio::spawn(async move {
            let mut buffer = String::new();
            let mut usage: Option<TokenUsage> = None;

            while let Some(frame) = bytes.next().await {
                let frame = match frame {
                    Ok(f) => f,
                    Err(e) => {
                        let _ = tx
                            .send(Err(PipelineError::chat(
                                "chat_completion_stream",
                                format!("stream error: {e}"),
                            )))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&frame));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);

                    let Some(data) = line.strip_prefix("data:") else { continue };
                    let data = data.trim();

                    if data == "[DONE]" {
                        let _ = tx.send(Ok(ChatStreamChunk::Done { usage })).await;
                        return;
                    }

                    let chunk: StreamChunk = match serde_json::from_str(data) {
                        Ok(c) => c,
                        Err(_) => continue,
                    };

                    if let Some(u) = chunk.usage {
                        usage = Some(u.into());
                    }

                    for choice in chunk.choices {
                        if let Some(content) = choice.delta.content {
                            if !content.is_empty() {
                                let _ =
                                    tx.send(Ok(ChatStreamChunk::Content { delta: content })).await;
                            }
                        }
                        for call in choice.delta.tool_calls.unwrap_or_default() {
                            if let Some(f) = call.function {
                                let _ = tx
                                    .send(Ok(ChatStreamChunk::ToolCall {
                                        name: f.name,
                                        arguments: f.arguments,
                                    }))
                                    .await;
                            }
                        }
                        if choice.finish_reason.is_some() {
                            let _ = tx.send(Ok(ChatStreamChunk::Done { usage })).await;
                            return;
                        }
                    }
                }
            }

            // Feed ended without an explicit terminator
            let _ = tx.send(Ok(ChatStreamChunk::Done { usage })).await;
        });

        Ok(Box::pin(futures::stream::poll_fn(move |cx| rx.poll_recv(cx))))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// OpenAI-compatible embedding client
#[derive(Debug)]
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    pub fn new(
        api_key: String,
        model: impl Into<String>,
        dimension: usize,
        base_url: Option<String>,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PipelineError::configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model: model.into(),
            dimension,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            max_retries,
        })
    }

    /// Make request with retry and exponential backoff
    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(100 * (2_u64.pow(attempt)));
                tokio::time::sleep(delay).await;
            }

            match self.make_request(texts).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "Embedding request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| PipelineError::embedding("embed", "unknown error after retries")))
    }

    async fn make_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest { input: texts, model: &self.model };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::embedding("embed", format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::embedding("embed", format!("API error {status}: {text}")));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::embedding("embed", format!("bad response: {e}")))?;

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.request_with_retry(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::embedding("embed", "empty response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        const BATCH_SIZE: usize = 100;

        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            all.extend(self.request_with_retry(chunk).await?);
        }
        Ok(all)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
