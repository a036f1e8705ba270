//! Completion stages
//!
//! Builds the final message list (rendered system prompt, history pairs,
//! assembled user content) and calls the chat model. The blocking variant
//! stores the response; the streaming variant parks the raw token feed on
//! the context for the stream filter. A fixed-response fallback short
//! circuits the model entirely: blocking runs store the canned text,
//! streaming runs synthesize a single-delta feed. Model calls are raced
//! against the cancel token so a stop lands even while a call is in
//! flight.

use crate::context::ExecutionContext;
use crate::fallback::FallbackDecision;
use crate::prompt;
use crate::registry::{Stage, StageControl, StageId};
use chrono::Utc;
use ragline_common::errors::{PipelineError, Result};
use ragline_common::events::CancelToken;
use ragline_common::providers::{
    ChatMessage, ChatResponse, ChatStreamChunk, ProviderRegistry,
};
use std::sync::Arc;

pub struct CompletionStage {
    providers: Arc<ProviderRegistry>,
}

impl CompletionStage {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }

    fn build_messages(&self, ctx: &ExecutionContext) -> Vec<ChatMessage> {
        let mut vars = prompt::time_vars(Utc::now());
        vars.push(("knowledge_bases", ctx.knowledge_base_names.join(", ")));
        vars.push((
            "web_search_status",
            if ctx.web_search_enabled { "enabled" } else { "disabled" }.to_string(),
        ));

        let mut messages = vec![ChatMessage::system(prompt::render(&ctx.system_prompt, &vars))];

        for turn in &ctx.history {
            messages.push(ChatMessage::user(turn.query.clone()));
            messages.push(ChatMessage::assistant(turn.answer.clone()));
        }

        let user_content = match &ctx.fallback_decision {
            Some(FallbackDecision::Prompt(prompt_text)) => prompt_text.clone(),
            Some(FallbackDecision::Unconstrained) => ctx.query.clone(),
            // Fixed never reaches the model; None means normal assembly
            _ if !ctx.user_content.is_empty() => ctx.user_content.clone(),
            _ => ctx.query.clone(),
        };
        messages.push(ChatMessage::user(user_content));
        messages
    }
}

#[async_trait::async_trait]
impl Stage for CompletionStage {
    fn activation_stages(&self) -> Vec<StageId> {
        vec![StageId::ChatCompletion, StageId::ChatCompletionStream]
    }

    async fn run(
        &self,
        stage: StageId,
        ctx: &mut ExecutionContext,
        cancel: &CancelToken,
    ) -> Result<StageControl> {
        cancel.check()?;

        let fixed = match &ctx.fallback_decision {
            Some(FallbackDecision::Fixed(text)) => Some(text.clone()),
            _ => None,
        };

        match stage {
            StageId::ChatCompletion => {
                if let Some(text) = fixed {
                    ctx.chat_response = Some(ChatResponse { content: text, usage: None });
                    return Ok(StageControl::Continue);
                }

                let chat = self.providers.chat(&ctx.chat_model_id)?;
                let messages = self.build_messages(ctx);
                let response = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    result = chat.chat(&messages, &ctx.chat_options) => result
                        .map_err(|e| PipelineError::chat("chat_completion", e.to_string()))?,
                };
                ctx.chat_response = Some(response);
            }
            StageId::ChatCompletionStream => {
                if let Some(text) = fixed {
                    ctx.raw_stream = Some(Box::pin(futures::stream::iter(vec![
                        Ok(ChatStreamChunk::Content { delta: text }),
                        Ok(ChatStreamChunk::Done { usage: None }),
                    ])));
                    return Ok(StageControl::Continue);
                }

                let chat = self.providers.chat(&ctx.chat_model_id)?;
                let messages = self.build_messages(ctx);
                let stream = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    result = chat.chat_stream(&messages, &ctx.chat_options) => result
                        .map_err(|e| {
                            PipelineError::chat("chat_completion_stream", e.to_string())
                        })?,
                };
                ctx.raw_stream = Some(stream);
            }
            other => {
                return Err(PipelineError::internal(
                    "completion",
                    format!("unexpected stage {other}"),
                ));
            }
        }
        Ok(StageControl::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use ragline_common::config::AppConfig;
    use ragline_common::errors::Result;
    use ragline_common::events::cancel_pair;
    use ragline_common::providers::{Chat, ChatDeltaStream, ChatOptions, MockChat};
    use ragline_common::types::{HistoryTurn, SearchTarget};

    fn providers() -> Arc<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        registry.register_chat(
            "mock-chat",
            Arc::new(MockChat::new().with_default_reply("model answer")),
        );
        Arc::new(registry)
    }

    fn context() -> ExecutionContext {
        let mut config = AppConfig::default();
        config.chat.model = "mock-chat".to_string();
        ExecutionContext::for_session(
            &config,
            "s1",
            "the question",
            vec![SearchTarget::knowledge_base("kb1")],
        )
    }

    #[tokio::test]
    async fn test_blocking_completion_stores_response() {
        let stage = CompletionStage::new(providers());
        let mut ctx = context();
        ctx.user_content = "assembled content".to_string();

        let (_h, token) = cancel_pair();
        stage.run(StageId::ChatCompletion, &mut ctx, &token).await.unwrap();
        assert_eq!(ctx.chat_response.as_ref().unwrap().content, "model answer");
    }

    #[tokio::test]
    async fn test_messages_include_history_and_rendered_system() {
        let stage = CompletionStage::new(providers());
        let mut ctx = context();
        ctx.knowledge_base_names = vec!["product docs".to_string()];
        ctx.history = vec![HistoryTurn {
            query: "earlier question".to_string(),
            answer: "earlier answer".to_string(),
            created_at: Utc::now(),
            knowledge_references: Vec::new(),
        }];
        ctx.user_content = "assembled".to_string();

        let messages = stage.build_messages(&ctx);
        assert_eq!(messages.len(), 4);
        assert!(messages[0].content.contains("product docs"));
        assert!(!messages[0].content.contains("{{current_time}}"));
        assert_eq!(messages[1].content, "earlier question");
        assert_eq!(messages[2].content, "earlier answer");
        assert_eq!(messages[3].content, "assembled");
    }

    #[tokio::test]
    async fn test_fixed_fallback_skips_the_model() {
        // No chat provider registered at all: fixed fallback still answers
        let stage = CompletionStage::new(Arc::new(ProviderRegistry::new()));
        let mut ctx = context();
        ctx.fallback_decision = Some(FallbackDecision::Fixed("canned".to_string()));

        let (_h, token) = cancel_pair();
        stage.run(StageId::ChatCompletion, &mut ctx, &token).await.unwrap();
        assert_eq!(ctx.chat_response.as_ref().unwrap().content, "canned");
    }

    #[tokio::test]
    async fn test_fixed_fallback_synthesizes_stream() {
        let stage = CompletionStage::new(Arc::new(ProviderRegistry::new()));
        let mut ctx = context();
        ctx.fallback_decision = Some(FallbackDecision::Fixed("canned".to_string()));

        let (_h, token) = cancel_pair();
        stage.run(StageId::ChatCompletionStream, &mut ctx, &token).await.unwrap();

        let mut stream = ctx.raw_stream.take().unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, ChatStreamChunk::Content { delta: "canned".to_string() });
        let second = stream.next().await.unwrap().unwrap();
        assert!(matches!(second, ChatStreamChunk::Done { .. }));
    }

    #[tokio::test]
    async fn test_prompt_fallback_replaces_user_message() {
        let stage = CompletionStage::new(providers());
        let mut ctx = context();
        ctx.fallback_decision =
            Some(FallbackDecision::Prompt("nothing found for: the question".to_string()));

        let messages = stage.build_messages(&ctx);
        assert_eq!(messages.last().unwrap().content, "nothing found for: the question");
    }

    /// Chat provider whose calls never return
    struct StalledChat;

    #[async_trait::async_trait]
    impl Chat for StalledChat {
        async fn chat(&self, _: &[ChatMessage], _: &ChatOptions) -> Result<ChatResponse> {
            futures::future::pending().await
        }

        async fn chat_stream(
            &self,
            _: &[ChatMessage],
            _: &ChatOptions,
        ) -> Result<ChatDeltaStream> {
            futures::future::pending().await
        }

        fn model_name(&self) -> &str {
            "stalled"
        }
    }

    fn stalled_providers() -> Arc<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        registry.register_chat("mock-chat", Arc::new(StalledChat));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_stop_interrupts_inflight_model_call() {
        for stage_id in [StageId::ChatCompletion, StageId::ChatCompletionStream] {
            let providers = stalled_providers();
            let (handle, token) = cancel_pair();
            let task = tokio::spawn(async move {
                let stage = CompletionStage::new(providers);
                let mut ctx = context();
                ctx.user_content = "assembled".to_string();
                stage.run(stage_id, &mut ctx, &token).await
            });

            handle.cancel();
            let err = task.await.unwrap().unwrap_err();
            assert!(err.is_cancelled());
        }
    }

    #[tokio::test]
    async fn test_streaming_parks_raw_feed() {
        let stage = CompletionStage::new(providers());
        let mut ctx = context();
        ctx.user_content = "assembled".to_string();

        let (_h, token) = cancel_pair();
        stage.run(StageId::ChatCompletionStream, &mut ctx, &token).await.unwrap();
        assert!(ctx.raw_stream.is_some());
        assert!(ctx.chat_response.is_none());
    }
}
