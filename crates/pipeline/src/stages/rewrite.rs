//! Query rewrite stage
//!
//! Rewrites a follow-up question into a standalone retrieval query using
//! the chat model and the loaded history. With query expansion enabled,
//! additional lines of the model reply become auxiliary query variants.
//! Any failure degrades to the original query.

use crate::context::ExecutionContext;
use crate::prompt;
use crate::registry::{Stage, StageControl, StageId};
use chrono::Utc;
use ragline_common::errors::Result;
use ragline_common::events::CancelToken;
use ragline_common::providers::{ChatMessage, ChatOptions, ProviderRegistry};
use std::sync::Arc;

pub struct RewriteStage {
    providers: Arc<ProviderRegistry>,
}

impl RewriteStage {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }

    async fn rewrite(&self, ctx: &ExecutionContext) -> Result<Vec<String>> {
        let chat = self.providers.chat(&ctx.chat_model_id)?;

        let mut vars = prompt::time_vars(Utc::now());
        vars.push(("conversation", prompt::conversation_text(&ctx.history)));
        vars.push(("query", ctx.query.clone()));

        let messages = vec![
            ChatMessage::system(prompt::render(&ctx.rewrite_prompt_system, &vars)),
            ChatMessage::user(prompt::render(&ctx.rewrite_prompt_user, &vars)),
        ];

        let response = chat.chat(&messages, &ChatOptions::default()).await?;
        Ok(response
            .content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}

#[async_trait::async_trait]
impl Stage for RewriteStage {
    fn activation_stages(&self) -> Vec<StageId> {
        vec![StageId::RewriteQuery]
    }

    async fn run(
        &self,
        _stage: StageId,
        ctx: &mut ExecutionContext,
        _cancel: &CancelToken,
    ) -> Result<StageControl> {
        if !ctx.rewrite_enabled {
            return Ok(StageControl::Continue);
        }

        match self.rewrite(ctx).await {
            Ok(lines) if !lines.is_empty() => {
                let mut lines = lines.into_iter();
                let rewritten = lines.next().unwrap_or_default();
                tracing::debug!(
                    original = %ctx.query,
                    rewritten = %rewritten,
                    "query rewritten"
                );
                ctx.rewritten_query = Some(rewritten);
                if ctx.query_expansion_enabled {
                    ctx.query_variants = lines.collect();
                }
            }
            Ok(_) => {
                tracing::warn!("rewrite returned empty output, keeping original query");
            }
            Err(e) => {
                tracing::warn!(error = %e, "query rewrite failed, keeping original query");
            }
        }
        Ok(StageControl::Continue)
    }
}
