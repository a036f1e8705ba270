//! Rerank stage
//!
//! Second-pass relevance scoring of the raw retrieval results. An empty
//! rerank model ID disables the model pass: results keep their raw scores
//! and are simply ordered and truncated. With a model, candidates are
//! scored against the effective query, filtered by the rerank threshold,
//! sorted descending, and truncated to the rerank top-K.

use crate::context::ExecutionContext;
use crate::registry::{Stage, StageControl, StageId};
use ragline_common::errors::{PipelineError, Result};
use ragline_common::events::CancelToken;
use ragline_common::providers::ProviderRegistry;
use ragline_common::types::SearchResult;
use std::sync::Arc;

pub struct RerankStage {
    providers: Arc<ProviderRegistry>,
}

impl RerankStage {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }
}

fn sort_by_score_desc(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}

#[async_trait::async_trait]
impl Stage for RerankStage {
    fn activation_stages(&self) -> Vec<StageId> {
        vec![StageId::ChunkRerank]
    }

    async fn run(
        &self,
        _stage: StageId,
        ctx: &mut ExecutionContext,
        cancel: &CancelToken,
    ) -> Result<StageControl> {
        cancel.check()?;

        if ctx.search_result.is_empty() {
            ctx.rerank_result.clear();
            return Ok(StageControl::Continue);
        }

        if ctx.rerank_model_id.is_empty() {
            // No rerank model configured: keep raw scores
            let mut results = ctx.search_result.clone();
            sort_by_score_desc(&mut results);
            results.truncate(ctx.rerank_top_k);
            ctx.rerank_result = results;
            return Ok(StageControl::Continue);
        }

        let reranker = self.providers.reranker(&ctx.rerank_model_id)?;
        let documents: Vec<String> =
            ctx.search_result.iter().map(|r| r.content.clone()).collect();

        let scores = reranker
            .rerank(ctx.effective_query(), &documents)
            .await
            .map_err(|e| PipelineError::rerank("chunk_rerank", e.to_string()))?;

        let mut results: Vec<SearchResult> = scores
            .into_iter()
            .filter(|s| s.score >= ctx.rerank_threshold)
            .filter_map(|s| {
                ctx.search_result.get(s.index).map(|hit| {
                    let mut rescored = hit.clone();
                    rescored.score = s.score;
                    rescored
                })
            })
            .collect();

        sort_by_score_desc(&mut results);
        results.truncate(ctx.rerank_top_k);

        tracing::debug!(
            candidates = ctx.search_result.len(),
            kept = results.len(),
            "rerank finished"
        );
        ctx.rerank_result = results;
        Ok(StageControl::Continue)
    }
}
