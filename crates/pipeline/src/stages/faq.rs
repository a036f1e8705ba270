//! FAQ search stage
//!
//! Runs only when FAQ priority is enabled for the request. Embeds the
//! effective query, performs the hybrid FAQ search with two-tier tag
//! precedence, and appends the hits to the raw search results so they
//! flow through rerank and merge with the document chunks. A failure
//! degrades to no FAQ hits; the document results already retrieved are
//! never lost over it.

use crate::context::ExecutionContext;
use crate::registry::{Stage, StageControl, StageId};
use ragline_common::errors::Result;
use ragline_common::events::CancelToken;
use ragline_common::providers::ProviderRegistry;
use ragline_common::stores::SearchStore;
use ragline_common::types::SearchResult;
use std::sync::Arc;

pub struct FaqStage {
    store: Arc<dyn SearchStore>,
    providers: Arc<ProviderRegistry>,
}

impl FaqStage {
    pub fn new(store: Arc<dyn SearchStore>, providers: Arc<ProviderRegistry>) -> Self {
        Self { store, providers }
    }

    async fn search(&self, ctx: &ExecutionContext) -> Result<Vec<SearchResult>> {
        let query = ctx.effective_query();
        let embedder = self.providers.embedder(&ctx.embedding_model_id)?;
        let embedding = embedder.embed(query).await?;
        self.store.faq_search(query, &embedding, &ctx.targets, &ctx.faq_params).await
    }
}

#[async_trait::async_trait]
impl Stage for FaqStage {
    fn activation_stages(&self) -> Vec<StageId> {
        vec![StageId::FaqSearch]
    }

    async fn run(
        &self,
        _stage: StageId,
        ctx: &mut ExecutionContext,
        _cancel: &CancelToken,
    ) -> Result<StageControl> {
        if !ctx.faq_priority_enabled {
            return Ok(StageControl::Continue);
        }

        match self.search(ctx).await {
            Ok(hits) => {
                tracing::debug!(hits = hits.len(), "faq search finished");
                ctx.search_result.extend(hits);
            }
            Err(e) => {
                tracing::warn!(error = %e, "faq search failed, continuing without faq hits");
            }
        }
        Ok(StageControl::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragline_common::config::AppConfig;
    use ragline_common::events::cancel_pair;
    use ragline_common::providers::MockEmbedder;
    use ragline_common::stores::{FaqRecord, InMemorySearchStore};
    use ragline_common::types::faq::FaqContent;
    use ragline_common::types::{ChunkType, SearchTarget};

    fn providers() -> Arc<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        registry.register_embedder("mock-embedder", Arc::new(MockEmbedder::new(8)));
        Arc::new(registry)
    }

    fn store_with_tagged_faqs() -> Arc<InMemorySearchStore> {
        let store = InMemorySearchStore::new();
        for (id, tag) in [("f1", "billing"), ("f2", "general")] {
            store
                .insert_faq(FaqRecord {
                    id: id.to_string(),
                    knowledge_id: "k1".to_string(),
                    knowledge_base_id: "kb1".to_string(),
                    tag_id: Some(tag.to_string()),
                    content: FaqContent {
                        standard_question: "how do I reset my password".to_string(),
                        answers: vec!["Use the reset link.".to_string()],
                        ..Default::default()
                    },
                })
                .unwrap();
        }
        Arc::new(store)
    }

    fn context(enabled: bool) -> ExecutionContext {
        let mut config = AppConfig::default();
        config.embedding.model = "mock-embedder".to_string();
        let mut ctx = ExecutionContext::for_session(
            &config,
            "s1",
            "how do I reset my password",
            vec![SearchTarget::knowledge_base("kb1")],
        );
        ctx.faq_priority_enabled = enabled;
        ctx.faq_params.vector_threshold = 0.3;
        ctx.faq_params.match_count = 5;
        ctx
    }

    #[tokio::test]
    async fn test_appends_faq_hits_to_search_results() {
        let stage = FaqStage::new(store_with_tagged_faqs(), providers());
        let mut ctx = context(true);
        let (_h, token) = cancel_pair();
        stage.run(StageId::FaqSearch, &mut ctx, &token).await.unwrap();

        assert_eq!(ctx.search_result.len(), 2);
        assert!(ctx.search_result.iter().all(|h| h.chunk_type == ChunkType::Faq));
    }

    #[tokio::test]
    async fn test_first_tier_wins() {
        let stage = FaqStage::new(store_with_tagged_faqs(), providers());
        let mut ctx = context(true);
        ctx.faq_params.first_priority_tag_ids = vec!["billing".to_string()];
        ctx.faq_params.second_priority_tag_ids = vec!["general".to_string()];

        let (_h, token) = cancel_pair();
        stage.run(StageId::FaqSearch, &mut ctx, &token).await.unwrap();

        assert_eq!(ctx.search_result.len(), 1);
        assert_eq!(ctx.search_result[0].faq_tag_id.as_deref(), Some("billing"));
    }

    #[tokio::test]
    async fn test_disabled_skips_entirely() {
        let stage = FaqStage::new(store_with_tagged_faqs(), providers());
        let mut ctx = context(false);
        let (_h, token) = cancel_pair();
        stage.run(StageId::FaqSearch, &mut ctx, &token).await.unwrap();
        assert!(ctx.search_result.is_empty());
    }

    #[tokio::test]
    async fn test_failure_keeps_existing_results() {
        // No embedder registered: the stage degrades without touching the
        // results already present
        let stage = FaqStage::new(store_with_tagged_faqs(), Arc::new(ProviderRegistry::new()));
        let mut ctx = context(true);
        ctx.search_result.push(SearchResult::text(
            "c1",
            "k1",
            "kb1",
            "existing doc hit",
            ragline_common::types::MatchType::Embedding,
            0.8,
        ));

        let (_h, token) = cancel_pair();
        let control = stage.run(StageId::FaqSearch, &mut ctx, &token).await.unwrap();
        assert_eq!(control, StageControl::Continue);
        assert_eq!(ctx.search_result.len(), 1);
    }
}
