//! Chunk and entity search stages
//!
//! `ChunkSearch` embeds the effective query and runs vector plus keyword
//! retrieval (keyword also covers the query variants). `EntitySearch`
//! extracts entity names with the chat model and looks them up in the
//! knowledge graph. `ChunkSearchParallel` forks both over `tokio::join!`;
//! chunk failure is fatal, entity failure degrades to an empty graph.

use crate::context::ExecutionContext;
use crate::registry::{Stage, StageControl, StageId};
use ragline_common::errors::{PipelineError, Result};
use ragline_common::events::CancelToken;
use ragline_common::providers::{ChatMessage, ChatOptions, ProviderRegistry};
use ragline_common::stores::SearchStore;
use ragline_common::types::{GraphData, SearchResult};
use std::sync::Arc;

const ENTITY_EXTRACTION_PROMPT: &str = "\
Extract the distinct named entities from the user's question. Reply with \
a JSON array of strings and nothing else. Reply with [] when there are \
none.";

pub struct SearchStage {
    store: Arc<dyn SearchStore>,
    providers: Arc<ProviderRegistry>,
}

impl SearchStage {
    pub fn new(store: Arc<dyn SearchStore>, providers: Arc<ProviderRegistry>) -> Self {
        Self { store, providers }
    }

    /// Vector + keyword retrieval for the effective query
    async fn chunk_search(&self, ctx: &ExecutionContext) -> Result<Vec<SearchResult>> {
        let query = ctx.effective_query();

        let embedder = self.providers.embedder(&ctx.embedding_model_id)?;
        let embedding = embedder.embed(query).await?;

        let mut hits = self
            .store
            .vector_search(
                query,
                &embedding,
                &ctx.targets,
                ctx.vector_threshold,
                ctx.embedding_top_k,
            )
            .await?;

        let keyword_queries =
            std::iter::once(query.to_string()).chain(ctx.query_variants.iter().cloned());
        for keyword_query in keyword_queries {
            let keyword_hits = self
                .store
                .keyword_search(
                    &keyword_query,
                    &ctx.targets,
                    ctx.keyword_threshold,
                    ctx.embedding_top_k,
                )
                .await?;
            hits.extend(keyword_hits);
        }

        tracing::debug!(query = %query, hits = hits.len(), "chunk search finished");
        Ok(hits)
    }

    /// Entity extraction via the chat model, then a graph lookup
    async fn entity_search(&self, ctx: &ExecutionContext) -> Result<(Vec<String>, GraphData)> {
        let chat = self.providers.chat(&ctx.chat_model_id)?;
        let messages = vec![
            ChatMessage::system(ENTITY_EXTRACTION_PROMPT),
            ChatMessage::user(ctx.effective_query()),
        ];
        let response = chat.chat(&messages, &ChatOptions::default()).await?;
        let entities = parse_entity_list(&response.content);

        if entities.is_empty() {
            return Ok((entities, GraphData::default()));
        }

        let graph = self.store.graph_search(&entities, &ctx.targets).await?;
        Ok((entities, graph))
    }
}

/// Parse the extraction reply; tolerates code fences around the array
fn parse_entity_list(reply: &str) -> Vec<String> {
    let trimmed = reply.trim().trim_start_matches("```json").trim_matches('`').trim();
    match serde_json::from_str::<Vec<String>>(trimmed) {
        Ok(entities) => entities
            .into_iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[async_trait::async_trait]
impl Stage for SearchStage {
    fn activation_stages(&self) -> Vec<StageId> {
        vec![StageId::ChunkSearch, StageId::ChunkSearchParallel, StageId::EntitySearch]
    }

    async fn run(
        &self,
        stage: StageId,
        ctx: &mut ExecutionContext,
        cancel: &CancelToken,
    ) -> Result<StageControl> {
        cancel.check()?;

        match stage {
            StageId::ChunkSearch => {
                ctx.search_result = self
                    .chunk_search(ctx)
                    .await
                    .map_err(|e| PipelineError::search("chunk_search", e.to_string()))?;
            }
            StageId::ChunkSearchParallel => {
                let (chunks, graph) = tokio::join!(self.chunk_search(ctx), self.entity_search(ctx));
                ctx.search_result = chunks
                    .map_err(|e| PipelineError::search("chunk_search_parallel", e.to_string()))?;
                match graph {
                    Ok((entities, graph_data)) => {
                        ctx.entities = entities;
                        ctx.graph_result = graph_data;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "entity search failed, continuing without graph");
                        ctx.entities.clear();
                        ctx.graph_result = GraphData::default();
                    }
                }
            }
            StageId::EntitySearch => match self.entity_search(ctx).await {
                Ok((entities, graph_data)) => {
                    ctx.entities = entities;
                    ctx.graph_result = graph_data;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "entity search failed, continuing without graph");
                    ctx.entities.clear();
                    ctx.graph_result = GraphData::default();
                }
            },
            other => {
                return Err(PipelineError::internal(
                    "search",
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
    use ragline_common::config::AppConfig;
    use ragline_common::events::cancel_pair;
    use ragline_common::providers::{MockChat, MockEmbedder};
    use ragline_common::stores::{ChunkRecord, InMemorySearchStore};
    use ragline_common::types::{GraphEntity, GraphRelation, MatchType, SearchTarget};

    fn providers(chat_reply: &str) -> Arc<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        registry.register_chat(
            "mock-chat",
            Arc::new(MockChat::new().with_default_reply(chat_reply)),
        );
        registry.register_embedder("mock-embedder", Arc::new(MockEmbedder::new(8)));
        Arc::new(registry)
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.chat.model = "mock-chat".to_string();
        config.embedding.model = "mock-embedder".to_string();
        config
    }

    fn seeded_store() -> Arc<InMemorySearchStore> {
        let store = InMemorySearchStore::new();
        store
            .insert_chunk(ChunkRecord {
                chunk_id: "c1".to_string(),
                knowledge_id: "k1".to_string(),
                knowledge_base_id: "kb1".to_string(),
                chunk_index: 0,
                content: "如何使用知识库进行问答".to_string(),
                image_info: Vec::new(),
            })
            .unwrap();
        store
            .insert_entity(
                GraphEntity { name: "知识库".to_string(), description: String::new() },
                vec![GraphRelation {
                    source: "知识库".to_string(),
                    target: "问答".to_string(),
                    relation: "supports".to_string(),
                }],
            )
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_chunk_search_fills_results() {
        let stage = SearchStage::new(seeded_store(), providers("[]"));
        let mut ctx = ExecutionContext::for_session(
            &config(),
            "s1",
            "如何使用知识库",
            vec![SearchTarget::knowledge_base("kb1")],
        );
        let (_h, token) = cancel_pair();
        stage.run(StageId::ChunkSearch, &mut ctx, &token).await.unwrap();

        assert!(!ctx.search_result.is_empty());
        assert!(ctx.search_result.iter().any(|h| h.match_type == MatchType::Embedding));
        assert!(ctx.search_result.iter().any(|h| h.match_type == MatchType::Keyword));
    }

    #[tokio::test]
    async fn test_parallel_search_fills_chunks_and_graph() {
        let stage = SearchStage::new(seeded_store(), providers(r#"["知识库"]"#));
        let mut ctx = ExecutionContext::for_session(
            &config(),
            "s1",
            "如何使用知识库",
            vec![SearchTarget::knowledge_base("kb1")],
        );
        let (_h, token) = cancel_pair();
        stage.run(StageId::ChunkSearchParallel, &mut ctx, &token).await.unwrap();

        assert!(!ctx.search_result.is_empty());
        assert_eq!(ctx.entities, vec!["知识库"]);
        assert_eq!(ctx.graph_result.entities.len(), 1);
        assert_eq!(ctx.graph_result.relations.len(), 1);
    }

    #[tokio::test]
    async fn test_entity_failure_degrades_chunk_failure_does_not() {
        // Chat model missing: entity branch degrades, chunk branch is
        // unaffected
        let mut registry = ProviderRegistry::new();
        registry.register_embedder("mock-embedder", Arc::new(MockEmbedder::new(8)));
        let stage = SearchStage::new(seeded_store(), Arc::new(registry));

        let mut ctx = ExecutionContext::for_session(
            &config(),
            "s1",
            "如何使用知识库",
            vec![SearchTarget::knowledge_base("kb1")],
        );
        let (_h, token) = cancel_pair();
        stage.run(StageId::ChunkSearchParallel, &mut ctx, &token).await.unwrap();
        assert!(!ctx.search_result.is_empty());
        assert!(ctx.graph_result.is_empty());

        // Embedder missing: chunk branch fails and aborts the stage
        let mut registry = ProviderRegistry::new();
        registry.register_chat("mock-chat", Arc::new(MockChat::new().with_default_reply("[]")));
        let stage = SearchStage::new(seeded_store(), Arc::new(registry));

        let mut ctx = ExecutionContext::for_session(
            &config(),
            "s1",
            "如何使用知识库",
            vec![SearchTarget::knowledge_base("kb1")],
        );
        let err = stage.run(StageId::ChunkSearchParallel, &mut ctx, &token).await.unwrap_err();
        assert_eq!(err.kind(), ragline_common::errors::ErrorKind::SearchError);
    }

    #[test]
    fn test_parse_entity_list_tolerates_fences() {
        assert_eq!(parse_entity_list(r#"["a", "b"]"#), vec!["a", "b"]);
        assert_eq!(parse_entity_list("```json\n[\"a\"]\n```"), vec!["a"]);
        assert!(parse_entity_list("not json").is_empty());
        assert!(parse_entity_list("[]").is_empty());
    }
}
