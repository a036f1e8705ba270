//! Per-request execution context
//!
//! One `ExecutionContext` is created per question and threaded mutably
//! through the stage chain. The parameter fields are seeded from
//! `AppConfig` and may be overridden per request before dispatch; the
//! result slots are written by stages as the chain advances.

use crate::fallback::FallbackDecision;
use ragline_common::config::AppConfig;
use ragline_common::errors::{PipelineError, Result};
use ragline_common::events::EventSink;
use ragline_common::providers::{ChatDeltaStream, ChatOptions, ChatResponse};
use ragline_common::types::faq::FaqSearchParams;
use ragline_common::types::{
    FallbackStrategy, GraphData, HistoryTurn, SearchResult, SearchTarget,
};
use uuid::Uuid;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a knowledge-base question-answering assistant.
Current time: {{current_time}}.
Knowledge bases available: {{knowledge_bases}}.
Web search: {{web_search_status}}.
Answer using only the material provided in the conversation. When the \
material does not cover the question, say so instead of guessing.";

pub const DEFAULT_CONTEXT_TEMPLATE: &str = "\
Answer the question using the numbered context passages below. Cite the \
passage numbers you relied on.

Context:
{{contexts}}

Current time: {{current_time}} ({{current_week}})

Question: {{query}}";

pub const DEFAULT_REWRITE_PROMPT_SYSTEM: &str = "\
You rewrite follow-up questions into standalone search queries. Use the \
conversation for missing referents. Today is {{current_time}}; yesterday \
was {{yesterday}}. Reply with the rewritten query only, nothing else.";

pub const DEFAULT_REWRITE_PROMPT_USER: &str = "\
Conversation:
{{conversation}}

Follow-up question: {{query}}

Standalone query:";

/// Mutable state for one pipeline run
pub struct ExecutionContext {
    // Identity
    pub session_id: String,
    /// Pairs this question with its answer in the conversation log
    pub request_id: String,
    /// Identifies the streamed answer (stop/event routing key)
    pub message_id: String,

    // Query
    pub query: String,
    pub rewritten_query: Option<String>,
    /// Auxiliary retrieval queries from query expansion
    pub query_variants: Vec<String>,

    // Scope
    pub targets: Vec<SearchTarget>,
    pub knowledge_base_names: Vec<String>,

    // Retrieval parameters
    pub vector_threshold: f32,
    pub keyword_threshold: f32,
    pub embedding_top_k: usize,
    pub rerank_threshold: f32,
    pub rerank_top_k: usize,

    // Model selection
    pub chat_model_id: String,
    pub embedding_model_id: String,
    /// Empty disables reranking (pass-through by raw score)
    pub rerank_model_id: String,
    pub chat_options: ChatOptions,

    // Prompts
    pub system_prompt: String,
    pub context_template: String,
    pub rewrite_prompt_system: String,
    pub rewrite_prompt_user: String,

    // Behavior switches
    pub rewrite_enabled: bool,
    pub query_expansion_enabled: bool,
    pub web_search_enabled: bool,
    pub max_rounds: usize,

    // Fallback policy
    pub fallback_strategy: FallbackStrategy,
    pub fallback_response: String,
    pub fallback_prompt: String,

    // FAQ strategy
    pub faq_priority_enabled: bool,
    pub faq_params: FaqSearchParams,
    pub faq_direct_answer_threshold: f32,
    pub faq_score_boost: f32,

    // Result slots, written as the chain advances
    pub history: Vec<HistoryTurn>,
    pub search_result: Vec<SearchResult>,
    pub entities: Vec<String>,
    pub graph_result: GraphData,
    pub rerank_result: Vec<SearchResult>,
    pub merge_result: Vec<SearchResult>,
    pub high_confidence_faq: Option<SearchResult>,
    pub user_content: String,
    pub fallback_decision: Option<FallbackDecision>,
    pub chat_response: Option<ChatResponse>,
    /// Raw token feed parked by the completion stage for the stream filter
    pub raw_stream: Option<ChatDeltaStream>,
    /// Event sink for streaming runs, wired by the engine
    pub sink: Option<EventSink>,
}

impl ExecutionContext {
    /// Build a context for one question, seeded from process-wide defaults
    pub fn for_session(
        config: &AppConfig,
        session_id: impl Into<String>,
        query: impl Into<String>,
        targets: Vec<SearchTarget>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            request_id: Uuid::new_v4().to_string(),
            message_id: Uuid::new_v4().to_string(),
            query: query.into(),
            rewritten_query: None,
            query_variants: Vec::new(),
            targets,
            knowledge_base_names: Vec::new(),
            vector_threshold: config.retrieval.vector_threshold,
            keyword_threshold: config.retrieval.keyword_threshold,
            embedding_top_k: config.retrieval.embedding_top_k,
            rerank_threshold: config.retrieval.rerank_threshold,
            rerank_top_k: config.retrieval.rerank_top_k,
            chat_model_id: config.chat.model.clone(),
            embedding_model_id: config.embedding.model.clone(),
            rerank_model_id: config.rerank.model.clone(),
            chat_options: ChatOptions::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            context_template: DEFAULT_CONTEXT_TEMPLATE.to_string(),
            rewrite_prompt_system: DEFAULT_REWRITE_PROMPT_SYSTEM.to_string(),
            rewrite_prompt_user: DEFAULT_REWRITE_PROMPT_USER.to_string(),
            rewrite_enabled: false,
            query_expansion_enabled: false,
            web_search_enabled: false,
            max_rounds: config.conversation.max_rounds,
            fallback_strategy: FallbackStrategy::default(),
            fallback_response: config.conversation.fallback_response.clone(),
            fallback_prompt: config.conversation.fallback_prompt.clone(),
            faq_priority_enabled: config.faq.priority_enabled,
            faq_params: FaqSearchParams {
                vector_threshold: config.retrieval.vector_threshold,
                match_count: config.retrieval.embedding_top_k,
                first_priority_tag_ids: Vec::new(),
                second_priority_tag_ids: Vec::new(),
            },
            faq_direct_answer_threshold: config.faq.direct_answer_threshold,
            faq_score_boost: config.faq.score_boost,
            history: Vec::new(),
            search_result: Vec::new(),
            entities: Vec::new(),
            graph_result: GraphData::default(),
            rerank_result: Vec::new(),
            merge_result: Vec::new(),
            high_confidence_faq: None,
            user_content: String::new(),
            fallback_decision: None,
            chat_response: None,
            raw_stream: None,
            sink: None,
        }
    }

    /// The query retrieval should use: the rewritten form when present
    pub fn effective_query(&self) -> &str {
        self.rewritten_query.as_deref().unwrap_or(&self.query)
    }

    /// Copy of this context with all result slots reset, for dispatching a
    /// sub-request with the same parameters.
    pub fn snapshot(&self) -> Self {
        Self {
            session_id: self.session_id.clone(),
            request_id: self.request_id.clone(),
            message_id: self.message_id.clone(),
            query: self.query.clone(),
            rewritten_query: self.rewritten_query.clone(),
            query_variants: self.query_variants.clone(),
            targets: self.targets.clone(),
            knowledge_base_names: self.knowledge_base_names.clone(),
            vector_threshold: self.vector_threshold,
            keyword_threshold: self.keyword_threshold,
            embedding_top_k: self.embedding_top_k,
            rerank_threshold: self.rerank_threshold,
            rerank_top_k: self.rerank_top_k,
            chat_model_id: self.chat_model_id.clone(),
            embedding_model_id: self.embedding_model_id.clone(),
            rerank_model_id: self.rerank_model_id.clone(),
            chat_options: self.chat_options.clone(),
            system_prompt: self.system_prompt.clone(),
            context_template: self.context_template.clone(),
            rewrite_prompt_system: self.rewrite_prompt_system.clone(),
            rewrite_prompt_user: self.rewrite_prompt_user.clone(),
            rewrite_enabled: self.rewrite_enabled,
            query_expansion_enabled: self.query_expansion_enabled,
            web_search_enabled: self.web_search_enabled,
            max_rounds: self.max_rounds,
            fallback_strategy: self.fallback_strategy,
            fallback_response: self.fallback_response.clone(),
            fallback_prompt: self.fallback_prompt.clone(),
            faq_priority_enabled: self.faq_priority_enabled,
            faq_params: self.faq_params.clone(),
            faq_direct_answer_threshold: self.faq_direct_answer_threshold,
            faq_score_boost: self.faq_score_boost,
            history: Vec::new(),
            search_result: Vec::new(),
            entities: Vec::new(),
            graph_result: GraphData::default(),
            rerank_result: Vec::new(),
            merge_result: Vec::new(),
            high_confidence_faq: None,
            user_content: String::new(),
            fallback_decision: None,
            chat_response: None,
            raw_stream: None,
            sink: None,
        }
    }

    /// Parameter sanity checks run at request entry
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(PipelineError::configuration("query must not be empty"));
        }
        for (name, value) in [
            ("vector_threshold", self.vector_threshold),
            ("keyword_threshold", self.keyword_threshold),
            ("rerank_threshold", self.rerank_threshold),
            ("faq_direct_answer_threshold", self.faq_direct_answer_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::configuration(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.embedding_top_k == 0 || self.rerank_top_k == 0 {
            return Err(PipelineError::configuration("top-K values must be at least 1"));
        }
        if self.faq_score_boost <= 0.0 {
            return Err(PipelineError::configuration("faq_score_boost must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ExecutionContext {
        ExecutionContext::for_session(
            &AppConfig::default(),
            "s1",
            "如何使用知识库",
            vec![SearchTarget::knowledge_base("kb1")],
        )
    }

    #[test]
    fn test_seeded_from_config() {
        let ctx = context();
        assert_eq!(ctx.rerank_top_k, 5);
        assert_eq!(ctx.max_rounds, 5);
        assert!(ctx.validate().is_ok());
        assert_eq!(ctx.effective_query(), "如何使用知识库");
    }

    #[test]
    fn test_effective_query_prefers_rewrite() {
        let mut ctx = context();
        ctx.rewritten_query = Some("knowledge base usage guide".to_string());
        assert_eq!(ctx.effective_query(), "knowledge base usage guide");
    }

    #[test]
    fn test_snapshot_resets_results() {
        let mut ctx = context();
        ctx.rewritten_query = Some("rewritten".to_string());
        ctx.merge_result.push(SearchResult::text(
            "c1",
            "k1",
            "kb1",
            "body",
            ragline_common::types::MatchType::Embedding,
            0.9,
        ));
        ctx.user_content = "assembled".to_string();

        let snap = ctx.snapshot();
        assert_eq!(snap.rewritten_query.as_deref(), Some("rewritten"));
        assert_eq!(snap.rerank_top_k, ctx.rerank_top_k);
        assert!(snap.merge_result.is_empty());
        assert!(snap.user_content.is_empty());
    }

    #[test]
    fn test_context_shareable_across_tasks() {
        // Stages borrow the context across await points inside Send
        // futures, which requires the whole struct (raw stream included)
        // to be Sync.
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ExecutionContext>();
    }

    #[test]
    fn test_validate_rejects_bad_parameters() {
        let mut ctx = context();
        ctx.vector_threshold = 1.5;
        assert!(ctx.validate().is_err());

        let mut ctx = context();
        ctx.rerank_top_k = 0;
        assert!(ctx.validate().is_err());

        let mut ctx = context();
        ctx.query = "   ".to_string();
        assert!(ctx.validate().is_err());
    }
}
