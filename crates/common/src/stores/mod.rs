//! Storage abstractions for retrieval and conversation history
//!
//! `SearchStore` covers the four retrieval surfaces the pipeline draws
//! from (vector, keyword, FAQ, knowledge graph). `MessageService` covers
//! the conversation log. In-memory implementations back tests and offline
//! runs; production deployments plug in their own stores.

use crate::errors::{PipelineError, Result};
use crate::types::faq::{FaqContent, FaqSearchParams, UNTAGGED_TAG_ID};
use crate::types::{
    ChunkType, GraphData, GraphEntity, GraphRelation, ImageInfo, MatchType, SearchResult,
    SearchTarget,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// One stored document chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub knowledge_id: String,
    pub knowledge_base_id: String,
    pub chunk_index: i32,
    pub content: String,
    #[serde(default)]
    pub image_info: Vec<ImageInfo>,
}

/// One stored FAQ entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaqRecord {
    pub id: String,
    pub knowledge_id: String,
    pub knowledge_base_id: String,
    /// None means uncategorized (matched under `UNTAGGED_TAG_ID`)
    #[serde(default)]
    pub tag_id: Option<String>,
    pub content: FaqContent,
}

/// Retrieval surfaces searched by the pipeline
#[async_trait]
pub trait SearchStore: Send + Sync {
    /// Vector similarity search over document chunks. Both the query text
    /// and its embedding are passed; index-backed stores use the vector,
    /// lexical approximations may use the text.
    async fn vector_search(
        &self,
        query: &str,
        query_embedding: &[f32],
        targets: &[SearchTarget],
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<SearchResult>>;

    /// Keyword/full-text search over document chunks
    async fn keyword_search(
        &self,
        query: &str,
        targets: &[SearchTarget],
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<SearchResult>>;

    /// Hybrid FAQ search with two-tier tag precedence
    async fn faq_search(
        &self,
        query: &str,
        query_embedding: &[f32],
        targets: &[SearchTarget],
        params: &FaqSearchParams,
    ) -> Result<Vec<SearchResult>>;

    /// Knowledge-graph lookup for the given entity names
    async fn graph_search(&self, entities: &[String], targets: &[SearchTarget])
        -> Result<GraphData>;
}

/// One row of the conversation log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub session_id: String,
    /// Pairs a user message with its assistant reply
    pub request_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub knowledge_references: Vec<String>,
    /// Incomplete assistant rows (interrupted generations) are skipped
    /// when history is loaded
    #[serde(default)]
    pub is_completed: bool,
}

/// Conversation log access
#[async_trait]
pub trait MessageService: Send + Sync {
    /// Most recent messages for a session, oldest first
    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<StoredMessage>>;

    /// Append one message to the session log
    async fn append(&self, message: StoredMessage) -> Result<()>;
}

/// Character-bigram overlap similarity in [0, 1].
///
/// Token-free, so it behaves sensibly for CJK text where whitespace
/// tokenization yields a single token per sentence.
fn bigram_similarity(a: &str, b: &str) -> f32 {
    fn bigrams(s: &str) -> HashSet<(char, char)> {
        let chars: Vec<char> = s.to_lowercase().chars().filter(|c| !c.is_whitespace()).collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    }

    let a_grams = bigrams(a);
    let b_grams = bigrams(b);
    if a_grams.is_empty() || b_grams.is_empty() {
        return 0.0;
    }

    let overlap = a_grams.intersection(&b_grams).count();
    overlap as f32 / a_grams.len().min(b_grams.len()) as f32
}

fn in_scope(targets: &[SearchTarget], knowledge_base_id: &str, knowledge_id: &str) -> bool {
    targets.iter().any(|t| t.matches(knowledge_base_id, knowledge_id))
}

/// In-memory retrieval store.
///
/// Vector similarity is approximated with character-bigram overlap so the
/// store is fully deterministic; thresholds and top-K behave exactly as
/// they would against a real index.
#[derive(Default)]
pub struct InMemorySearchStore {
    chunks: RwLock<Vec<ChunkRecord>>,
    faqs: RwLock<Vec<FaqRecord>>,
    graph: RwLock<GraphData>,
}

impl InMemorySearchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_chunk(&self, record: ChunkRecord) -> Result<()> {
        let mut chunks =
            self.chunks.write().map_err(|_| PipelineError::store("store", "lock poisoned"))?;
        chunks.push(record);
        Ok(())
    }

    pub fn insert_faq(&self, record: FaqRecord) -> Result<()> {
        let mut faqs =
            self.faqs.write().map_err(|_| PipelineError::store("store", "lock poisoned"))?;
        faqs.push(record);
        Ok(())
    }

    pub fn insert_entity(&self, entity: GraphEntity, relations: Vec<GraphRelation>) -> Result<()> {
        let mut graph =
            self.graph.write().map_err(|_| PipelineError::store("store", "lock poisoned"))?;
        graph.entities.push(entity);
        graph.relations.extend(relations);
        Ok(())
    }

    fn chunk_search(
        &self,
        query: &str,
        targets: &[SearchTarget],
        threshold: f32,
        top_k: usize,
        match_type: MatchType,
    ) -> Result<Vec<SearchResult>> {
        let chunks =
            self.chunks.read().map_err(|_| PipelineError::store("store", "lock poisoned"))?;

        let mut hits: Vec<SearchResult> = chunks
            .iter()
            .filter(|c| in_scope(targets, &c.knowledge_base_id, &c.knowledge_id))
            .filter_map(|c| {
                let score = bigram_similarity(query, &c.content);
                if score < threshold {
                    return None;
                }
                let mut hit = SearchResult::text(
                    c.chunk_id.clone(),
                    c.knowledge_id.clone(),
                    c.knowledge_base_id.clone(),
                    c.content.clone(),
                    match_type,
                    score,
                );
                hit.chunk_index = c.chunk_index;
                hit.image_info = c.image_info.clone();
                Some(hit)
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Best similarity of the query against an entry's positive questions,
    /// zeroed when a negative question matches at least as well.
    fn faq_score(query: &str, content: &FaqContent) -> f32 {
        let positive = std::iter::once(content.standard_question.as_str())
            .chain(content.similar_questions.iter().map(String::as_str))
            .map(|q| bigram_similarity(query, q))
            .fold(0.0_f32, f32::max);

        let negative = content
            .negative_questions
            .iter()
            .map(|q| bigram_similarity(query, q))
            .fold(0.0_f32, f32::max);

        if negative >= positive && negative > 0.0 {
            0.0
        } else {
            positive
        }
    }

    fn faq_tier(
        &self,
        query: &str,
        targets: &[SearchTarget],
        params: &FaqSearchParams,
        tag_ids: Option<&[String]>,
    ) -> Result<Vec<SearchResult>> {
        let faqs = self.faqs.read().map_err(|_| PipelineError::store("store", "lock poisoned"))?;

        let mut hits: Vec<SearchResult> = faqs
            .iter()
            .filter(|f| in_scope(targets, &f.knowledge_base_id, &f.knowledge_id))
            .filter(|f| match tag_ids {
                None => true,
                Some(ids) => {
                    let tag = f.tag_id.as_deref().unwrap_or(UNTAGGED_TAG_ID);
                    ids.iter().any(|id| id == tag)
                }
            })
            .filter_map(|f| {
                let score = Self::faq_score(query, &f.content);
                if score < params.vector_threshold {
                    return None;
                }
                let answer = f.content.select_answers().join("\n");
                let mut hit = SearchResult::text(
                    f.id.clone(),
                    f.knowledge_id.clone(),
                    f.knowledge_base_id.clone(),
                    answer,
                    MatchType::Faq,
                    score,
                );
                hit.chunk_type = ChunkType::Faq;
                hit.faq_tag_id =
                    Some(f.tag_id.clone().unwrap_or_else(|| UNTAGGED_TAG_ID.to_string()));
                Some(hit)
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(params.match_count);
        Ok(hits)
    }
}

#[async_trait]
impl SearchStore for InMemorySearchStore {
    async fn vector_search(
        &self,
        query: &str,
        _query_embedding: &[f32],
        targets: &[SearchTarget],
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        self.chunk_search(query, targets, threshold, top_k, MatchType::Embedding)
    }

    async fn keyword_search(
        &self,
        query: &str,
        targets: &[SearchTarget],
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        self.chunk_search(query, targets, threshold, top_k, MatchType::Keyword)
    }

    async fn faq_search(
        &self,
        query: &str,
        _query_embedding: &[f32],
        targets: &[SearchTarget],
        params: &FaqSearchParams,
    ) -> Result<Vec<SearchResult>> {
        // First-priority tags win outright; second-priority tags are
        // consulted only when the first tier comes back empty. The lists
        // restrict the hit scope, so a miss in both tiers is an empty
        // result. With no priority lists at all, every entry competes
        // equally; untagged entries join a tier via UNTAGGED_TAG_ID.
        if !params.first_priority_tag_ids.is_empty() {
            let hits = self.faq_tier(query, targets, params, Some(&params.first_priority_tag_ids))?;
            if !hits.is_empty() {
                return Ok(hits);
            }
        }

        if !params.second_priority_tag_ids.is_empty() {
            let hits =
                self.faq_tier(query, targets, params, Some(&params.second_priority_tag_ids))?;
            if !hits.is_empty() {
                return Ok(hits);
            }
        }

        if params.first_priority_tag_ids.is_empty() && params.second_priority_tag_ids.is_empty() {
            return self.faq_tier(query, targets, params, None);
        }

        Ok(Vec::new())
    }

    async fn graph_search(
        &self,
        entities: &[String],
        _targets: &[SearchTarget],
    ) -> Result<GraphData> {
        let graph = self.graph.read().map_err(|_| PipelineError::store("store", "lock poisoned"))?;

        let entities: Vec<GraphEntity> = graph
            .entities
            .iter()
            .filter(|e| entities.iter().any(|name| name == &e.name))
            .cloned()
            .collect();

        let names: HashSet<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        let relations: Vec<GraphRelation> = graph
            .relations
            .iter()
            .filter(|r| names.contains(r.source.as_str()) || names.contains(r.target.as_str()))
            .cloned()
            .collect();

        Ok(GraphData { entities, relations })
    }
}

/// In-memory conversation log
#[derive(Default)]
pub struct InMemoryMessageService {
    sessions: RwLock<HashMap<String, Vec<StoredMessage>>>,
}

impl InMemoryMessageService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageService for InMemoryMessageService {
    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let sessions =
            self.sessions.read().map_err(|_| PipelineError::store("store", "lock poisoned"))?;

        let Some(messages) = sessions.get(session_id) else {
            return Ok(Vec::new());
        };

        let mut sorted = messages.clone();
        sorted.sort_by_key(|m| m.created_at);
        let skip = sorted.len().saturating_sub(limit);
        Ok(sorted.into_iter().skip(skip).collect())
    }

    async fn append(&self, message: StoredMessage) -> Result<()> {
        let mut sessions =
            self.sessions.write().map_err(|_| PipelineError::store("store", "lock poisoned"))?;
        sessions.entry(message.session_id.clone()).or_default().push(message);
        Ok(())
    }
}
