//! Core value types shared across the retrieval pipeline
//!
//! Provides:
//! - Search hits (`SearchResult`) with their retrieval provenance
//! - Dialogue history turns
//! - Knowledge-graph data
//! - Search scope targets and fallback policy

pub mod faq;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The retrieval method that produced a given result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Vector similarity search
    Embedding,
    /// Keyword/full-text search
    Keyword,
    /// FAQ hybrid search
    Faq,
    /// Knowledge-graph entity search
    Graph,
    /// Parent chunk pulled in for context
    ParentChunk,
    /// Chunk related by link/reference
    RelatedChunk,
    /// Chunk adjacent to a direct hit
    NearbyChunk,
    /// Recalled from conversation history
    History,
    /// Web search result
    WebSearch,
    /// Directly loaded document content
    DirectLoad,
    /// Output of a data-analysis tool
    DataAnalysis,
}

/// Kind of content held by a chunk
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Text,
    Faq,
    Table,
    Image,
}

/// Caption/OCR metadata for one image referenced by a chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImageInfo {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub original_url: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub ocr_text: String,
}

/// One scored retrieval hit.
///
/// Created by a retrieval stage and read-only afterward; rerank/merge
/// stages build new collections rather than mutating hits in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Hit ID (unique within a request)
    pub id: String,

    /// Chunk content
    pub content: String,

    /// Owning chunk ID (dedup key for the merge stage)
    pub chunk_id: String,

    /// Owning document/knowledge ID
    pub knowledge_id: String,

    /// Owning knowledge base ID
    pub knowledge_base_id: String,

    /// Position of the chunk within its document
    pub chunk_index: i32,

    /// Retrieval method that produced this hit
    pub match_type: MatchType,

    /// Relevance score (0.0 - 1.0)
    pub score: f32,

    /// Kind of content held by the chunk
    pub chunk_type: ChunkType,

    /// Image caption/OCR metadata, when the chunk embeds images
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_info: Vec<ImageInfo>,

    /// FAQ tag ID, set only for FAQ-typed hits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faq_tag_id: Option<String>,
}

impl SearchResult {
    /// Minimal text hit constructor; retrieval stages fill in provenance.
    pub fn text(
        chunk_id: impl Into<String>,
        knowledge_id: impl Into<String>,
        knowledge_base_id: impl Into<String>,
        content: impl Into<String>,
        match_type: MatchType,
        score: f32,
    ) -> Self {
        let chunk_id = chunk_id.into();
        Self {
            id: chunk_id.clone(),
            content: content.into(),
            chunk_id,
            knowledge_id: knowledge_id.into(),
            knowledge_base_id: knowledge_base_id.into(),
            chunk_index: 0,
            match_type,
            score,
            chunk_type: ChunkType::Text,
            image_info: Vec::new(),
            faq_tag_id: None,
        }
    }
}

/// One completed dialogue round, oldest-first in history lists.
///
/// The answer is stored with internal thinking markup already stripped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub query: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub knowledge_references: Vec<String>,
}

/// An entity recognized in the query or the corpus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEntity {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A relation between two graph entities
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphRelation {
    pub source: String,
    pub target: String,
    pub relation: String,
}

/// Knowledge-graph data gathered by the entity search branch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphData {
    pub entities: Vec<GraphEntity>,
    pub relations: Vec<GraphRelation>,
}

impl GraphData {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

/// One knowledge base to search, optionally narrowed to specific files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchTarget {
    pub knowledge_base_id: String,
    /// Empty means the whole knowledge base
    #[serde(default)]
    pub knowledge_ids: Vec<String>,
}

impl SearchTarget {
    pub fn knowledge_base(id: impl Into<String>) -> Self {
        Self { knowledge_base_id: id.into(), knowledge_ids: Vec::new() }
    }

    /// Whether a (kb, knowledge) pair falls inside this target
    pub fn matches(&self, knowledge_base_id: &str, knowledge_id: &str) -> bool {
        self.knowledge_base_id == knowledge_base_id
            && (self.knowledge_ids.is_empty()
                || self.knowledge_ids.iter().any(|k| k == knowledge_id))
    }
}

/// Policy applied when retrieval yields no usable context
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Respond with fixed canned text
    #[default]
    FixedResponse,
    /// Ask the model to respond using a fallback-specific prompt
    FallbackPrompt,
    /// Let the model respond unconstrained
    Unconstrained,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_target_scoping() {
        let whole = SearchTarget::knowledge_base("kb1");
        assert!(whole.matches("kb1", "any-file"));
        assert!(!whole.matches("kb2", "any-file"));

        let narrowed = SearchTarget {
            knowledge_base_id: "kb1".to_string(),
            knowledge_ids: vec!["f1".to_string()],
        };
        assert!(narrowed.matches("kb1", "f1"));
        assert!(!narrowed.matches("kb1", "f2"));
    }

    #[test]
    fn test_match_type_wire_names() {
        let json = serde_json::to_string(&MatchType::NearbyChunk).unwrap();
        assert_eq!(json, "\"nearby_chunk\"");
    }

    #[test]
    fn test_text_hit_defaults() {
        let hit = SearchResult::text("c1", "k1", "kb1", "body", MatchType::Embedding, 0.7);
        assert_eq!(hit.id, hit.chunk_id);
        assert_eq!(hit.chunk_type, ChunkType::Text);
        assert!(hit.faq_tag_id.is_none());
    }
}
