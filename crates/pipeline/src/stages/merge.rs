//! Merge stage
//!
//! Takes the reranked candidates and produces the final context set:
//! flags a high-confidence FAQ (pre-boost score at or above the direct
//! answer threshold), boosts FAQ scores (capped at 1.0), deduplicates by
//! chunk ID with the first occurrence winning, coalesces adjacent chunks
//! of the same document into one passage, and sorts by score descending
//! with ties kept in the candidate order the reranker produced. An empty
//! output is a policy outcome handled by the fallback decision, never an
//! error. `FilterTopK` truncates the merged set.

use crate::context::ExecutionContext;
use crate::registry::{Stage, StageControl, StageId};
use ragline_common::errors::{PipelineError, Result};
use ragline_common::events::CancelToken;
use ragline_common::types::{ChunkType, SearchResult};
use std::collections::{HashMap, HashSet};

pub struct MergeStage;

/// Drop repeated chunk IDs, keeping the first occurrence
fn dedup_by_chunk_id(results: Vec<(usize, SearchResult)>) -> Vec<(usize, SearchResult)> {
    let mut seen = HashSet::new();
    results.into_iter().filter(|(_, r)| seen.insert(r.chunk_id.clone())).collect()
}

/// Join document chunks with consecutive indexes from the same document
/// into a single passage. FAQ hits are never coalesced. Each result is
/// tagged with its candidate position; a coalesced passage keeps the
/// smallest position among its members so the final tie-break can fall
/// back to the pre-merge order.
fn coalesce_adjacent(results: Vec<(usize, SearchResult)>) -> Vec<(usize, SearchResult)> {
    let (faq, docs): (Vec<_>, Vec<_>) =
        results.into_iter().partition(|(_, r)| r.chunk_type == ChunkType::Faq);

    let mut groups: HashMap<String, Vec<(usize, SearchResult)>> = HashMap::new();
    let mut group_order: Vec<String> = Vec::new();
    for (position, hit) in docs {
        if !groups.contains_key(&hit.knowledge_id) {
            group_order.push(hit.knowledge_id.clone());
        }
        groups.entry(hit.knowledge_id.clone()).or_default().push((position, hit));
    }

    let mut merged: Vec<(usize, SearchResult)> = faq;
    for knowledge_id in group_order {
        let mut members = groups.remove(&knowledge_id).unwrap_or_default();
        members.sort_by_key(|(_, r)| r.chunk_index);

        let mut run: Option<(usize, SearchResult)> = None;
        for (position, hit) in members {
            match run.as_mut() {
                Some((run_position, prev)) if hit.chunk_index == prev.chunk_index + 1 => {
                    prev.content.push_str("\n\n");
                    prev.content.push_str(&hit.content);
                    prev.chunk_index = hit.chunk_index;
                    prev.score = prev.score.max(hit.score);
                    prev.image_info.extend(hit.image_info);
                    *run_position = (*run_position).min(position);
                }
                _ => {
                    if let Some(done) = run.take() {
                        merged.push(done);
                    }
                    run = Some((position, hit));
                }
            }
        }
        if let Some(done) = run.take() {
            merged.push(done);
        }
    }

    merged
}

#[async_trait::async_trait]
impl Stage for MergeStage {
    fn activation_stages(&self) -> Vec<StageId> {
        vec![StageId::ChunkMerge, StageId::FilterTopK]
    }

    async fn run(
        &self,
        stage: StageId,
        ctx: &mut ExecutionContext,
        cancel: &CancelToken,
    ) -> Result<StageControl> {
        cancel.check()?;

        match stage {
            StageId::ChunkMerge => {
                let mut results = ctx.rerank_result.clone();

                if ctx.faq_priority_enabled {
                    // High-confidence detection runs on pre-boost scores
                    ctx.high_confidence_faq = results
                        .iter()
                        .find(|r| {
                            r.chunk_type == ChunkType::Faq
                                && r.score >= ctx.faq_direct_answer_threshold
                        })
                        .cloned();
                    if let Some(faq) = &ctx.high_confidence_faq {
                        tracing::debug!(
                            chunk_id = %faq.chunk_id,
                            score = faq.score,
                            "high confidence faq hit"
                        );
                    }

                    for result in &mut results {
                        if result.chunk_type == ChunkType::Faq {
                            result.score = (result.score * ctx.faq_score_boost).min(1.0);
                        }
                    }
                }

                let indexed: Vec<(usize, SearchResult)> =
                    results.into_iter().enumerate().collect();
                let mut merged = coalesce_adjacent(dedup_by_chunk_id(indexed));
                // Score descending; equal scores keep the candidate order
                merged.sort_by(|a, b| {
                    b.1.score
                        .partial_cmp(&a.1.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.0.cmp(&b.0))
                });

                tracing::debug!(
                    input = ctx.rerank_result.len(),
                    merged = merged.len(),
                    "merge finished"
                );
                ctx.merge_result = merged.into_iter().map(|(_, r)| r).collect();
            }
            StageId::FilterTopK => {
                ctx.merge_result.truncate(ctx.rerank_top_k);
            }
            other => {
                return Err(PipelineError::internal("merge", format!("unexpected stage {other}")));
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
    use ragline_common::types::{MatchType, SearchTarget};

    fn context() -> ExecutionContext {
        ExecutionContext::for_session(
            &AppConfig::default(),
            "s1",
            "q",
            vec![SearchTarget::knowledge_base("kb1")],
        )
    }

    fn doc(chunk_id: &str, knowledge_id: &str, index: i32, score: f32) -> SearchResult {
        let mut hit = SearchResult::text(
            chunk_id,
            knowledge_id,
            "kb1",
            format!("passage {chunk_id}"),
            MatchType::Embedding,
            score,
        );
        hit.chunk_index = index;
        hit
    }

    fn faq(id: &str, score: f32) -> SearchResult {
        let mut hit = SearchResult::text(id, "k-faq", "kb1", "faq answer", MatchType::Faq, score);
        hit.chunk_type = ChunkType::Faq;
        hit.faq_tag_id = Some("tag".to_string());
        hit
    }

    async fn run_merge(ctx: &mut ExecutionContext) {
        let (_h, token) = cancel_pair();
        MergeStage.run(StageId::ChunkMerge, ctx, &token).await.unwrap();
    }

    #[tokio::test]
    async fn test_dedup_first_wins_and_sorted() {
        let mut ctx = context();
        ctx.rerank_result = vec![
            doc("c1", "k1", 0, 0.6),
            doc("c1", "k1", 0, 0.9),
            doc("c9", "k2", 5, 0.8),
        ];
        run_merge(&mut ctx).await;

        assert_eq!(ctx.merge_result.len(), 2);
        // First occurrence of c1 kept its 0.6 score, so c9 leads
        assert_eq!(ctx.merge_result[0].chunk_id, "c9");
        assert!(ctx.merge_result[0].score >= ctx.merge_result[1].score);
    }

    #[tokio::test]
    async fn test_equal_scores_keep_candidate_order() {
        let mut ctx = context();
        // The reranker ranked c9 ahead of c1; both end at the same score,
        // so c9 must still come out first.
        ctx.rerank_result = vec![doc("c9", "k2", 5, 0.8), doc("c1", "k1", 0, 0.8)];
        run_merge(&mut ctx).await;

        let ids: Vec<&str> = ctx.merge_result.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c9", "c1"]);
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let mut ctx = context();
        ctx.rerank_result =
            vec![doc("c1", "k1", 0, 0.7), doc("c5", "k2", 3, 0.9), faq("f1", 0.5)];
        run_merge(&mut ctx).await;
        let first = ctx.merge_result.clone();

        ctx.rerank_result = first.clone();
        run_merge(&mut ctx).await;
        let ids_first: Vec<&str> = first.iter().map(|r| r.chunk_id.as_str()).collect();
        let ids_second: Vec<&str> = ctx.merge_result.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids_first, ids_second);
    }

    #[tokio::test]
    async fn test_adjacent_chunks_coalesce() {
        let mut ctx = context();
        ctx.rerank_result = vec![
            doc("c1", "k1", 2, 0.6),
            doc("c2", "k1", 3, 0.8),
            doc("c3", "k1", 7, 0.5),
            doc("c4", "k2", 3, 0.4),
        ];
        run_merge(&mut ctx).await;

        // c1+c2 merge (consecutive in k1); c3 and c4 stay separate
        assert_eq!(ctx.merge_result.len(), 3);
        let merged = ctx.merge_result.iter().find(|r| r.chunk_id == "c1").unwrap();
        assert!(merged.content.contains("passage c1"));
        assert!(merged.content.contains("passage c2"));
        assert_eq!(merged.score, 0.8);
    }

    #[tokio::test]
    async fn test_faq_boost_capped_and_high_confidence_flag() {
        let mut ctx = context();
        ctx.faq_priority_enabled = true;
        ctx.faq_direct_answer_threshold = 0.9;
        ctx.faq_score_boost = 1.5;
        ctx.rerank_result = vec![faq("f1", 0.92), doc("c1", "k1", 0, 0.95)];
        run_merge(&mut ctx).await;

        // Flag is set from the pre-boost score; boost caps at 1.0
        assert_eq!(ctx.high_confidence_faq.as_ref().unwrap().chunk_id, "f1");
        assert_eq!(ctx.high_confidence_faq.as_ref().unwrap().score, 0.92);
        let boosted = ctx.merge_result.iter().find(|r| r.chunk_id == "f1").unwrap();
        assert_eq!(boosted.score, 1.0);
        assert_eq!(ctx.merge_result[0].chunk_id, "f1");
    }

    #[tokio::test]
    async fn test_no_high_confidence_below_threshold() {
        let mut ctx = context();
        ctx.faq_priority_enabled = true;
        ctx.faq_direct_answer_threshold = 0.9;
        ctx.rerank_result = vec![faq("f1", 0.7)];
        run_merge(&mut ctx).await;
        assert!(ctx.high_confidence_faq.is_none());
    }

    #[tokio::test]
    async fn test_empty_input_is_not_an_error() {
        let mut ctx = context();
        run_merge(&mut ctx).await;
        assert!(ctx.merge_result.is_empty());
    }

    #[tokio::test]
    async fn test_filter_top_k_truncates() {
        let mut ctx = context();
        ctx.rerank_top_k = 2;
        ctx.merge_result =
            vec![doc("c1", "k1", 0, 0.9), doc("c2", "k2", 0, 0.8), doc("c3", "k3", 0, 0.7)];

        let (_h, token) = cancel_pair();
        MergeStage.run(StageId::FilterTopK, &mut ctx, &token).await.unwrap();
        assert_eq!(ctx.merge_result.len(), 2);
        assert_eq!(ctx.merge_result[0].chunk_id, "c1");
    }
}
