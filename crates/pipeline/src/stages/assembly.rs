//! Message assembly stage
//!
//! Validates the user query, renders the merged context into the request
//! template, and records the fallback decision when there is nothing to
//! ground an answer on. With FAQ priority enabled the context block is
//! split into a curated-FAQ section and a reference-document section;
//! otherwise it is a flat numbered list. Entities and relations found by
//! the entity search branch are appended as a knowledge-graph facts
//! section. Image captions and OCR text are inlined next to their
//! Markdown references.

use crate::context::ExecutionContext;
use crate::fallback::FallbackDecision;
use crate::prompt;
use crate::registry::{Stage, StageControl, StageId};
use chrono::Utc;
use ragline_common::errors::{PipelineError, Result};
use ragline_common::events::CancelToken;
use ragline_common::sanitize::validate_input;
use ragline_common::types::{ChunkType, GraphData, ImageInfo, SearchResult};
use regex_lite::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

pub struct AssemblyStage;

fn markdown_image_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\[[^\]]*\]\(([^)]+)\)").unwrap())
}

/// Inline caption/OCR text after each referenced Markdown image, and
/// append a trailing block for images the text never references.
fn enrich_with_images(content: &str, images: &[ImageInfo]) -> String {
    if images.is_empty() {
        return content.to_string();
    }

    let mut by_url: HashMap<&str, &ImageInfo> = HashMap::new();
    for image in images {
        if !image.url.is_empty() {
            by_url.insert(image.url.as_str(), image);
        }
        if !image.original_url.is_empty() {
            by_url.insert(image.original_url.as_str(), image);
        }
    }

    let mut enriched = content.to_string();
    let mut referenced: Vec<&str> = Vec::new();

    for capture in markdown_image_regex().captures_iter(content) {
        let whole = match capture.get(0) {
            Some(m) => m.as_str(),
            None => continue,
        };
        let url = match capture.get(1) {
            Some(m) => m.as_str(),
            None => continue,
        };
        referenced.push(url);

        if let Some(image) = by_url.get(url) {
            let mut replacement = format!("{whole}\n");
            if !image.caption.is_empty() {
                replacement.push_str(&format!("Image caption: {}\n", image.caption));
            }
            if !image.ocr_text.is_empty() {
                replacement.push_str(&format!("Image text: {}\n", image.ocr_text));
            }
            enriched = enriched.replacen(whole, &replacement, 1);
        }
    }

    let mut extra_lines: Vec<String> = Vec::new();
    for image in images {
        if referenced.contains(&image.url.as_str())
            || referenced.contains(&image.original_url.as_str())
        {
            continue;
        }
        if !image.caption.is_empty() {
            extra_lines.push(format!("Caption of image {}: {}", image.url, image.caption));
        }
        if !image.ocr_text.is_empty() {
            extra_lines.push(format!("Text of image {}: {}", image.url, image.ocr_text));
        }
    }

    if !extra_lines.is_empty() {
        if !enriched.is_empty() {
            enriched.push_str("\n\n");
        }
        enriched.push_str("Additional image information:\n");
        enriched.push_str(&extra_lines.join("\n"));
    }

    enriched
}

fn passage(result: &SearchResult) -> String {
    enrich_with_images(&result.content, &result.image_info)
}

/// Knowledge-graph facts rendered as plain lines for the context block
fn graph_facts(graph: &GraphData) -> String {
    let mut lines: Vec<String> = Vec::new();
    for entity in &graph.entities {
        if entity.description.is_empty() {
            lines.push(format!("- {}", entity.name));
        } else {
            lines.push(format!("- {}: {}", entity.name, entity.description));
        }
    }
    for relation in &graph.relations {
        lines.push(format!("- {} {} {}", relation.source, relation.relation, relation.target));
    }
    lines.join("\n")
}

/// Build the contexts block, split by source when FAQ priority applies
fn build_contexts(ctx: &ExecutionContext) -> String {
    let mut block = String::new();

    if ctx.faq_priority_enabled {
        let (faqs, docs): (Vec<_>, Vec<_>) =
            ctx.merge_result.iter().partition(|r| r.chunk_type == ChunkType::Faq);

        if !faqs.is_empty() {
            block.push_str("### Source 1: Curated FAQ answers\n");
            block.push_str("[High confidence, prefer these]\n");
            for (i, result) in faqs.iter().enumerate() {
                if i == 0 && ctx.high_confidence_faq.is_some() {
                    block.push_str(&format!("[FAQ-{}] (exact match) {}\n", i + 1, passage(result)));
                } else {
                    block.push_str(&format!("[FAQ-{}] {}\n", i + 1, passage(result)));
                }
            }
            if !docs.is_empty() {
                block.push_str("\n### Source 2: Reference documents\n");
                block.push_str("[Supplementary, consult when the FAQ does not answer]\n");
                for (i, result) in docs.iter().enumerate() {
                    block.push_str(&format!("[DOC-{}] {}\n", i + 1, passage(result)));
                }
            }
            return block;
        }
    }

    for (i, result) in ctx.merge_result.iter().enumerate() {
        if i > 0 {
            block.push_str("\n\n");
        }
        block.push_str(&format!("[{}] {}", i + 1, passage(result)));
    }
    block
}

#[async_trait::async_trait]
impl Stage for AssemblyStage {
    fn activation_stages(&self) -> Vec<StageId> {
        vec![StageId::IntoChatMessage]
    }

    async fn run(
        &self,
        _stage: StageId,
        ctx: &mut ExecutionContext,
        cancel: &CancelToken,
    ) -> Result<StageControl> {
        cancel.check()?;

        let safe_query = validate_input(&ctx.query)
            .ok_or_else(|| PipelineError::content_safety("into_chat_message"))?;

        // Nothing to ground on: decide the fallback once, here
        if ctx.merge_result.is_empty()
            && ctx.high_confidence_faq.is_none()
            && ctx.graph_result.is_empty()
        {
            ctx.fallback_decision = Some(FallbackDecision::decide(
                ctx.fallback_strategy,
                &ctx.fallback_response,
                &ctx.fallback_prompt,
                &safe_query,
            ));
            tracing::debug!(strategy = ?ctx.fallback_strategy, "empty context, fallback decided");
            return Ok(StageControl::Continue);
        }

        let mut contexts = build_contexts(ctx);
        if !ctx.graph_result.is_empty() {
            if !contexts.is_empty() {
                contexts.push_str("\n\n");
            }
            contexts.push_str("Knowledge graph facts:\n");
            contexts.push_str(&graph_facts(&ctx.graph_result));
        }

        let mut vars = prompt::time_vars(Utc::now());
        vars.push(("query", safe_query));
        vars.push(("contexts", contexts));

        ctx.user_content = prompt::render(&ctx.context_template, &vars);
        tracing::debug!(
            user_content_len = ctx.user_content.len(),
            faq_priority = ctx.faq_priority_enabled,
            "chat message assembled"
        );
        Ok(StageControl::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragline_common::config::AppConfig;
    use ragline_common::events::cancel_pair;
    use ragline_common::types::{
        FallbackStrategy, GraphEntity, GraphRelation, MatchType, SearchTarget,
    };

    fn context(query: &str) -> ExecutionContext {
        ExecutionContext::for_session(
            &AppConfig::default(),
            "s1",
            query,
            vec![SearchTarget::knowledge_base("kb1")],
        )
    }

    fn doc(id: &str, content: &str, score: f32) -> SearchResult {
        SearchResult::text(id, "k1", "kb1", content, MatchType::Embedding, score)
    }

    async fn run(ctx: &mut ExecutionContext) -> Result<StageControl> {
        let (_h, token) = cancel_pair();
        AssemblyStage.run(StageId::IntoChatMessage, ctx, &token).await
    }

    #[tokio::test]
    async fn test_numbered_list_and_placeholders() {
        let mut ctx = context("如何使用知识库");
        ctx.merge_result = vec![doc("c1", "first passage", 0.9), doc("c2", "second passage", 0.8)];
        run(&mut ctx).await.unwrap();

        assert!(ctx.user_content.contains("[1] first passage"));
        assert!(ctx.user_content.contains("[2] second passage"));
        assert!(ctx.user_content.contains("如何使用知识库"));
        assert!(!ctx.user_content.contains("{{contexts}}"));
        assert!(!ctx.user_content.contains("{{current_time}}"));
        assert!(ctx.fallback_decision.is_none());
    }

    #[tokio::test]
    async fn test_faq_sections_and_exact_match_marker() {
        let mut ctx = context("how to reset");
        ctx.faq_priority_enabled = true;
        let mut faq_hit = doc("f1", "faq answer", 1.0);
        faq_hit.chunk_type = ChunkType::Faq;
        ctx.high_confidence_faq = Some(faq_hit.clone());
        ctx.merge_result = vec![faq_hit, doc("c1", "doc passage", 0.7)];
        run(&mut ctx).await.unwrap();

        assert!(ctx.user_content.contains("Source 1: Curated FAQ answers"));
        assert!(ctx.user_content.contains("[FAQ-1] (exact match) faq answer"));
        assert!(ctx.user_content.contains("Source 2: Reference documents"));
        assert!(ctx.user_content.contains("[DOC-1] doc passage"));
    }

    #[tokio::test]
    async fn test_graph_facts_rendered_into_context() {
        let mut ctx = context("how do the services connect");
        ctx.merge_result = vec![doc("c1", "first passage", 0.9)];
        ctx.graph_result = GraphData {
            entities: vec![GraphEntity {
                name: "gateway".to_string(),
                description: "request entry point".to_string(),
            }],
            relations: vec![GraphRelation {
                source: "gateway".to_string(),
                target: "retriever".to_string(),
                relation: "routes to".to_string(),
            }],
        };
        run(&mut ctx).await.unwrap();

        assert!(ctx.user_content.contains("Knowledge graph facts:"));
        assert!(ctx.user_content.contains("- gateway: request entry point"));
        assert!(ctx.user_content.contains("- gateway routes to retriever"));
    }

    #[tokio::test]
    async fn test_graph_only_context_skips_fallback() {
        let mut ctx = context("anything");
        ctx.graph_result = GraphData {
            entities: vec![GraphEntity {
                name: "知识库".to_string(),
                description: String::new(),
            }],
            relations: Vec::new(),
        };
        run(&mut ctx).await.unwrap();

        assert!(ctx.fallback_decision.is_none());
        assert!(ctx.user_content.contains("- 知识库"));
    }

    #[tokio::test]
    async fn test_empty_merge_records_fallback() {
        let mut ctx = context("anything");
        ctx.fallback_strategy = FallbackStrategy::FixedResponse;
        run(&mut ctx).await.unwrap();

        assert!(matches!(ctx.fallback_decision, Some(FallbackDecision::Fixed(_))));
        assert!(ctx.user_content.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_query_is_fatal() {
        let mut ctx = context("<script>alert(1)</script>");
        ctx.merge_result = vec![doc("c1", "passage", 0.9)];
        let err = run(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), ragline_common::errors::ErrorKind::ContentSafety);
    }

    #[test]
    fn test_image_enrichment_inline_and_trailing() {
        let images = vec![
            ImageInfo {
                url: "img/a.png".to_string(),
                original_url: String::new(),
                caption: "architecture diagram".to_string(),
                ocr_text: "module A -> module B".to_string(),
            },
            ImageInfo {
                url: "img/b.png".to_string(),
                original_url: String::new(),
                caption: "unreferenced chart".to_string(),
                ocr_text: String::new(),
            },
        ];
        let enriched = enrich_with_images("See ![diagram](img/a.png) for details.", &images);

        assert!(enriched.contains("![diagram](img/a.png)\nImage caption: architecture diagram"));
        assert!(enriched.contains("Image text: module A -> module B"));
        assert!(enriched.contains("Additional image information:"));
        assert!(enriched.contains("Caption of image img/b.png: unreferenced chart"));
    }

    #[test]
    fn test_image_enrichment_without_images_is_identity() {
        assert_eq!(enrich_with_images("plain text", &[]), "plain text");
    }
}
