//! Stage contract and dispatcher
//!
//! Stages are registered once at composition time under the stage IDs
//! they handle. Dispatch is an iterative cursor over a pipeline
//! definition: each stage runs to completion and returns `Continue` or
//! `Halt`; an error aborts the chain and propagates. Cancellation is
//! observed at every stage boundary.

use crate::context::ExecutionContext;
use ragline_common::errors::{PipelineError, Result};
use ragline_common::events::CancelToken;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Identifier of one pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    LoadHistory,
    RewriteQuery,
    ChunkSearch,
    ChunkSearchParallel,
    EntitySearch,
    FaqSearch,
    ChunkRerank,
    ChunkMerge,
    FilterTopK,
    IntoChatMessage,
    ChatCompletion,
    ChatCompletionStream,
    StreamFilter,
}

impl StageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::LoadHistory => "load_history",
            StageId::RewriteQuery => "rewrite_query",
            StageId::ChunkSearch => "chunk_search",
            StageId::ChunkSearchParallel => "chunk_search_parallel",
            StageId::EntitySearch => "entity_search",
            StageId::FaqSearch => "faq_search",
            StageId::ChunkRerank => "chunk_rerank",
            StageId::ChunkMerge => "chunk_merge",
            StageId::FilterTopK => "filter_top_k",
            StageId::IntoChatMessage => "into_chat_message",
            StageId::ChatCompletion => "chat_completion",
            StageId::ChatCompletionStream => "chat_completion_stream",
            StageId::StreamFilter => "stream_filter",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the dispatcher does after a stage returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageControl {
    /// Advance to the next stage in the definition
    Continue,
    /// Stop the chain cleanly; remaining stages do not run
    Halt,
}

/// One unit of pipeline work. A single implementation may handle several
/// stage IDs (the ID is passed back into `run`).
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    /// Stage IDs this implementation handles
    fn activation_stages(&self) -> Vec<StageId>;

    /// Execute one stage against the context
    async fn run(
        &self,
        stage: StageId,
        ctx: &mut ExecutionContext,
        cancel: &CancelToken,
    ) -> Result<StageControl>;
}

/// Stage lookup plus the dispatch loop
#[derive(Default)]
pub struct StageRegistry {
    stages: HashMap<StageId, Arc<dyn Stage>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage under every ID it declares. A second registration
    /// for the same ID is a wiring mistake and fails.
    pub fn register(&mut self, stage: Arc<dyn Stage>) -> Result<()> {
        for id in stage.activation_stages() {
            if self.stages.insert(id, Arc::clone(&stage)).is_some() {
                return Err(PipelineError::configuration(format!(
                    "stage {id} registered twice"
                )));
            }
        }
        Ok(())
    }

    /// Verify a pipeline definition resolves completely. Run at startup so
    /// a missing stage fails the composition, not a request.
    pub fn validate(&self, pipeline: &[StageId]) -> Result<()> {
        for id in pipeline {
            if !self.stages.contains_key(id) {
                return Err(PipelineError::configuration(format!("stage {id} not registered")));
            }
        }
        Ok(())
    }

    /// Drive one request through a pipeline definition
    pub async fn run(
        &self,
        pipeline: &[StageId],
        ctx: &mut ExecutionContext,
        cancel: &CancelToken,
    ) -> Result<()> {
        for &id in pipeline {
            cancel.check()?;

            let stage = self
                .stages
                .get(&id)
                .ok_or_else(|| PipelineError::configuration(format!("stage {id} not registered")))?;

            let span = tracing::info_span!("stage", stage = id.as_str(), session_id = %ctx.session_id);
            let start = Instant::now();
            let outcome = stage.run(id, ctx, cancel).instrument(span).await;

            metrics::histogram!("ragline_stage_duration_seconds", "stage" => id.as_str())
                .record(start.elapsed().as_secs_f64());

            match outcome {
                Ok(StageControl::Continue) => {}
                Ok(StageControl::Halt) => {
                    tracing::debug!(stage = id.as_str(), "pipeline halted");
                    return Ok(());
                }
                Err(e) => {
                    metrics::counter!("ragline_stage_errors_total", "stage" => id.as_str())
                        .increment(1);
                    if !e.is_cancelled() {
                        tracing::error!(stage = id.as_str(), error = %e, "stage failed");
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
