//! Composition root
//!
//! `PipelineEngine` wires the stages, validates every pipeline definition
//! against the registry at construction, and owns the stop registry for
//! live streaming requests. Streaming runs are driven on a spawned task;
//! fatal errors are translated into terminal events so the consumer
//! always observes exactly one `Done`.

use crate::context::ExecutionContext;
use crate::pipelines::PipelineSet;
use crate::registry::StageRegistry;
use crate::stages::{
    AssemblyStage, CompletionStage, FaqStage, HistoryStage, MergeStage, RerankStage, RewriteStage,
    SearchStage, StreamFilterStage,
};
use ragline_common::config::AppConfig;
use ragline_common::errors::Result;
use ragline_common::events::{
    cancel_pair, event_channel, CancelToken, EventStream, StopRegistry, StreamEvent,
};
use ragline_common::providers::ProviderRegistry;
use ragline_common::session::ScratchStore;
use ragline_common::stores::{MessageService, SearchStore};
use ragline_common::types::SearchTarget;
use std::sync::Arc;

pub struct PipelineEngine {
    config: AppConfig,
    registry: StageRegistry,
    pipelines: PipelineSet,
    stops: StopRegistry,
    scratch: Arc<dyn ScratchStore>,
}

impl PipelineEngine {
    pub fn new(
        config: AppConfig,
        providers: Arc<ProviderRegistry>,
        search_store: Arc<dyn SearchStore>,
        messages: Arc<dyn MessageService>,
        scratch: Arc<dyn ScratchStore>,
    ) -> Result<Self> {
        let mut registry = StageRegistry::new();
        registry.register(Arc::new(HistoryStage::new(Arc::clone(&messages))))?;
        registry.register(Arc::new(RewriteStage::new(Arc::clone(&providers))))?;
        registry.register(Arc::new(SearchStage::new(
            Arc::clone(&search_store),
            Arc::clone(&providers),
        )))?;
        registry.register(Arc::new(FaqStage::new(
            Arc::clone(&search_store),
            Arc::clone(&providers),
        )))?;
        registry.register(Arc::new(RerankStage::new(Arc::clone(&providers))))?;
        registry.register(Arc::new(MergeStage))?;
        registry.register(Arc::new(AssemblyStage))?;
        registry.register(Arc::new(CompletionStage::new(Arc::clone(&providers))))?;
        registry.register(Arc::new(StreamFilterStage))?;

        let pipelines = PipelineSet::standard();
        for (_, stages) in pipelines.iter() {
            registry.validate(stages)?;
        }

        Ok(Self { config, registry, pipelines, stops: StopRegistry::new(), scratch })
    }

    /// Context for one question, seeded from this engine's configuration
    pub fn context(
        &self,
        session_id: impl Into<String>,
        query: impl Into<String>,
        targets: Vec<SearchTarget>,
    ) -> ExecutionContext {
        ExecutionContext::for_session(&self.config, session_id, query, targets)
    }

    /// Blocking entry point; the answer lands in `ctx.chat_response`
    pub async fn run(&self, pipeline: &str, ctx: &mut ExecutionContext) -> Result<()> {
        ctx.validate()?;
        let stages = self.pipelines.get(pipeline)?;
        self.registry.run(stages, ctx, &CancelToken::never()).await
    }

    /// Streaming entry point for the `*_stream` pipelines.
    ///
    /// The returned stream yields the request's events in order and ends
    /// after the terminal `Done`. The request is stoppable through
    /// `stop(session_id, message_id)` until then.
    pub async fn run_streaming(
        self: &Arc<Self>,
        pipeline: &str,
        mut ctx: ExecutionContext,
    ) -> Result<EventStream> {
        ctx.validate()?;
        let stages = self.pipelines.get(pipeline)?.to_vec();

        let (sink, events) =
            event_channel(ctx.message_id.clone(), self.config.events.sink_capacity);
        let (handle, token) = cancel_pair();
        self.stops.register(&ctx.session_id, &ctx.message_id, handle);
        ctx.sink = Some(sink.clone());

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let session_id = ctx.session_id.clone();
            let message_id = ctx.message_id.clone();

            match engine.registry.run(&stages, &mut ctx, &token).await {
                // The stream filter already emitted the terminal event
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {
                    // Cancelled before the stream filter took over
                    let _ = sink
                        .emit(StreamEvent::Done { answer: String::new(), cancelled: true })
                        .await;
                }
                Err(e) => {
                    tracing::error!(
                        session_id = %session_id,
                        pipeline_error = %e,
                        "streaming run failed"
                    );
                    let _ = sink
                        .emit(StreamEvent::Error { kind: e.kind(), message: e.to_string() })
                        .await;
                    let _ = sink
                        .emit(StreamEvent::Done { answer: String::new(), cancelled: false })
                        .await;
                }
            }

            engine.stops.deregister(&session_id, &message_id);
        });

        Ok(events)
    }

    /// Cancel a live streaming request; false when it is not running
    pub fn stop(&self, session_id: &str, message_id: &str) -> bool {
        self.stops.stop(session_id, message_id)
    }

    /// Drop all per-session scratch state (web-search temp knowledge).
    /// Safe to call after cancellation or repeated completion.
    pub async fn cleanup_session(&self, session_id: &str) -> Result<()> {
        self.scratch.delete(session_id).await
    }
}
