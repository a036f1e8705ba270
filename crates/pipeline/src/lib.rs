//! Retrieval-augmented question-answering pipeline engine
//!
//! A request flows through a named pipeline definition: query rewrite,
//! parallel chunk/entity retrieval, FAQ hybrid search, rerank, merge,
//! message assembly, and blocking or streaming completion. The engine is
//! the composition root; storage and model providers are injected behind
//! the traits in `ragline-common`.

pub mod context;
pub mod engine;
pub mod fallback;
pub mod pipelines;
pub mod prompt;
pub mod registry;
pub mod stages;

pub use context::ExecutionContext;
pub use engine::PipelineEngine;
pub use fallback::FallbackDecision;
pub use pipelines::PipelineSet;
pub use registry::{Stage, StageControl, StageId, StageRegistry};
