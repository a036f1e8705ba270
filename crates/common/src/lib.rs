//! Shared foundation for the ragline pipeline engine
//!
//! Holds everything the pipeline crate builds on: error and result types,
//! configuration, core value types, provider traits with their adapters,
//! store traits with in-memory implementations, streaming events and
//! cancellation, input validation, and per-session scratch state.

pub mod config;
pub mod errors;
pub mod events;
pub mod providers;
pub mod sanitize;
pub mod session;
pub mod stores;
pub mod types;

pub use config::AppConfig;
pub use errors::{ErrorKind, PipelineError, Result};
pub use events::{
    cancel_pair, event_channel, CancelHandle, CancelToken, EventEnvelope, EventSink, EventStream,
    StopRegistry, StreamEvent,
};
pub use providers::{
    Chat, ChatDeltaStream, ChatMessage, ChatOptions, ChatResponse, ChatStreamChunk, Embedder,
    ProviderRegistry, Reranker, RerankScore, TokenUsage,
};
pub use stores::{MessageService, SearchStore, StoredMessage};
pub use types::{
    ChunkType, FallbackStrategy, GraphData, HistoryTurn, ImageInfo, MatchType, SearchResult,
    SearchTarget,
};
