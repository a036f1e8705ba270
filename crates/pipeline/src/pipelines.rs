//! Named pipeline definitions
//!
//! Each chat mode maps to an immutable stage sequence. Definitions are
//! data, not code; the dispatcher walks them against the stage registry.

use crate::registry::StageId;
use ragline_common::errors::{PipelineError, Result};
use std::collections::HashMap;

/// The set of named pipeline definitions known to the engine
pub struct PipelineSet {
    definitions: HashMap<String, Vec<StageId>>,
}

impl PipelineSet {
    /// The standard chat modes
    pub fn standard() -> Self {
        use StageId::*;

        let mut definitions = HashMap::new();
        // Plain chat, no retrieval
        definitions.insert("chat".to_string(), vec![ChatCompletion]);
        definitions.insert("chat_stream".to_string(), vec![ChatCompletionStream, StreamFilter]);
        // Streaming chat with conversation history
        definitions.insert(
            "chat_history_stream".to_string(),
            vec![LoadHistory, ChatCompletionStream, StreamFilter],
        );
        // Retrieval-augmented, blocking
        definitions.insert(
            "rag".to_string(),
            vec![ChunkSearch, FaqSearch, ChunkRerank, ChunkMerge, IntoChatMessage, ChatCompletion],
        );
        // Retrieval-augmented, streaming, with rewrite and parallel search
        definitions.insert(
            "rag_stream".to_string(),
            vec![
                RewriteQuery,
                ChunkSearchParallel,
                FaqSearch,
                ChunkRerank,
                ChunkMerge,
                FilterTopK,
                IntoChatMessage,
                ChatCompletionStream,
                StreamFilter,
            ],
        );

        Self { definitions }
    }

    pub fn get(&self, name: &str) -> Result<&[StageId]> {
        self.definitions
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| PipelineError::configuration(format!("unknown pipeline: {name}")))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[StageId])> {
        self.definitions.iter().map(|(name, stages)| (name.as_str(), stages.as_slice()))
    }
}
