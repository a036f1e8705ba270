//! History loading stage
//!
//! Reads the session's conversation log, pairs user messages with their
//! assistant replies by request ID, strips thinking markup from the
//! answers, drops incomplete pairs, and keeps the most recent
//! `max_rounds` turns in chronological order. A store failure degrades to
//! an empty history; it never aborts the chain.

use crate::context::ExecutionContext;
use crate::registry::{Stage, StageControl, StageId};
use crate::stages::stream_filter::strip_think_tags;
use ragline_common::errors::Result;
use ragline_common::events::CancelToken;
use ragline_common::stores::{MessageService, StoredMessage};
use ragline_common::types::HistoryTurn;
use std::collections::HashMap;
use std::sync::Arc;

pub struct HistoryStage {
    messages: Arc<dyn MessageService>,
}

impl HistoryStage {
    pub fn new(messages: Arc<dyn MessageService>) -> Self {
        Self { messages }
    }
}

/// Pair the raw log into completed turns, oldest first
fn pair_turns(messages: Vec<StoredMessage>, max_rounds: usize) -> Vec<HistoryTurn> {
    struct Pending {
        query: Option<StoredMessage>,
        answer: Option<StoredMessage>,
    }

    let mut by_request: HashMap<String, Pending> = HashMap::new();
    let mut request_order: Vec<String> = Vec::new();

    for message in messages {
        let entry = by_request.entry(message.request_id.clone()).or_insert_with(|| {
            request_order.push(message.request_id.clone());
            Pending { query: None, answer: None }
        });
        match message.role.as_str() {
            "user" => entry.query = Some(message),
            "assistant" => entry.answer = Some(message),
            _ => {}
        }
    }

    let mut turns: Vec<HistoryTurn> = request_order
        .into_iter()
        .filter_map(|request_id| {
            let pending = by_request.remove(&request_id)?;
            let query = pending.query?;
            let answer = pending.answer?;
            if !answer.is_completed {
                return None;
            }
            let cleaned = strip_think_tags(&answer.content);
            if cleaned.is_empty() {
                return None;
            }
            Some(HistoryTurn {
                query: query.content,
                answer: cleaned,
                created_at: query.created_at,
                knowledge_references: answer.knowledge_references,
            })
        })
        .collect();

    turns.sort_by_key(|t| t.created_at);
    let skip = turns.len().saturating_sub(max_rounds);
    turns.into_iter().skip(skip).collect()
}

#[async_trait::async_trait]
impl Stage for HistoryStage {
    fn activation_stages(&self) -> Vec<StageId> {
        vec![StageId::LoadHistory]
    }

    async fn run(
        &self,
        _stage: StageId,
        ctx: &mut ExecutionContext,
        _cancel: &CancelToken,
    ) -> Result<StageControl> {
        // Fetch a window larger than max_rounds pairs so incomplete rows
        // do not starve the history
        let limit = ctx.max_rounds * 4;
        match self.messages.recent(&ctx.session_id, limit).await {
            Ok(messages) => {
                ctx.history = pair_turns(messages, ctx.max_rounds);
                tracing::debug!(
                    session_id = %ctx.session_id,
                    rounds = ctx.history.len(),
                    "history loaded"
                );
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %ctx.session_id,
                    error = %e,
                    "history load failed, continuing without history"
                );
                ctx.history.clear();
            }
        }
        Ok(StageControl::Continue)
    }
}
