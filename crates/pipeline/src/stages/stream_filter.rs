//! Stream filter stage
//!
//! Consumes the raw token feed parked by the completion stage, strips
//! `<think>…</think>` spans (including markers split across chunk
//! boundaries), forwards the visible deltas to the event sink in order,
//! and accumulates the complete visible answer. Emits the terminal `Done`
//! event, with the cancelled flag when the caller stopped the request
//! mid-stream.

use crate::context::ExecutionContext;
use crate::registry::{Stage, StageControl, StageId};
use futures::StreamExt;
use ragline_common::errors::{PipelineError, Result};
use ragline_common::events::{CancelToken, StreamEvent};
use ragline_common::providers::{ChatResponse, ChatStreamChunk};

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Incremental `<think>` span remover.
///
/// Keeps at most one partial marker in its carry buffer, so a tag split
/// across any number of chunks is still recognized. Text inside a span is
/// discarded; a dangling partial marker at end of stream is ordinary text
/// and is returned by `flush`.
pub(crate) struct ThinkFilter {
    inside: bool,
    carry: String,
}

impl ThinkFilter {
    pub(crate) fn new() -> Self {
        Self { inside: false, carry: String::new() }
    }

    /// Feed one chunk, get the visible text it releases
    pub(crate) fn push(&mut self, delta: &str) -> String {
        let mut buf = std::mem::take(&mut self.carry);
        buf.push_str(delta);

        let mut out = String::new();
        loop {
            if self.inside {
                match buf.find(THINK_CLOSE) {
                    Some(pos) => {
                        buf.drain(..pos + THINK_CLOSE.len());
                        self.inside = false;
                    }
                    None => {
                        // Drop the hidden text, keep only a potential
                        // partial close marker
                        let keep = partial_suffix(&buf, THINK_CLOSE);
                        self.carry = buf[buf.len() - keep..].to_string();
                        return out;
                    }
                }
            } else {
                match buf.find(THINK_OPEN) {
                    Some(pos) => {
                        out.push_str(&buf[..pos]);
                        buf.drain(..pos + THINK_OPEN.len());
                        self.inside = true;
                    }
                    None => {
                        let keep = partial_suffix(&buf, THINK_OPEN);
                        out.push_str(&buf[..buf.len() - keep]);
                        self.carry = buf[buf.len() - keep..].to_string();
                        return out;
                    }
                }
            }
        }
    }

    /// End of stream: release a dangling partial marker as text. Text
    /// still inside an unterminated span stays hidden.
    pub(crate) fn flush(&mut self) -> String {
        if self.inside {
            self.carry.clear();
            String::new()
        } else {
            std::mem::take(&mut self.carry)
        }
    }
}

/// Length of the longest proper marker prefix the buffer ends with. The
/// markers are ASCII, so the returned length is always a char boundary.
fn partial_suffix(buf: &str, marker: &str) -> usize {
    let max = (marker.len() - 1).min(buf.len());
    for k in (1..=max).rev() {
        if buf.is_char_boundary(buf.len() - k) && buf.ends_with(&marker[..k]) {
            return k;
        }
    }
    0
}

/// Strip think spans from complete text (history answers)
pub(crate) fn strip_think_tags(text: &str) -> String {
    let mut filter = ThinkFilter::new();
    let mut out = filter.push(text);
    out.push_str(&filter.flush());
    out.trim().to_string()
}

pub struct StreamFilterStage;

#[async_trait::async_trait]
impl Stage for StreamFilterStage {
    fn activation_stages(&self) -> Vec<StageId> {
        vec![StageId::StreamFilter]
    }

    async fn run(
        &self,
        _stage: StageId,
        ctx: &mut ExecutionContext,
        cancel: &CancelToken,
    ) -> Result<StageControl> {
        let mut stream = ctx
            .raw_stream
            .take()
            .ok_or_else(|| PipelineError::internal("stream_filter", "no raw stream to filter"))?;
        let sink = ctx
            .sink
            .clone()
            .ok_or_else(|| PipelineError::internal("stream_filter", "no event sink wired"))?;

        let mut filter = ThinkFilter::new();
        let mut answer = String::new();
        let mut usage = None;
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                chunk = stream.next() => match chunk {
                    None => break,
                    Some(Err(e)) => return Err(e),
                    Some(Ok(ChatStreamChunk::Done { usage: u })) => {
                        usage = u.or(usage);
                        break;
                    }
                    Some(Ok(ChatStreamChunk::ToolCall { name, arguments })) => {
                        sink.emit(StreamEvent::ToolCall { name, arguments }).await?;
                    }
                    Some(Ok(ChatStreamChunk::Content { delta })) => {
                        let visible = filter.push(&delta);
                        if !visible.is_empty() {
                            answer.push_str(&visible);
                            sink.emit(StreamEvent::AnswerDelta { delta: visible }).await?;
                        }
                    }
                },
            }
        }

        if !cancelled {
            let tail = filter.flush();
            if !tail.is_empty() {
                answer.push_str(&tail);
                sink.emit(StreamEvent::AnswerDelta { delta: tail }).await?;
            }
        }

        tracing::debug!(
            answer_len = answer.len(),
            cancelled,
            "stream filter finished"
        );

        ctx.chat_response = Some(ChatResponse { content: answer.clone(), usage });
        sink.emit(StreamEvent::Done { answer, cancelled }).await?;

        if cancelled {
            Ok(StageControl::Halt)
        } else {
            Ok(StageControl::Continue)
        }
    }
}
