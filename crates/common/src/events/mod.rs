//! Streaming events and cancellation primitives
//!
//! Each streaming request gets a bounded event channel: stages push
//! `StreamEvent`s through an `EventSink` and the caller drains the paired
//! `EventStream`. Backpressure blocks the producing stage; events are
//! never dropped or reordered. A watch-based cancel pair lets the caller
//! stop generation mid-stream, and the `StopRegistry` maps live requests
//! to their cancel handles.

use crate::errors::{ErrorKind, PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::{mpsc, watch};

/// One event on a streaming response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A fragment of the answer text
    AnswerDelta { delta: String },
    /// A tool invocation surfaced by the model
    ToolCall { name: String, arguments: String },
    /// Fatal failure; always followed by `Done`
    Error { kind: ErrorKind, message: String },
    /// Terminal event; exactly one per request
    Done {
        /// Complete answer with thinking markup stripped
        answer: String,
        /// Whether the request was cancelled before completion
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        cancelled: bool,
    },
}

/// An event tagged with the request it belongs to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub message_id: String,
    #[serde(flatten)]
    pub event: StreamEvent,
}

/// Producer half of a request's event channel
#[derive(Clone)]
pub struct EventSink {
    message_id: String,
    tx: mpsc::Sender<EventEnvelope>,
}

impl EventSink {
    /// Push one event; blocks while the channel is full. A closed channel
    /// (consumer went away) is reported so the producer can stop early.
    pub async fn emit(&self, event: StreamEvent) -> Result<()> {
        let envelope = EventEnvelope { message_id: self.message_id.clone(), event };
        self.tx
            .send(envelope)
            .await
            .map_err(|_| PipelineError::internal("events", "event consumer dropped"))
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }
}

/// Consumer half of a request's event channel
pub struct EventStream {
    rx: mpsc::Receiver<EventEnvelope>,
}

impl EventStream {
    /// Next event, or None once all sinks are dropped
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        self.rx.recv().await
    }

    /// Drain every remaining event (test helper, blocks until the
    /// producer side closes)
    pub async fn collect(mut self) -> Vec<EventEnvelope> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

/// Create the bounded event channel for one streaming request
pub fn event_channel(message_id: impl Into<String>, capacity: usize) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSink { message_id: message_id.into(), tx }, EventStream { rx })
}

/// Caller-side handle that requests cancellation
#[derive(Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation; idempotent
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Pipeline-side token polled between deltas and stages
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Error form for `?`-style early exit from a stage
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once cancellation fires. Never resolves when the handle is
    /// gone without having fired, so select! arms using this simply stay
    /// pending.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// A token that can never fire, for non-streaming entry points
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }
}

/// Create a linked cancel handle/token pair
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Live-request index mapping (session, message) to its cancel handle.
///
/// Registration happens when a streaming run starts and is removed on
/// every exit path, so a stale entry never outlives its request.
#[derive(Default)]
pub struct StopRegistry {
    handles: RwLock<HashMap<(String, String), CancelHandle>>,
}

impl StopRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session_id: &str, message_id: &str, handle: CancelHandle) {
        if let Ok(mut handles) = self.handles.write() {
            handles.insert((session_id.to_string(), message_id.to_string()), handle);
        }
    }

    pub fn deregister(&self, session_id: &str, message_id: &str) {
        if let Ok(mut handles) = self.handles.write() {
            handles.remove(&(session_id.to_string(), message_id.to_string()));
        }
    }

    /// Cancel a live request. Returns false when no such request exists
    /// (already finished or never started).
    pub fn stop(&self, session_id: &str, message_id: &str) -> bool {
        let Ok(handles) = self.handles.read() else { return false };
        match handles.get(&(session_id.to_string(), message_id.to_string())) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (sink, mut stream) = event_channel("m1", 8);
        sink.emit(StreamEvent::AnswerDelta { delta: "a".to_string() }).await.unwrap();
        sink.emit(StreamEvent::AnswerDelta { delta: "b".to_string() }).await.unwrap();
        sink.emit(StreamEvent::Done { answer: "ab".to_string(), cancelled: false })
            .await
            .unwrap();
        drop(sink);

        let first = stream.next().await.unwrap();
        assert_eq!(first.message_id, "m1");
        assert_eq!(first.event, StreamEvent::AnswerDelta { delta: "a".to_string() });

        let rest = stream.collect().await;
        assert_eq!(rest.len(), 2);
        assert!(matches!(rest.last().unwrap().event, StreamEvent::Done { .. }));
    }

    #[tokio::test]
    async fn test_emit_reports_dropped_consumer() {
        let (sink, stream) = event_channel("m1", 1);
        drop(stream);
        let err = sink
            .emit(StreamEvent::AnswerDelta { delta: "x".to_string() })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalError);
    }

    #[test]
    fn test_cancel_pair() {
        let (handle, token) = cancel_pair();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());

        handle.cancel();
        assert!(token.is_cancelled());
        assert!(token.check().unwrap_err().is_cancelled());

        // Idempotent
        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_stop_registry_lifecycle() {
        let registry = StopRegistry::new();
        let (handle, token) = cancel_pair();

        assert!(!registry.stop("s1", "m1"));

        registry.register("s1", "m1", handle);
        assert!(registry.stop("s1", "m1"));
        assert!(token.is_cancelled());

        registry.deregister("s1", "m1");
        assert!(!registry.stop("s1", "m1"));
    }

    #[test]
    fn test_event_wire_format() {
        let envelope = EventEnvelope {
            message_id: "m1".to_string(),
            event: StreamEvent::AnswerDelta { delta: "hi".to_string() },
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "answer_delta");
        assert_eq!(json["message_id"], "m1");
        assert_eq!(json["delta"], "hi");
    }
}
