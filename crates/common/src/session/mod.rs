//! Per-session scratch state for web-search enrichment
//!
//! Web search results are ingested into a temporary knowledge base scoped
//! to the session; this module tracks that scratch state (the temp KB,
//! the documents ingested into it, the URLs already fetched) with an
//! explicit lifecycle: load, save, delete. Cleanup is the caller's
//! responsibility when a session ends.

use crate::errors::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Scratch state accumulated by web-search enrichment for one session
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScratchState {
    /// Temporary knowledge base holding ingested web results
    #[serde(default)]
    pub temp_knowledge_base_id: Option<String>,

    /// Documents ingested into the temp knowledge base
    #[serde(default)]
    pub knowledge_ids: Vec<String>,

    /// URLs already fetched, so repeat questions skip refetching
    #[serde(default)]
    pub seen_urls: HashSet<String>,
}

impl ScratchState {
    /// Record one ingested page; returns false when the URL was already
    /// seen and nothing changed.
    pub fn record(&mut self, url: impl Into<String>, knowledge_id: impl Into<String>) -> bool {
        if !self.seen_urls.insert(url.into()) {
            return false;
        }
        self.knowledge_ids.push(knowledge_id.into());
        true
    }

    pub fn is_empty(&self) -> bool {
        self.temp_knowledge_base_id.is_none()
            && self.knowledge_ids.is_empty()
            && self.seen_urls.is_empty()
    }
}

/// Persistence for per-session scratch state
#[async_trait]
pub trait ScratchStore: Send + Sync {
    /// Load the state for a session; a session never seen yields the
    /// empty state.
    async fn load(&self, session_id: &str) -> Result<ScratchState>;

    /// Replace the stored state for a session
    async fn save(&self, session_id: &str, state: &ScratchState) -> Result<()>;

    /// Drop the state for a session; deleting an absent session is a no-op
    async fn delete(&self, session_id: &str) -> Result<()>;
}

/// In-memory scratch store
#[derive(Default)]
pub struct InMemoryScratchStore {
    states: RwLock<HashMap<String, ScratchState>>,
}

impl InMemoryScratchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScratchStore for InMemoryScratchStore {
    async fn load(&self, session_id: &str) -> Result<ScratchState> {
        let states =
            self.states.read().map_err(|_| PipelineError::store("session", "lock poisoned"))?;
        Ok(states.get(session_id).cloned().unwrap_or_default())
    }

    async fn save(&self, session_id: &str, state: &ScratchState) -> Result<()> {
        let mut states =
            self.states.write().map_err(|_| PipelineError::store("session", "lock poisoned"))?;
        states.insert(session_id.to_string(), state.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let mut states =
            self.states.write().map_err(|_| PipelineError::store("session", "lock poisoned"))?;
        states.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle() {
        let store = InMemoryScratchStore::new();

        let loaded = store.load("s1").await.unwrap();
        assert!(loaded.is_empty());

        let mut state = ScratchState::default();
        state.temp_knowledge_base_id = Some("tmp-kb".to_string());
        assert!(state.record("https://example.com/a", "k1"));
        assert!(!state.record("https://example.com/a", "k2"));
        assert_eq!(state.knowledge_ids, vec!["k1".to_string()]);

        store.save("s1", &state).await.unwrap();
        assert_eq!(store.load("s1").await.unwrap(), state);

        store.delete("s1").await.unwrap();
        assert!(store.load("s1").await.unwrap().is_empty());

        // Deleting twice is fine
        store.delete("s1").await.unwrap();
    }
}
