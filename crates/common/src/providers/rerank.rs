//! HTTP reranker adapter
//!
//! Speaks the wire format shared by Jina/Cohere-style rerank endpoints:
//! POST a query and document list, get back per-document relevance scores.

use super::{Reranker, RerankScore};
use crate::errors::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reranker backed by an external rerank HTTP endpoint
pub struct HttpReranker {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    endpoint: String,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

impl HttpReranker {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PipelineError::configuration(format!("HTTP client: {e}")))?;

        Ok(Self { client, api_key, model: model.into(), endpoint: endpoint.into() })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankScore>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let request = RerankRequest { model: &self.model, query, documents };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PipelineError::rerank("rerank", format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::rerank("rerank", format!("API error {status}: {text}")));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::rerank("rerank", format!("bad response: {e}")))?;

        let mut scores = Vec::with_capacity(parsed.results.len());
        for result in parsed.results {
            if result.index >= documents.len() {
                return Err(PipelineError::rerank(
                    "rerank",
                    format!("result index {} out of range", result.index),
                ));
            }
            scores.push(RerankScore { index: result.index, score: result.relevance_score });
        }

        Ok(scores)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
