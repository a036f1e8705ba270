//! Fallback policy for empty retrieval
//!
//! When retrieval yields nothing usable, the configured strategy decides
//! what the completion stage does. The decision is evaluated exactly once,
//! by the assembly stage, so the completion stages never re-derive it.

use crate::prompt;
use ragline_common::types::FallbackStrategy;

/// Resolved fallback action, recorded on the execution context
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackDecision {
    /// Answer with fixed canned text, no model call needed
    Fixed(String),
    /// Ask the model with a fallback-specific user prompt
    Prompt(String),
    /// Let the model answer the raw question unconstrained
    Unconstrained,
}

impl FallbackDecision {
    /// Evaluate the strategy against the request's fallback parameters
    pub fn decide(
        strategy: FallbackStrategy,
        fallback_response: &str,
        fallback_prompt: &str,
        query: &str,
    ) -> Self {
        match strategy {
            FallbackStrategy::FixedResponse => Self::Fixed(fallback_response.to_string()),
            FallbackStrategy::FallbackPrompt => {
                Self::Prompt(prompt::render(fallback_prompt, &[("query", query.to_string())]))
            }
            FallbackStrategy::Unconstrained => Self::Unconstrained,
        }
    }
}
