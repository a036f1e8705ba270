//! FAQ content descriptors and the content hash used for idempotent
//! re-import and duplicate detection.
//!
//! Two FAQ entries with the same semantic content (same questions and
//! answers, regardless of ordering or incidental whitespace) must produce
//! the same hash. The hash is recomputed whenever FAQ content is written.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Special tag ID representing uncategorized entries
pub const UNTAGGED_TAG_ID: &str = "__untagged__";

/// How the answer list is returned to the caller
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStrategy {
    /// Return all answers joined together
    #[default]
    All,
    /// Return one answer picked at random
    Random,
}

/// Curated question/answer record searched alongside document chunks
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FaqContent {
    pub standard_question: String,
    #[serde(default)]
    pub similar_questions: Vec<String>,
    /// Questions this entry must NOT be matched against
    #[serde(default)]
    pub negative_questions: Vec<String>,
    #[serde(default)]
    pub answers: Vec<String>,
    #[serde(default)]
    pub answer_strategy: AnswerStrategy,
}

impl FaqContent {
    /// Trim whitespace and drop duplicates, preserving first-seen order.
    pub fn normalize(&mut self) {
        self.standard_question = self.standard_question.trim().to_string();
        self.similar_questions = normalize_strings(&self.similar_questions);
        self.negative_questions = normalize_strings(&self.negative_questions);
        self.answers = normalize_strings(&self.answers);
    }

    /// Content hash over the normalized question/answer sets.
    ///
    /// List fields are sorted before hashing so entry order never affects
    /// the result; the standard question, each list, and the answers are
    /// joined with distinct separators to keep field boundaries unambiguous.
    pub fn content_hash(&self) -> String {
        let mut normalized = self.clone();
        normalized.normalize();

        let mut similar = normalized.similar_questions;
        similar.sort();
        let mut negative = normalized.negative_questions;
        negative.sort();
        let mut answers = normalized.answers;
        answers.sort();

        let material = format!(
            "{}|{}|{}|{}",
            normalized.standard_question,
            similar.join(","),
            negative.join(","),
            answers.join(","),
        );

        let digest = Sha256::digest(material.as_bytes());
        hex::encode(digest)
    }

    /// Answers selected per the configured strategy
    pub fn select_answers(&self) -> Vec<String> {
        match self.answer_strategy {
            AnswerStrategy::All => self.answers.clone(),
            AnswerStrategy::Random => {
                if self.answers.is_empty() {
                    Vec::new()
                } else {
                    let idx = rand::thread_rng().gen_range(0..self.answers.len());
                    vec![self.answers[idx].clone()]
                }
            }
        }
    }
}

/// Parameters for the hybrid FAQ search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaqSearchParams {
    /// Minimum vector similarity to keep a hit
    pub vector_threshold: f32,
    /// Maximum hits returned
    pub match_count: usize,
    /// Tag IDs with the highest match precedence
    #[serde(default)]
    pub first_priority_tag_ids: Vec<String>,
    /// Tag IDs matched only when no first-priority hit exists
    #[serde(default)]
    pub second_priority_tag_ids: Vec<String>,
}

fn normalize_strings(values: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(v.to_string()))
        .map(|v| v.to_string())
        .collect()
}
