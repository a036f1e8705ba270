//! Configuration management for the ragline engine
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with RAGLINE__)
//! - Configuration files (config/default, config/<env>, config/local)
//! - Default values
//!
//! These values seed the per-request execution context; a request may
//! override any of them through its own parameters.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Conversation defaults (history bounds, fallback text)
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Retrieval defaults (thresholds, top-K counts)
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// FAQ priority strategy defaults
    #[serde(default)]
    pub faq: FaqConfig,

    /// Chat model configuration
    #[serde(default)]
    pub chat: ChatConfig,

    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Rerank model configuration
    #[serde(default)]
    pub rerank: RerankConfig,

    /// Event sink configuration
    #[serde(default)]
    pub events: EventConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConversationConfig {
    /// Maximum history rounds used for rewrite/context
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Canned text used by the fixed-response fallback strategy
    #[serde(default = "default_fallback_response")]
    pub fallback_response: String,

    /// Prompt template used by the model-based fallback strategy
    #[serde(default = "default_fallback_prompt")]
    pub fallback_prompt: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Minimum score for vector search hits
    #[serde(default = "default_vector_threshold")]
    pub vector_threshold: f32,

    /// Minimum score for keyword search hits
    #[serde(default = "default_keyword_threshold")]
    pub keyword_threshold: f32,

    /// Raw hits per retrieval source
    #[serde(default = "default_embedding_top_k")]
    pub embedding_top_k: usize,

    /// Minimum rerank score to keep a candidate
    #[serde(default = "default_rerank_threshold")]
    pub rerank_threshold: f32,

    /// Candidates kept after reranking
    #[serde(default = "default_rerank_top_k")]
    pub rerank_top_k: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FaqConfig {
    /// Whether FAQ priority is enabled by default
    #[serde(default)]
    pub priority_enabled: bool,

    /// Score at or above which a FAQ hit counts as a direct answer
    #[serde(default = "default_faq_direct_answer_threshold")]
    pub direct_answer_threshold: f32,

    /// Multiplier applied to FAQ scores before the final merge sort
    #[serde(default = "default_faq_score_boost")]
    pub score_boost: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatConfig {
    /// Chat provider: openai, mock
    #[serde(default = "default_chat_provider")]
    pub provider: String,

    /// API key for the chat service
    pub api_key: Option<String>,

    /// API base URL (for OpenAI-compatible endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_chat_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for the embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerankConfig {
    /// Rerank provider: http, mock
    #[serde(default = "default_rerank_provider")]
    pub provider: String,

    /// API key for the rerank service
    pub api_key: Option<String>,

    /// Rerank endpoint URL
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_rerank_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventConfig {
    /// Bounded capacity of the per-request event sink. Backpressure blocks
    /// the producing stage; events are never dropped.
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,
}

// Default value functions
fn default_max_rounds() -> usize { 5 }
fn default_fallback_response() -> String {
    "No relevant content was found in the selected knowledge bases.".to_string()
}
fn default_fallback_prompt() -> String {
    "The knowledge base has no content relevant to the question below. \
     Tell the user so, briefly, and suggest how they might rephrase.\n\nQuestion: {{query}}"
        .to_string()
}
fn default_vector_threshold() -> f32 { 0.5 }
fn default_keyword_threshold() -> f32 { 0.3 }
fn default_embedding_top_k() -> usize { 10 }
fn default_rerank_threshold() -> f32 { 0.5 }
fn default_rerank_top_k() -> usize { 5 }
fn default_faq_direct_answer_threshold() -> f32 { 0.9 }
fn default_faq_score_boost() -> f32 { 1.2 }
fn default_chat_provider() -> String { "openai".to_string() }
fn default_chat_model() -> String { "gpt-4o-mini".to_string() }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 1536 }
fn default_rerank_provider() -> String { "http".to_string() }
fn default_rerank_model() -> String { "jina-reranker-v2-base-multilingual".to_string() }
fn default_provider_timeout() -> u64 { 30 }
fn default_max_retries() -> u32 { 3 }
fn default_sink_capacity() -> usize { 64 }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("RAGLINE_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with RAGLINE__ prefix
            // e.g., RAGLINE__RETRIEVAL__RERANK_TOP_K=8
            .add_source(
                Environment::with_prefix("RAGLINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        // Every section defaults, so an empty environment yields the same
        // values as AppConfig::default().
        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("RAGLINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            conversation: ConversationConfig::default(),
            retrieval: RetrievalConfig::default(),
            faq: FaqConfig::default(),
            chat: ChatConfig::default(),
            embedding: EmbeddingConfig::default(),
            rerank: RerankConfig::default(),
            events: EventConfig::default(),
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            fallback_response: default_fallback_response(),
            fallback_prompt: default_fallback_prompt(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_threshold: default_vector_threshold(),
            keyword_threshold: default_keyword_threshold(),
            embedding_top_k: default_embedding_top_k(),
            rerank_threshold: default_rerank_threshold(),
            rerank_top_k: default_rerank_top_k(),
        }
    }
}

impl Default for FaqConfig {
    fn default() -> Self {
        Self {
            priority_enabled: false,
            direct_answer_threshold: default_faq_direct_answer_threshold(),
            score_boost: default_faq_score_boost(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_chat_provider(),
            api_key: None,
            api_base: None,
            model: default_chat_model(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_provider_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: default_rerank_provider(),
            api_key: None,
            api_base: None,
            model: default_rerank_model(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { sink_capacity: default_sink_capacity() }
    }
}
