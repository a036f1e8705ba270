//! Pipeline stage implementations

pub mod assembly;
pub mod completion;
pub mod faq;
pub mod history;
pub mod merge;
pub mod rerank;
pub mod rewrite;
pub mod search;
pub mod stream_filter;

pub use assembly::AssemblyStage;
pub use completion::CompletionStage;
pub use faq::FaqStage;
pub use history::HistoryStage;
pub use merge::MergeStage;
pub use rerank::RerankStage;
pub use rewrite::RewriteStage;
pub use search::SearchStage;
pub use stream_filter::StreamFilterStage;
