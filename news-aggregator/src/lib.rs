pub mod aggregator;
pub mod analysis;
pub mod config;
pub mod extractor;
pub mod fetcher;
pub mod llm_adapter;
pub mod parser;
pub mod pipeline;
pub mod sources;
pub mod store;
pub mod traits;
pub mod types;

pub use types::*;
pub use aggregator::Ingester;
pub use analysis::{AnalysisEngine, ProcessOptions};
pub use config::{AppConfig, SourceConfig, SourceKind};
pub use extractor::ContentExtractor;
pub use fetcher::Fetcher;
pub use llm_adapter::{MockAnalyzer, OpenAiAnalyzer};
pub use parser::{FeedParser, ParsedFeed};
pub use pipeline::ContentPipeline;
pub use sources::{FeedSource, RnzFeedSource, RssFeedSource};
pub use store::{ArticleStore, StoreStats};
pub use traits::{AnalysisRequest, HtmlFetch, PullFeed, StructuredAnalyzer};
