#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunker;
pub mod expansion;
pub mod extractor;
pub mod pipeline;
pub mod sources;

pub use expansion::{
    driver::{ExpansionDriver, ExpansionOptions, ExpansionReport},
    link_discovery::LinkDiscovery,
    work_queue::{ClaimedArticle, QueueStats, WorkQueue},
};
pub use pipeline::{ArticleProcessor, ProcessOutcome};
pub use sources::{ContentSource, ParsedSection, SourceArticle, SourceError, SourceType};
