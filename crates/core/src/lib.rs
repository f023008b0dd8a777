pub mod canonical;
pub mod config;
pub mod executor;
pub mod fetcher;
pub mod frontier;
pub mod html;
pub mod orchestrator;
pub mod plugins;
pub mod worker;

pub use config::{Config, CrawlerSettings, DomainRules, SourceProfile};
pub use executor::{Executor, RunOutcome};
pub use fetcher::{FetchResult, Fetcher, HttpFetcher, NullFetcher};
pub use frontier::{FrontierFilter, RuntimeDenies, Verdict};
pub use orchestrator::{CrawlOptions, Orchestrator, RunReport};
pub use plugins::{AssetRecord, Plugin, PluginRegistry};
