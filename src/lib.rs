pub mod bus;
pub mod cli;
pub mod config;
pub mod extractor;
pub mod fingerprint;
pub mod handlers;
pub mod logging;
pub mod markdown;
pub mod models;
pub mod network;
pub mod orchestrator;
pub mod reachability;
pub mod registry;
pub mod renderer;
pub mod robots;
pub mod server;
pub mod sitemap;
pub mod store;
pub mod url_utils;
pub mod walker;
pub mod workerpool;

// Re-export main types for library usage
pub use bus::{EventSink, JobEmitter, MemorySink, NatsEventBus, NullSink};
pub use extractor::ContentExtractor;
pub use fingerprint::FingerprintProvider;
pub use models::{
    ContentBatchResponse, ContentRequest, ContentResponse, CrawlEvent, CrawlRequest,
    CrawlResult, EventKind, Job, JobStatus, Tier,
};
pub use network::{FetchError, HttpClient};
pub use orchestrator::{CrawlError, CrawlOrchestrator};
pub use reachability::{ProbeOutcome, ReachabilityProber};
pub use registry::JobRegistry;
pub use renderer::BrowserPool;
pub use sitemap::SitemapResolver;
pub use store::JobStore;
pub use walker::{HtmlWalker, WalkParams};
pub use workerpool::{PoolError, WorkerPool};
