pub struct Config;

impl Config {
    // Crawl request defaults and caps
    pub const DEFAULT_DEPTH: u32 = 1;
    pub const DEFAULT_WORKERS: usize = 10;
    pub const DEFAULT_DELAY_MS: u64 = 200;
    pub const DEFAULT_MAX_URLS: usize = 1000;
    pub const MAX_URLS_CAP: usize = 5000;
    pub const DEFAULT_HEADLESS_TIMEOUT_SECS: u64 = 30;

    // Tier fallback thresholds
    pub const HTML_TIER_THRESHOLD: usize = 10;
    pub const HEADLESS_TIER_THRESHOLD: usize = 5;

    // HTTP client
    pub const FETCH_TIMEOUT_SECS: u64 = 30;
    pub const PROBE_TIMEOUT_SECS: u64 = 20;
    pub const HEAD_TIMEOUT_SECS: u64 = 10;
    pub const MAX_REDIRECTS: usize = 5;
    pub const AGGRESSIVE_MAX_REDIRECTS: usize = 10;
    pub const MAX_CONTENT_SIZE: usize = 10 * 1024 * 1024;

    // Fingerprint catalog
    pub const CATALOG_TIMEOUT_SECS: u64 = 10;
    pub const CATALOG_STALE_SECS: u64 = 3600;

    // Content extraction
    pub const CONTENT_MIN_CHARS: usize = 100;
    pub const RENDER_MIN_BYTES: usize = 100;
    pub const RENDER_OP_TIMEOUT_SECS: u64 = 10;
    pub const SCROLL_STEPS: usize = 5;
    pub const SCROLL_STEP_PX: u32 = 800;
    pub const SCROLL_PAUSE_MS: u64 = 800;

    // Worker pool
    pub const WORKER_MIN: usize = 5;
    pub const WORKER_MAX: usize = 50;
    pub const WORKER_MEM_SLICE_BYTES: u64 = 100 * 1024 * 1024;
    pub const SUBMIT_TIMEOUT_SECS: u64 = 5;
    pub const PER_URL_TIMEOUT_SECS: u64 = 30;

    // Event bus and registry
    pub const EVENT_QUEUE_CAPACITY: usize = 100;
    pub const JOB_TTL_SECS: i64 = 86_400;
    pub const DEFAULT_LIST_LIMIT: usize = 10;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_constants() {
        assert!(Config::DEFAULT_MAX_URLS <= Config::MAX_URLS_CAP);
        assert!(Config::WORKER_MIN <= Config::WORKER_MAX);
        assert!(Config::HEADLESS_TIER_THRESHOLD < Config::HTML_TIER_THRESHOLD);
    }
}
