//! Randomized browser fingerprints for outgoing requests.
//!
//! Keeps a process-wide catalog of User-Agent strings and full browser
//! header sets, refreshed in the background from an upstream catalog API
//! when stale. Reads never block on a refresh; a hard-coded table covers
//! upstream outages.

use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;

const USER_AGENTS_ENDPOINT: &str = "https://headers.scrapeops.io/v1/user-agents";
const BROWSER_HEADERS_ENDPOINT: &str = "https://headers.scrapeops.io/v1/browser-headers";

/// Static fallback user agents, used until the first successful refresh and
/// whenever the upstream catalog is unavailable.
pub const FALLBACK_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:109.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/120.0.0.0",
];

/// Baseline header set applied when no catalog header set is available.
pub fn fallback_headers(user_agent: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("User-Agent".to_string(), user_agent.to_string());
    headers.insert(
        "Accept".to_string(),
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8"
            .to_string(),
    );
    headers.insert("Accept-Language".to_string(), "en-US,en;q=0.9".to_string());
    headers.insert("Accept-Encoding".to_string(), "gzip, deflate, br".to_string());
    headers.insert("Cache-Control".to_string(), "no-cache".to_string());
    headers.insert("Pragma".to_string(), "no-cache".to_string());
    headers.insert("DNT".to_string(), "1".to_string());
    headers.insert("Sec-Fetch-Dest".to_string(), "document".to_string());
    headers.insert("Sec-Fetch-Mode".to_string(), "navigate".to_string());
    headers.insert("Sec-Fetch-Site".to_string(), "none".to_string());
    headers.insert("Sec-Fetch-User".to_string(), "?1".to_string());
    headers.insert(
        "Upgrade-Insecure-Requests".to_string(),
        "1".to_string(),
    );
    headers.insert("Connection".to_string(), "keep-alive".to_string());
    headers
}

#[derive(Debug)]
struct Catalog {
    user_agents: Vec<String>,
    header_sets: Vec<HashMap<String, String>>,
    fetched_at: Option<Instant>,
}

impl Catalog {
    fn fallback() -> Self {
        Self {
            user_agents: FALLBACK_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            header_sets: Vec::new(),
            fetched_at: None,
        }
    }

    fn is_stale(&self) -> bool {
        match self.fetched_at {
            None => true,
            Some(at) => at.elapsed() > Duration::from_secs(Config::CATALOG_STALE_SECS),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogResponse<T> {
    result: Vec<T>,
}

/// Process-wide fingerprint provider. Reads are copy-on-refresh: the
/// catalog is swapped atomically behind the lock, never mutated in place.
pub struct FingerprintProvider {
    catalog: RwLock<Arc<Catalog>>,
    api_key: Option<String>,
    http: reqwest::Client,
    refreshing: AtomicBool,
}

impl FingerprintProvider {
    pub fn new(api_key: Option<String>) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(Config::CATALOG_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Arc::new(Self {
            catalog: RwLock::new(Arc::new(Catalog::fallback())),
            api_key,
            http,
            refreshing: AtomicBool::new(false),
        })
    }

    /// Random User-Agent from the catalog. Triggers a background refresh
    /// when the catalog is stale.
    pub fn user_agent(self: &Arc<Self>) -> String {
        self.maybe_refresh();
        let catalog = self.catalog.read().clone();
        pick(&catalog.user_agents).cloned().unwrap_or_else(|| {
            FALLBACK_USER_AGENTS[0].to_string()
        })
    }

    /// Random full browser header set. Falls back to the baseline set built
    /// around a random fallback User-Agent.
    pub fn browser_headers(self: &Arc<Self>) -> HashMap<String, String> {
        self.maybe_refresh();
        let catalog = self.catalog.read().clone();
        match pick(&catalog.header_sets) {
            Some(set) => set.clone(),
            None => {
                let ua = pick(&catalog.user_agents)
                    .cloned()
                    .unwrap_or_else(|| FALLBACK_USER_AGENTS[0].to_string());
                fallback_headers(&ua)
            }
        }
    }

    /// Kick off an initial refresh without waiting for first use.
    pub fn prefetch(self: &Arc<Self>) {
        self.maybe_refresh();
    }

    fn maybe_refresh(self: &Arc<Self>) {
        if self.api_key.is_none() {
            return;
        }
        if !self.catalog.read().is_stale() {
            return;
        }
        // Single in-flight refresh; everyone else keeps the old catalog.
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let provider = Arc::clone(self);
        tokio::spawn(async move {
            match provider.fetch_catalog().await {
                Ok(catalog) => {
                    tracing::info!(
                        user_agents = catalog.user_agents.len(),
                        header_sets = catalog.header_sets.len(),
                        "refreshed fingerprint catalog"
                    );
                    *provider.catalog.write() = Arc::new(catalog);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "fingerprint catalog refresh failed, keeping previous catalog");
                    // Stamp the old catalog so failures do not retry on every read.
                    let previous = provider.catalog.read().clone();
                    *provider.catalog.write() = Arc::new(Catalog {
                        user_agents: previous.user_agents.clone(),
                        header_sets: previous.header_sets.clone(),
                        fetched_at: Some(Instant::now()),
                    });
                }
            }
            provider.refreshing.store(false, Ordering::Release);
        });
    }

    async fn fetch_catalog(&self) -> Result<Catalog, reqwest::Error> {
        let api_key = self.api_key.as_deref().unwrap_or_default();

        let user_agents: CatalogResponse<String> = self
            .http
            .get(USER_AGENTS_ENDPOINT)
            .query(&[("api_key", api_key), ("num_results", "50")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let header_sets: CatalogResponse<HashMap<String, String>> = self
            .http
            .get(BROWSER_HEADERS_ENDPOINT)
            .query(&[("api_key", api_key), ("num_results", "20")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(Catalog {
            user_agents: user_agents.result,
            header_sets: header_sets.result,
            fetched_at: Some(Instant::now()),
        })
    }
}

fn pick<T>(items: &[T]) -> Option<&T> {
    use rand::Rng;
    if items.is_empty() {
        return None;
    }
    let idx = rand::thread_rng().gen_range(0..items.len());
    Some(&items[idx])
}
