//! Depth-bounded same-host link discovery.
//!
//! A BFS over pages of the seed's host (and its `www.` sibling), bounded
//! by a worker semaphore and a sticky URL cap. Discovery order is the
//! order of first insertion into the dedup set. Fetch errors emit error
//! events but never abort the walk.

use rand::Rng;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use url::Url;

use crate::bus::JobEmitter;
use crate::config::Config;
use crate::models::{CrawlEvent, EventKind, Tier};
use crate::network::HttpClient;
use crate::url_utils;

#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    #[error("invalid seed URL: {0}")]
    InvalidSeed(String),
}

#[derive(Debug, Clone)]
pub struct WalkParams {
    pub depth: u32,
    pub workers: usize,
    pub delay: Duration,
    pub max_urls: usize,
}

/// Shared walk bookkeeping. One mutex guards the dedup set, the ordered
/// URL list, and the stop flag; insertion order under contention is
/// whatever order tasks win the lock.
struct WalkState {
    seen: HashSet<String>,
    ordered: Vec<String>,
    stopped: bool,
}

pub struct HtmlWalker {
    http: Arc<HttpClient>,
}

impl HtmlWalker {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    /// Walk the site starting at `seed_url`. Returns discovered canonical
    /// URLs in first-seen order, capped at `params.max_urls`.
    pub async fn crawl(
        &self,
        seed_url: &str,
        params: &WalkParams,
        emitter: &JobEmitter,
    ) -> Result<Vec<String>, WalkError> {
        let seed = Url::parse(seed_url).map_err(|e| WalkError::InvalidSeed(e.to_string()))?;
        let seed_host = seed
            .host_str()
            .ok_or_else(|| WalkError::InvalidSeed("missing host".to_string()))?;

        let allowed = Arc::new(url_utils::allowed_hosts(seed_host));
        let state = Arc::new(parking_lot::Mutex::new(WalkState {
            seen: HashSet::new(),
            ordered: Vec::new(),
            stopped: false,
        }));
        let pages = Arc::new(AtomicUsize::new(0));
        let permits = Arc::new(Semaphore::new(params.workers.max(1)));

        let mut tasks: JoinSet<Vec<(String, u32)>> = JoinSet::new();
        self.spawn_fetch(
            &mut tasks,
            seed.to_string(),
            1,
            params,
            Arc::clone(&allowed),
            Arc::clone(&state),
            Arc::clone(&pages),
            Arc::clone(&permits),
            emitter.clone(),
        );

        while let Some(joined) = tasks.join_next().await {
            let to_schedule = match joined {
                Ok(links) => links,
                Err(err) => {
                    tracing::warn!(error = %err, "walker task join error");
                    continue;
                }
            };
            for (url, depth) in to_schedule {
                self.spawn_fetch(
                    &mut tasks,
                    url,
                    depth,
                    params,
                    Arc::clone(&allowed),
                    Arc::clone(&state),
                    Arc::clone(&pages),
                    Arc::clone(&permits),
                    emitter.clone(),
                );
            }
        }

        let ordered = state.lock().ordered.clone();
        Ok(ordered)
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_fetch(
        &self,
        tasks: &mut JoinSet<Vec<(String, u32)>>,
        url: String,
        depth: u32,
        params: &WalkParams,
        allowed: Arc<Vec<String>>,
        state: Arc<parking_lot::Mutex<WalkState>>,
        pages: Arc<AtomicUsize>,
        permits: Arc<Semaphore>,
        emitter: JobEmitter,
    ) {
        let http = Arc::clone(&self.http);
        let params = params.clone();

        tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return Vec::new();
            };

            // Racy pre-check: in-flight tasks may slip past a freshly set
            // stop flag; the insertion path re-checks under the lock.
            if state.lock().stopped {
                return Vec::new();
            }

            tokio::time::sleep(jittered_delay(params.delay)).await;

            let page_number = pages.fetch_add(1, Ordering::Relaxed) + 1;
            emitter
                .emit(
                    CrawlEvent::new(EventKind::Progress, emitter.job_id())
                        .with_progress(format!(
                            "Crawling page {} at depth {}: {}",
                            page_number, depth, url
                        ))
                        .with_url(&url)
                        .with_depth(depth)
                        .with_page_count(page_number)
                        .with_tier(Tier::Html),
                )
                .await;

            // Fresh fingerprints per request; identity encoding forces raw HTML.
            let response = match http
                .get_following_redirects_with(
                    &url,
                    Config::MAX_REDIRECTS,
                    &[("Accept-Encoding", "identity")],
                )
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    emitter
                        .error(
                            format!("Request failed for {}: {}", url, err),
                            err.to_string(),
                            Some(Tier::Html),
                        )
                        .await;
                    return Vec::new();
                }
            };

            if !response.status().is_success() {
                emitter
                    .error(
                        format!("HTTP {} for {}", response.status().as_u16(), url),
                        format!("HTTP {}", response.status().as_u16()),
                        Some(Tier::Html),
                    )
                    .await;
                return Vec::new();
            }

            let body = match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    emitter
                        .error(
                            format!("Failed to read body of {}: {}", url, err),
                            err.to_string(),
                            Some(Tier::Html),
                        )
                        .await;
                    return Vec::new();
                }
            };

            // HTML parsing is CPU work; keep it off the async threads.
            let hrefs = tokio::task::spawn_blocking(move || extract_hrefs(&body))
                .await
                .unwrap_or_default();

            let page_url = match Url::parse(&url) {
                Ok(parsed) => parsed,
                Err(_) => return Vec::new(),
            };

            let mut discovered_events: Vec<(String, usize)> = Vec::new();
            let mut to_schedule: Vec<(String, u32)> = Vec::new();

            {
                let mut walk = state.lock();
                for raw in hrefs {
                    if walk.stopped {
                        break;
                    }

                    let link = url_utils::clean_link(&raw);
                    if link.is_empty() || url_utils::should_skip_link(&link) {
                        continue;
                    }

                    let Ok(absolute) = page_url.join(&link) else {
                        continue;
                    };
                    if !matches!(absolute.scheme(), "http" | "https") {
                        continue;
                    }
                    let Some(host) = absolute.host_str() else {
                        continue;
                    };
                    if !url_utils::host_allowed(host, &allowed) {
                        continue;
                    }

                    let canonical = url_utils::canonicalize(&absolute);
                    if walk.seen.contains(&canonical) {
                        continue;
                    }

                    walk.seen.insert(canonical.clone());
                    walk.ordered.push(canonical.clone());
                    let total = walk.ordered.len();

                    if total >= params.max_urls {
                        walk.stopped = true;
                    } else {
                        discovered_events.push((canonical.clone(), total));
                    }

                    if depth < params.depth && !walk.stopped {
                        to_schedule.push((canonical, depth + 1));
                    }
                }
            }

            for (discovered, total) in discovered_events {
                emitter.url_discovered(discovered, depth, total).await;
            }

            to_schedule
        });
    }
}

fn extract_hrefs(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").unwrap();
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href").map(str::to_string))
        .collect()
}

/// Base politeness delay plus equal random jitter.
fn jittered_delay(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let jitter = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
    base + Duration::from_millis(jitter)
}
