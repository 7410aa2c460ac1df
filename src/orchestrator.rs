//! The crawl executor: composes reachability probing, sitemap resolution,
//! HTML walking, and headless discovery into a single job run.
//!
//! Tier failures degrade (an `error` event, then the next tier); only a
//! seed that is unreachable with no robots-derived sitemaps fails the job.
//! Terminal events are not published here: the spawning handler publishes
//! them after the registry update makes the terminal state observable.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use url::Url;

use crate::bus::{EventSink, JobEmitter};
use crate::config::Config;
use crate::models::{
    generate_job_id, CrawlEvent, CrawlRequest, CrawlResult, CrawlSettings, EventKind, Tier,
};
use crate::network::HttpClient;
use crate::reachability::ReachabilityProber;
use crate::renderer::{self, BrowserPool};
use crate::robots;
use crate::sitemap::SitemapResolver;
use crate::url_utils;
use crate::walker::{HtmlWalker, WalkParams};

#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("URL and all fallbacks are inaccessible: {0}")]
    Unreachable(String),
}

pub struct CrawlOrchestrator {
    http: Arc<HttpClient>,
    prober: ReachabilityProber,
    sitemaps: SitemapResolver,
    walker: HtmlWalker,
    browsers: Arc<BrowserPool>,
    sink: Arc<dyn EventSink>,
}

impl CrawlOrchestrator {
    pub fn new(
        http: Arc<HttpClient>,
        browsers: Arc<BrowserPool>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            prober: ReachabilityProber::new(Arc::clone(&http)),
            sitemaps: SitemapResolver::new(Arc::clone(&http)),
            walker: HtmlWalker::new(Arc::clone(&http)),
            http,
            browsers,
            sink,
        }
    }

    /// Run the tiered crawl for one job.
    pub async fn execute(
        &self,
        request: &CrawlRequest,
        job_id: &str,
    ) -> Result<CrawlResult, CrawlError> {
        let emitter = JobEmitter::new(Arc::clone(&self.sink), job_id);
        let started = Instant::now();

        let (actual_url, outcome) = self.prober.find(&request.url).await;

        // When no URL variant answers, robots.txt is the last resort: its
        // declared sitemaps can still be crawled blind.
        let mut robots_fallback: Vec<String> = Vec::new();
        if !outcome.success {
            let reason = outcome
                .error
                .clone()
                .unwrap_or_else(|| "unreachable".to_string());
            emitter
                .progress_tier(
                    format!(
                        "URL and all fallbacks failed: {} - trying robots.txt fallback",
                        reason
                    ),
                    Tier::Sitemap,
                )
                .await;

            robots_fallback = robots::sitemaps_from_robots(&self.http, &request.url).await;
            if robots_fallback.is_empty() {
                emitter
                    .error(
                        format!("URL and all fallbacks failed: {}", reason),
                        reason.clone(),
                        None,
                    )
                    .await;
                return Err(CrawlError::Unreachable(reason));
            }
            emitter
                .progress_tier(
                    format!(
                        "Found {} sitemap(s) via robots.txt fallback",
                        robots_fallback.len()
                    ),
                    Tier::Sitemap,
                )
                .await;
        } else if actual_url != outcome.original_url {
            emitter
                .progress(format!(
                    "Fallback successful! Using: {} instead of {}",
                    actual_url, outcome.original_url
                ))
                .await;
        }

        emitter
            .progress(format!("Starting three-tier crawling for {}", actual_url))
            .await;

        let tiers = request.tiers();
        let max_urls = request.max_urls();
        let allowed_hosts = Url::parse(&actual_url)
            .ok()
            .and_then(|u| u.host_str().map(url_utils::allowed_hosts))
            .unwrap_or_default();

        let mut seen: HashSet<String> = HashSet::new();
        let mut all_urls: Vec<String> = Vec::new();

        // The effective target leads the result list when it answered.
        if outcome.success {
            merge_urls(
                &mut all_urls,
                &mut seen,
                std::iter::once(actual_url.clone()),
                &allowed_hosts,
            );
        }

        if tiers.sitemap {
            emitter
                .tier_switch("Starting Tier 1: Sitemap Discovery", Tier::Sitemap)
                .await;
            self.run_sitemap_tier(
                &actual_url,
                &robots_fallback,
                &allowed_hosts,
                &mut all_urls,
                &mut seen,
                &emitter,
            )
            .await;
        }

        if tiers.html && all_urls.len() < Config::HTML_TIER_THRESHOLD {
            emitter
                .tier_switch("Starting Tier 2: HTML Link Discovery", Tier::Html)
                .await;
            self.run_html_tier(
                &actual_url,
                request,
                &allowed_hosts,
                &mut all_urls,
                &mut seen,
                &emitter,
            )
            .await;
        }

        if tiers.headless && all_urls.len() < Config::HEADLESS_TIER_THRESHOLD {
            emitter
                .tier_switch("Starting Tier 3: Headless Discovery", Tier::Headless)
                .await;
            self.run_headless_tier(
                &actual_url,
                request,
                &allowed_hosts,
                &mut all_urls,
                &mut seen,
                &emitter,
            )
            .await;
        }

        if all_urls.len() > max_urls {
            all_urls.truncate(max_urls);
            emitter
                .progress(format!("Applied URL limit: truncated to {} URLs", max_urls))
                .await;
        }

        let elapsed = started.elapsed();
        let secs = elapsed.as_secs_f64();
        let urls_per_second = if secs > 0.0 {
            all_urls.len() as f64 / secs
        } else {
            0.0
        };

        Ok(CrawlResult {
            id: generate_job_id(),
            target_url: actual_url,
            crawled_at: Utc::now(),
            duration: format!("{:.2?}", elapsed),
            total_urls: all_urls.len(),
            urls_per_second: format!("{:.2}", urls_per_second),
            settings: CrawlSettings {
                workers: request.workers(),
                delay: request.delay_str(),
                depth: request.depth(),
            },
            urls: all_urls,
        })
    }

    async fn run_sitemap_tier(
        &self,
        actual_url: &str,
        robots_fallback: &[String],
        allowed_hosts: &[String],
        all_urls: &mut Vec<String>,
        seen: &mut HashSet<String>,
        emitter: &JobEmitter,
    ) {
        let sitemap_urls = self
            .sitemaps
            .discover_with_fallback(actual_url, robots_fallback, emitter)
            .await;

        if sitemap_urls.is_empty() {
            emitter.progress_tier("No sitemaps found", Tier::Sitemap).await;
            return;
        }

        let mut tier_total = 0;
        for sitemap_url in sitemap_urls {
            match self.sitemaps.parse(&sitemap_url, emitter).await {
                Ok(urls) => {
                    tier_total += merge_urls(all_urls, seen, urls.into_iter(), allowed_hosts);
                }
                Err(err) => {
                    emitter
                        .error(
                            format!("Failed to parse sitemap {}: {}", sitemap_url, err),
                            err.to_string(),
                            Some(Tier::Sitemap),
                        )
                        .await;
                }
            }
        }

        emitter
            .emit(
                CrawlEvent::new(EventKind::Progress, emitter.job_id())
                    .with_progress(format!(
                        "Sitemap crawling complete: {} unique URLs discovered",
                        tier_total
                    ))
                    .with_tier(Tier::Sitemap)
                    .with_total(all_urls.len()),
            )
            .await;
    }

    async fn run_html_tier(
        &self,
        actual_url: &str,
        request: &CrawlRequest,
        allowed_hosts: &[String],
        all_urls: &mut Vec<String>,
        seen: &mut HashSet<String>,
        emitter: &JobEmitter,
    ) {
        let params = WalkParams {
            depth: request.depth(),
            workers: request.workers(),
            delay: request.delay(),
            max_urls: request.max_urls(),
        };

        match self.walker.crawl(actual_url, &params, emitter).await {
            Ok(urls) => {
                let added = merge_urls(all_urls, seen, urls.into_iter(), allowed_hosts);
                emitter
                    .emit(
                        CrawlEvent::new(EventKind::Progress, emitter.job_id())
                            .with_progress(format!(
                                "HTML crawling added {} new URLs (total: {})",
                                added,
                                all_urls.len()
                            ))
                            .with_tier(Tier::Html)
                            .with_total(all_urls.len()),
                    )
                    .await;
            }
            Err(err) => {
                emitter
                    .error(
                        format!("HTML crawling failed: {}", err),
                        err.to_string(),
                        Some(Tier::Html),
                    )
                    .await;
            }
        }
    }

    async fn run_headless_tier(
        &self,
        actual_url: &str,
        request: &CrawlRequest,
        allowed_hosts: &[String],
        all_urls: &mut Vec<String>,
        seen: &mut HashSet<String>,
        emitter: &JobEmitter,
    ) {
        let rendered = match self.browsers.acquire().await {
            Ok(lease) => {
                let html = renderer::render_page(
                    &lease.browser,
                    actual_url,
                    request.headless_timeout(),
                )
                .await;
                self.browsers.release(lease).await;
                html
            }
            Err(err) => Err(err),
        };

        match rendered {
            Ok(html) => {
                let base = actual_url.to_string();
                let links = tokio::task::spawn_blocking(move || {
                    extract_canonical_links(&html, &base)
                })
                .await
                .unwrap_or_default();

                let added = merge_urls(all_urls, seen, links.into_iter(), allowed_hosts);
                emitter
                    .emit(
                        CrawlEvent::new(EventKind::Progress, emitter.job_id())
                            .with_progress(format!(
                                "Headless rendering added {} new URLs (total: {})",
                                added,
                                all_urls.len()
                            ))
                            .with_tier(Tier::Headless)
                            .with_total(all_urls.len()),
                    )
                    .await;
            }
            Err(err) => {
                emitter
                    .error(
                        format!("Headless crawling failed: {}", err),
                        err.to_string(),
                        Some(Tier::Headless),
                    )
                    .await;
            }
        }
    }
}

/// Canonicalize and host-filter candidate URLs, appending unseen ones in
/// order. Returns how many were new.
fn merge_urls(
    all_urls: &mut Vec<String>,
    seen: &mut HashSet<String>,
    candidates: impl Iterator<Item = String>,
    allowed_hosts: &[String],
) -> usize {
    let mut added = 0;
    for candidate in candidates {
        let Ok(parsed) = Url::parse(&candidate) else {
            continue;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            continue;
        }
        let Some(host) = parsed.host_str() else {
            continue;
        };
        if !allowed_hosts.is_empty() && !url_utils::host_allowed(host, allowed_hosts) {
            continue;
        }

        let canonical = url_utils::canonicalize(&parsed);
        if seen.insert(canonical.clone()) {
            all_urls.push(canonical);
            added += 1;
        }
    }
    added
}

fn extract_canonical_links(html: &str, base_url: &str) -> Vec<String> {
    use scraper::{Html, Selector};

    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").unwrap();

    let mut links = Vec::new();
    for el in document.select(&selector) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let link = url_utils::clean_link(href);
        if link.is_empty() || url_utils::should_skip_link(&link) {
            continue;
        }
        if let Ok(resolved) = base.join(&link) {
            links.push(resolved.to_string());
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_urls_dedup_and_host_filter() {
        let allowed = url_utils::allowed_hosts("example.com");
        let mut seen = HashSet::new();
        let mut all = Vec::new();

        let added = merge_urls(
            &mut all,
            &mut seen,
            vec![
                "https://example.com/a".to_string(),
                "https://example.com/a#frag".to_string(),
                "https://www.example.com/b".to_string(),
                "https://evil.example.org/c".to_string(),
                "not a url".to_string(),
            ]
            .into_iter(),
            &allowed,
        );

        assert_eq!(added, 2);
        assert_eq!(
            all,
            vec![
                "https://example.com/a".to_string(),
                "https://www.example.com/b".to_string(),
            ]
        );
    }

    #[test]
    fn test_extract_canonical_links_resolves_relative() {
        let html = r#"<a href="/x">x</a><a href="https://example.com/y#f">y</a><a href="/admin">skip</a>"#;
        let links = extract_canonical_links(html, "https://example.com/");
        assert_eq!(
            links,
            vec![
                "https://example.com/x".to_string(),
                "https://example.com/y#f".to_string(),
            ]
        );
    }
}
