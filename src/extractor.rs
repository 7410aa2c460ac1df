//! Tiered content extraction: rendered fetch, plain HTTP, aggressive HTTP.
//!
//! Each tier must produce Markdown longer than 100 trimmed characters to
//! win. Blocked responses (403/429) short-circuit to the next tier. On
//! total failure the response error concatenates every tier's reason.

use reqwest::{Method, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::markdown;
use crate::models::{ContentResponse, ContentSizes};
use crate::network::{FetchError, HttpClient};
use crate::reachability::ReachabilityProber;
use crate::renderer::{self, BrowserPool};

const AGGRESSIVE_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

#[derive(Debug, thiserror::Error)]
enum TierFailure {
    #[error("HTTP {0}: blocked by server")]
    Blocked(u16),

    #[error("{0}")]
    Failed(String),

    #[error("content too short ({0} chars)")]
    TooShort(usize),
}

pub struct ContentExtractor {
    http: Arc<HttpClient>,
    prober: ReachabilityProber,
    browsers: Arc<BrowserPool>,
    // Bare no-redirect client for the aggressive tier, which manages its
    // own headers and hops.
    bare: reqwest::Client,
}

impl ContentExtractor {
    pub fn new(http: Arc<HttpClient>, browsers: Arc<BrowserPool>) -> Self {
        let bare = reqwest::Client::builder()
            .timeout(Duration::from_secs(Config::FETCH_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();
        Self {
            prober: ReachabilityProber::new(Arc::clone(&http)),
            http,
            browsers,
            bare,
        }
    }

    /// Fetch one URL through the tier ladder and emit Markdown.
    pub async fn process_url(&self, url: &str) -> ContentResponse {
        let (actual_url, outcome) = self.prober.find(url).await;
        let mut failures: Vec<String> = Vec::new();

        if !outcome.success {
            failures.push(format!(
                "reachability: {}",
                outcome.error.as_deref().unwrap_or("unreachable")
            ));
        }

        match self.try_rendered(&actual_url).await {
            Ok(response) => return response,
            Err(failure) => failures.push(format!("rendered: {}", failure)),
        }

        match self.try_plain_http(&actual_url).await {
            Ok(response) => return response,
            Err(failure) => failures.push(format!("http: {}", failure)),
        }

        match self.try_aggressive_http(&actual_url).await {
            Ok(response) => return response,
            Err(failure) => failures.push(format!("aggressive http: {}", failure)),
        }

        tracing::debug!(url = %actual_url, "all extraction tiers failed");
        ContentResponse::failed(actual_url, failures.join("; "))
    }

    /// Tier 1: headless rendering through the shared browser pool.
    async fn try_rendered(&self, url: &str) -> Result<ContentResponse, TierFailure> {
        let lease = self
            .browsers
            .acquire()
            .await
            .map_err(|e| TierFailure::Failed(e.to_string()))?;

        let rendered = renderer::render_page(
            &lease.browser,
            url,
            Duration::from_secs(Config::RENDER_OP_TIMEOUT_SECS),
        )
        .await;
        self.browsers.release(lease).await;

        let html = rendered.map_err(|e| TierFailure::Failed(e.to_string()))?;
        let content = markdown::convert_to_markdown(&html);
        require_substance(&content)?;

        let mut headers = HashMap::new();
        headers.insert(
            "Content-Type".to_string(),
            "text/html; charset=UTF-8".to_string(),
        );
        headers.insert("X-Scraped-With".to_string(), "Headless".to_string());

        Ok(ContentResponse {
            url: url.to_string(),
            status_code: 200,
            content_type: "text/html; charset=UTF-8".to_string(),
            sizes: ContentSizes {
                markdown: content.len(),
            },
            markdown: content,
            headers,
            error: String::new(),
        })
    }

    /// Tier 2: plain GET with browser headers and identity encoding.
    /// 403/429 means blocked; non-HTML bodies pass through verbatim.
    async fn try_plain_http(&self, url: &str) -> Result<ContentResponse, TierFailure> {
        let response = self
            .http
            .get_following_redirects_with(
                url,
                Config::MAX_REDIRECTS,
                &[("Accept-Encoding", "identity")],
            )
            .await
            .map_err(|e| TierFailure::Failed(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TierFailure::Blocked(status.as_u16()));
        }

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.entry(key.to_string()).or_insert_with(|| value.to_string());
            }
        }

        let content_type = headers.get("content-type").cloned().unwrap_or_default();
        let body = response
            .text()
            .await
            .map_err(|e| TierFailure::Failed(format!("failed to read response: {}", e)))?;

        let markdown_body = if content_type.to_lowercase().contains("text/html") {
            markdown::convert_to_markdown(&body)
        } else {
            body
        };
        require_substance(&markdown_body)?;

        Ok(ContentResponse {
            url: url.to_string(),
            status_code: status.as_u16(),
            content_type,
            sizes: ContentSizes {
                markdown: markdown_body.len(),
            },
            markdown: markdown_body,
            headers,
            error: String::new(),
        })
    }

    /// Tier 3: rotate user-agent profiles with escalating pacing and
    /// referer rotation. First 2xx wins.
    async fn try_aggressive_http(&self, url: &str) -> Result<ContentResponse, TierFailure> {
        for (attempt, user_agent) in AGGRESSIVE_USER_AGENTS.iter().enumerate() {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
            }

            let response = match self
                .aggressive_get(url, user_agent, attempt)
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    tracing::debug!(url, attempt, error = %err, "aggressive attempt failed");
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                continue;
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let Ok(body) = response.text().await else {
                continue;
            };

            let markdown_body = if content_type.to_lowercase().contains("text/html") {
                markdown::convert_to_markdown(&body)
            } else {
                body
            };
            require_substance(&markdown_body)?;

            let mut headers = HashMap::new();
            headers.insert("Content-Type".to_string(), content_type.clone());
            headers.insert(
                "X-Scraped-With".to_string(),
                format!("Aggressive-HTTP-UA{}", attempt + 1),
            );

            return Ok(ContentResponse {
                url: url.to_string(),
                status_code: status.as_u16(),
                content_type,
                sizes: ContentSizes {
                    markdown: markdown_body.len(),
                },
                markdown: markdown_body,
                headers,
                error: String::new(),
            });
        }

        Err(TierFailure::Failed(
            "all aggressive HTTP attempts failed".to_string(),
        ))
    }

    /// One aggressive GET, walking redirects manually (≤10 hops) so the
    /// chosen user agent rides along on every hop.
    async fn aggressive_get(
        &self,
        url: &str,
        user_agent: &str,
        attempt: usize,
    ) -> Result<reqwest::Response, FetchError> {
        let mut current = url.to_string();
        for _ in 0..=Config::AGGRESSIVE_MAX_REDIRECTS {
            let mut request = self
                .bare
                .request(Method::GET, &current)
                .header("User-Agent", user_agent)
                .header(
                    "Accept",
                    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
                )
                .header("Accept-Language", "en-US,en;q=0.9")
                .header("Accept-Encoding", "identity")
                .header("DNT", "1")
                .header("Connection", "keep-alive")
                .header("Upgrade-Insecure-Requests", "1")
                .header("Cache-Control", "max-age=0");

            if user_agent.contains("Chrome") {
                request = request
                    .header("Sec-Fetch-Dest", "document")
                    .header("Sec-Fetch-Mode", "navigate")
                    .header("Sec-Fetch-Site", "none")
                    .header("Sec-Fetch-User", "?1");
            }

            if attempt > 2 {
                request = request.header("Referer", "https://www.bing.com/");
            } else if attempt > 0 {
                request = request.header("Referer", "https://www.google.com/");
            }

            let response = request.send().await.map_err(FetchError::from_reqwest_error)?;

            if !response.status().is_redirection() {
                return Ok(response);
            }

            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            current = match location
                .and_then(|loc| url::Url::parse(&current).ok().and_then(|b| b.join(&loc).ok()))
            {
                Some(next) => next.to_string(),
                None => return Ok(response),
            };
        }
        Err(FetchError::TooManyRedirects)
    }
}

fn require_substance(markdown_body: &str) -> Result<(), TierFailure> {
    let trimmed = markdown_body.trim().len();
    if trimmed > Config::CONTENT_MIN_CHARS {
        Ok(())
    } else {
        Err(TierFailure::TooShort(trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substance_threshold() {
        assert!(require_substance(&"a".repeat(101)).is_ok());
        assert!(require_substance(&"a".repeat(100)).is_err());
        assert!(require_substance("   ").is_err());
    }

    #[test]
    fn test_aggressive_profiles_available() {
        assert!(AGGRESSIVE_USER_AGENTS.len() >= 5);
        assert!(AGGRESSIVE_USER_AGENTS.iter().any(|ua| ua.contains("Chrome")));
        assert!(AGGRESSIVE_USER_AGENTS.iter().any(|ua| ua.contains("Firefox")));
    }

}
