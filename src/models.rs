//! Wire and storage types for crawl jobs, content extraction, and events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::Config;

/// Discovery/extraction tier tag carried on events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Sitemap,
    Html,
    Headless,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Sitemap => "sitemap",
            Tier::Html => "html",
            Tier::Headless => "headless",
        }
    }
}

/// Event types published to the bus for a crawl job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Progress,
    UrlDiscovered,
    SitemapDiscovered,
    TierSwitch,
    Completed,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Progress => "progress",
            EventKind::UrlDiscovered => "url_discovered",
            EventKind::SitemapDiscovered => "sitemap_discovered",
            EventKind::TierSwitch => "tier_switch",
            EventKind::Completed => "completed",
            EventKind::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Completed | EventKind::Error)
    }
}

/// A typed, timestamped, job-scoped progress record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
}

impl CrawlEvent {
    pub fn new(kind: EventKind, job_id: impl Into<String>) -> Self {
        Self {
            kind,
            job_id: job_id.into(),
            url: None,
            depth: None,
            progress: None,
            timestamp: Utc::now(),
            total: None,
            page_count: None,
            error: None,
            tier: None,
        }
    }

    pub fn with_progress(mut self, message: impl Into<String>) -> Self {
        self.progress = Some(message.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_total(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_page_count(mut self, pages: usize) -> Self {
        self.page_count = Some(pages);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }
}

/// Message framed to WebSocket clients. Mirrors [`CrawlEvent`] plus the
/// synthetic `connected` greeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
}

impl WsMessage {
    pub fn connected(job_id: impl Into<String>) -> Self {
        Self {
            kind: "connected".to_string(),
            job_id: job_id.into(),
            url: None,
            depth: None,
            progress: Some("Connected to live updates".to_string()),
            timestamp: Utc::now(),
            total: None,
            page_count: None,
            error: None,
            tier: None,
        }
    }

    pub fn error(job_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            kind: "error".to_string(),
            job_id: job_id.into(),
            url: None,
            depth: None,
            progress: None,
            timestamp: Utc::now(),
            total: None,
            page_count: None,
            error: Some(error.into()),
            tier: None,
        }
    }
}

impl From<CrawlEvent> for WsMessage {
    fn from(event: CrawlEvent) -> Self {
        Self {
            kind: event.kind.as_str().to_string(),
            job_id: event.job_id,
            url: event.url,
            depth: event.depth,
            progress: event.progress,
            timestamp: event.timestamp,
            total: event.total,
            page_count: event.page_count,
            error: event.error,
            tier: event.tier,
        }
    }
}

/// API request to start a crawl. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_urls: Option<usize>,
    #[serde(default)]
    pub enable_sitemap: bool,
    #[serde(default)]
    pub enable_html: bool,
    #[serde(default)]
    pub enable_headless: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headless_timeout: Option<u64>,
}

/// Which tiers the orchestrator should run, after defaulting rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSelection {
    pub sitemap: bool,
    pub html: bool,
    pub headless: bool,
}

impl CrawlRequest {
    pub fn depth(&self) -> u32 {
        match self.depth {
            Some(0) | None => Config::DEFAULT_DEPTH,
            Some(d) => d,
        }
    }

    pub fn workers(&self) -> usize {
        match self.workers {
            Some(0) | None => Config::DEFAULT_WORKERS,
            Some(w) => w,
        }
    }

    /// Delay between walker requests. Falls back to the default on a
    /// missing or unparseable duration string.
    pub fn delay(&self) -> Duration {
        self.delay
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(Duration::from_millis(Config::DEFAULT_DELAY_MS))
    }

    pub fn delay_str(&self) -> String {
        self.delay
            .clone()
            .unwrap_or_else(|| format!("{}ms", Config::DEFAULT_DELAY_MS))
    }

    /// Maximum URLs, defaulted and clamped to the server-side cap.
    pub fn max_urls(&self) -> usize {
        match self.max_urls {
            Some(0) | None => Config::DEFAULT_MAX_URLS,
            Some(n) => n.min(Config::MAX_URLS_CAP),
        }
    }

    pub fn headless_timeout(&self) -> Duration {
        match self.headless_timeout {
            Some(0) | None => Duration::from_secs(Config::DEFAULT_HEADLESS_TIMEOUT_SECS),
            Some(secs) => Duration::from_secs(secs),
        }
    }

    /// Tier enablement: explicit flags win; with nothing set, sitemap and
    /// HTML default on and headless stays off.
    pub fn tiers(&self) -> TierSelection {
        if !self.enable_sitemap && !self.enable_html && !self.enable_headless {
            TierSelection {
                sitemap: true,
                html: true,
                headless: false,
            }
        } else {
            TierSelection {
                sitemap: self.enable_sitemap,
                html: self.enable_html,
                headless: self.enable_headless,
            }
        }
    }
}

/// Parse a duration string like "200ms", "2s", or "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.trim().parse::<f64>().ok().and_then(|v| {
            if v.is_finite() && v >= 0.0 {
                Some(Duration::from_secs_f64(v))
            } else {
                None
            }
        });
    }
    if let Some(mins) = s.strip_suffix('m') {
        return mins.trim().parse::<u64>().ok().map(|v| Duration::from_secs(v * 60));
    }
    None
}

/// Echo of the walker settings used for a crawl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSettings {
    pub workers: usize,
    pub delay: String,
    pub depth: u32,
}

/// Final output of a crawl job. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub id: String,
    pub target_url: String,
    pub crawled_at: DateTime<Utc>,
    pub duration: String,
    pub total_urls: usize,
    pub urls_per_second: String,
    pub settings: CrawlSettings,
    pub urls: Vec<String>,
}

/// Immediate response to POST /crawl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResponse {
    pub job_id: String,
    pub status: String,
    pub message: String,
}

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A crawl job as seen by clients and the document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CrawlResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<CrawlRequest>,
}

impl Job {
    pub fn new(id: impl Into<String>, request: CrawlRequest) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: JobStatus::Running,
            progress: Some("Starting crawl...".to_string()),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            request: Some(request),
        }
    }
}

/// Validate a client-supplied job id: 3-50 chars of `[A-Za-z0-9_-]`.
pub fn is_valid_job_id(id: &str) -> bool {
    (3..=50).contains(&id.len())
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Generate an opaque 24-character hex job id.
pub fn generate_job_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// API request to fetch page content for one or more URLs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    // Accepted but ignored: the server decides admission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
}

impl ContentRequest {
    /// Flatten `url`/`urls` into the effective URL list.
    pub fn target_urls(&self) -> Vec<String> {
        if let Some(urls) = &self.urls {
            if !urls.is_empty() {
                return urls.clone();
            }
        }
        self.url.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentSizes {
    pub markdown: usize,
}

/// Extracted page content rendered as Markdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentResponse {
    pub url: String,
    pub status_code: u16,
    pub content_type: String,
    pub markdown: String,
    pub sizes: ContentSizes,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl ContentResponse {
    pub fn empty(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status_code: 0,
            content_type: String::new(),
            markdown: String::new(),
            sizes: ContentSizes::default(),
            headers: HashMap::new(),
            error: String::new(),
        }
    }

    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        let mut resp = Self::empty(url);
        resp.error = error.into();
        resp
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}

/// Batch wrapper for POST /content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBatchResponse {
    pub results: Vec<ContentResponse>,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
}

impl ContentBatchResponse {
    pub fn from_results(results: Vec<ContentResponse>) -> Self {
        let total = results.len();
        let success = results.iter().filter(|r| r.is_success()).count();
        Self {
            total,
            success,
            failed: total - success,
            results,
        }
    }
}
