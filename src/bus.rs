//! Topic-routed event fan-out between crawl executors and WebSocket
//! subscribers.
//!
//! Events travel on subjects named `crawler.<job_id>.<event_type>`;
//! subscribers listen on the per-job wildcard. Publishing is
//! fire-and-forget: crawl progress must never block on bus health.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::models::{CrawlEvent, EventKind, Tier};

pub const SUBJECT_PREFIX: &str = "crawler";

pub fn event_subject(job_id: &str, kind: EventKind) -> String {
    format!("{}.{}.{}", SUBJECT_PREFIX, job_id, kind.as_str())
}

pub fn job_wildcard_subject(job_id: &str) -> String {
    format!("{}.{}.*", SUBJECT_PREFIX, job_id)
}

/// Destination for crawl events. Swappable so tests capture events
/// in-process and CLI runs can drop them.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: CrawlEvent);
}

/// Real bus client. Cheap to clone; the underlying connection is shared.
#[derive(Clone)]
pub struct NatsEventBus {
    client: async_nats::Client,
}

impl NatsEventBus {
    pub async fn connect(url: &str) -> Result<Self, async_nats::ConnectError> {
        let client = async_nats::connect(url).await?;
        tracing::info!(url, "connected to event bus");
        Ok(Self { client })
    }

    /// Subscribe to every event for one job. Events are decoded and handed
    /// to a bounded channel; a full channel backpressures the consumer
    /// task, and a dropped receiver ends the subscription.
    pub async fn subscribe_job(
        &self,
        job_id: &str,
    ) -> Result<mpsc::Receiver<CrawlEvent>, async_nats::SubscribeError> {
        let subject = job_wildcard_subject(job_id);
        let mut subscription = self.client.subscribe(subject.clone()).await?;
        let (tx, rx) = mpsc::channel(Config::EVENT_QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(message) = subscription.next().await {
                let event: CrawlEvent = match serde_json::from_slice(&message.payload) {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(subject = %subject, error = %err, "dropping undecodable bus event");
                        continue;
                    }
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            let _ = subscription.unsubscribe().await;
        });

        Ok(rx)
    }
}

#[async_trait]
impl EventSink for NatsEventBus {
    async fn publish(&self, event: CrawlEvent) {
        let subject = event_subject(&event.job_id, event.kind);
        let payload = match serde_json::to_vec(&event) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode crawl event");
                return;
            }
        };
        if let Err(err) = self.client.publish(subject.clone(), payload).await {
            tracing::warn!(subject = %subject, error = %err, "bus publish failed");
        }
    }
}

/// Sink that drops everything. Used by the one-shot CLI mode and when the
/// bus is unavailable at startup.
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn publish(&self, _event: CrawlEvent) {}
}

/// In-process sink that records events for inspection in tests.
#[derive(Default)]
pub struct MemorySink {
    events: parking_lot::Mutex<Vec<CrawlEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CrawlEvent> {
        self.events.lock().clone()
    }

    pub fn events_of_kind(&self, kind: EventKind) -> Vec<CrawlEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<CrawlEvent> {
        self.events.lock().last().cloned()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn publish(&self, event: CrawlEvent) {
        self.events.lock().push(event);
    }
}

/// Convenience emitter binding a sink to one job id.
#[derive(Clone)]
pub struct JobEmitter {
    sink: std::sync::Arc<dyn EventSink>,
    job_id: String,
}

impl JobEmitter {
    pub fn new(sink: std::sync::Arc<dyn EventSink>, job_id: impl Into<String>) -> Self {
        Self {
            sink,
            job_id: job_id.into(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub async fn emit(&self, event: CrawlEvent) {
        self.sink.publish(event).await;
    }

    pub async fn progress(&self, message: impl Into<String>) {
        self.emit(CrawlEvent::new(EventKind::Progress, &self.job_id).with_progress(message))
            .await;
    }

    pub async fn progress_tier(&self, message: impl Into<String>, tier: Tier) {
        self.emit(
            CrawlEvent::new(EventKind::Progress, &self.job_id)
                .with_progress(message)
                .with_tier(tier),
        )
        .await;
    }

    pub async fn tier_switch(&self, message: impl Into<String>, tier: Tier) {
        self.emit(
            CrawlEvent::new(EventKind::TierSwitch, &self.job_id)
                .with_progress(message)
                .with_tier(tier),
        )
        .await;
    }

    pub async fn sitemap_discovered(&self, url: impl Into<String>, message: impl Into<String>) {
        self.emit(
            CrawlEvent::new(EventKind::SitemapDiscovered, &self.job_id)
                .with_url(url)
                .with_progress(message)
                .with_tier(Tier::Sitemap),
        )
        .await;
    }

    pub async fn url_discovered(&self, url: impl Into<String>, depth: u32, total: usize) {
        self.emit(
            CrawlEvent::new(EventKind::UrlDiscovered, &self.job_id)
                .with_url(url)
                .with_depth(depth)
                .with_total(total),
        )
        .await;
    }

    pub async fn error(&self, message: impl Into<String>, error: impl Into<String>, tier: Option<Tier>) {
        let mut event = CrawlEvent::new(EventKind::Error, &self.job_id)
            .with_progress(message)
            .with_error(error);
        if let Some(tier) = tier {
            event = event.with_tier(tier);
        }
        self.emit(event).await;
    }
}
