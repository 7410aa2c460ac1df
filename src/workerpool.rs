//! Bounded worker pool for content-extraction batches.
//!
//! A process-wide singleton created at startup. Admission control keeps
//! the pool responsive: batches that would saturate it either run under
//! reduced concurrency or are refused outright. The pool owns the shared
//! browser pool and closes it last on shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::extractor::ContentExtractor;
use crate::models::ContentResponse;
use crate::renderer::BrowserPool;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("system overloaded")]
    Overloaded,

    #[error("job submission timeout")]
    SubmitTimeout,

    #[error("processing timeout")]
    Timeout,
}

struct PoolJob {
    url: String,
    index: usize,
    results: mpsc::Sender<(usize, ContentResponse)>,
}

pub struct WorkerPool {
    max_workers: usize,
    active: AtomicUsize,
    jobs_tx: flume::Sender<PoolJob>,
    shutdown: CancellationToken,
    browsers: Arc<BrowserPool>,
    extractor: Arc<ContentExtractor>,
    workers: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `max_workers` workers multiplexing extraction requests over
    /// the shared browser pool.
    pub fn new(
        extractor: Arc<ContentExtractor>,
        browsers: Arc<BrowserPool>,
        max_workers: usize,
    ) -> Arc<Self> {
        let max_workers = max_workers.max(1);
        let (jobs_tx, jobs_rx) = flume::bounded::<PoolJob>(max_workers * 2);
        let pool = Arc::new(Self {
            max_workers,
            active: AtomicUsize::new(0),
            jobs_tx,
            shutdown: CancellationToken::new(),
            browsers,
            extractor,
            workers: parking_lot::Mutex::new(Vec::new()),
        });

        let mut handles = Vec::with_capacity(max_workers);
        for _ in 0..max_workers {
            let rx = jobs_rx.clone();
            let pool_ref = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool_ref.worker_loop(rx).await;
            }));
        }
        *pool.workers.lock() = handles;

        pool
    }

    /// Sizing rule: `min(2·CPU, rss/100MiB, 50)` clamped to `[5, 50]`.
    /// The memory share falls back to 10 when the RSS is unreadable.
    pub fn optimal_workers() -> usize {
        let cpu_limit = num_cpus::get() * 2;
        let mem_limit = process_rss_bytes()
            .map(|rss| (rss / Config::WORKER_MEM_SLICE_BYTES) as usize)
            .filter(|&n| n >= 1)
            .unwrap_or(10);
        cpu_limit
            .min(mem_limit)
            .clamp(Config::WORKER_MIN, Config::WORKER_MAX)
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn browsers(&self) -> Arc<BrowserPool> {
        Arc::clone(&self.browsers)
    }

    /// Admission rule: accept when idle workers cover at least
    /// `max(⌈n/10⌉, 2)` of the batch.
    pub fn can_accept(&self, url_count: usize) -> bool {
        let idle = self.max_workers.saturating_sub(self.active_jobs());
        let needed = url_count.div_ceil(10).max(2);
        idle >= needed
    }

    /// Process a batch of URLs, returning responses indexed by input
    /// position. A refused batch retries under reduced concurrency; when
    /// even that is impossible the caller sees `Overloaded`.
    pub async fn process_content_urls(
        &self,
        urls: &[String],
    ) -> Result<Vec<ContentResponse>, PoolError> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        if !self.can_accept(urls.len()) {
            let reduced = self.max_workers / 4;
            if reduced < 1 {
                return Err(PoolError::Overloaded);
            }
            return Ok(self.process_with_reduced_concurrency(urls, reduced).await);
        }

        let (results_tx, mut results_rx) = mpsc::channel(urls.len());

        for (index, url) in urls.iter().enumerate() {
            let job = PoolJob {
                url: url.clone(),
                index,
                results: results_tx.clone(),
            };
            let send = self.jobs_tx.send_async(job);
            match timeout(Duration::from_secs(Config::SUBMIT_TIMEOUT_SECS), send).await {
                Ok(Ok(())) => {}
                // Elapsed or a closed queue both mean the job never landed.
                Ok(Err(_)) | Err(_) => return Err(PoolError::SubmitTimeout),
            }
        }
        drop(results_tx);

        let mut slots: Vec<Option<ContentResponse>> = vec![None; urls.len()];
        let deadline = Duration::from_secs(Config::PER_URL_TIMEOUT_SECS * urls.len() as u64);
        let collect = async {
            let mut collected = 0;
            while collected < urls.len() {
                match results_rx.recv().await {
                    Some((index, response)) => {
                        slots[index] = Some(response);
                        collected += 1;
                    }
                    None => break,
                }
            }
        };

        if timeout(deadline, collect).await.is_err() {
            return Err(PoolError::Timeout);
        }

        Ok(slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.unwrap_or_else(|| {
                    ContentResponse::failed(urls[i].clone(), "no response from worker")
                })
            })
            .collect())
    }

    /// Degraded path: run the batch directly under a small semaphore
    /// instead of the worker queue.
    async fn process_with_reduced_concurrency(
        &self,
        urls: &[String],
        limit: usize,
    ) -> Vec<ContentResponse> {
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut tasks = Vec::with_capacity(urls.len());

        for url in urls {
            let permits = Arc::clone(&semaphore);
            let extractor = Arc::clone(&self.extractor);
            let url = url.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await;
                extractor.process_url(&url).await
            }));
        }

        let mut responses = Vec::with_capacity(tasks.len());
        for (i, task) in tasks.into_iter().enumerate() {
            match task.await {
                Ok(response) => responses.push(response),
                Err(_) => responses.push(ContentResponse::failed(
                    urls[i].clone(),
                    "extraction task failed",
                )),
            }
        }
        responses
    }

    async fn worker_loop(&self, jobs_rx: flume::Receiver<PoolJob>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                job = jobs_rx.recv_async() => {
                    let Ok(job) = job else { break };
                    self.active.fetch_add(1, Ordering::Relaxed);
                    let response = self.extractor.process_url(&job.url).await;
                    self.active.fetch_sub(1, Ordering::Relaxed);

                    let send = job.results.send((job.index, response));
                    if timeout(Duration::from_secs(Config::SUBMIT_TIMEOUT_SECS), send)
                        .await
                        .is_err()
                    {
                        tracing::warn!(url = %job.url, "result delivery timed out");
                    }
                }
            }
        }
    }

    /// Drain workers, then close the browser pool last.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        self.browsers.shutdown().await;
    }
}

#[cfg(target_os = "linux")]
fn process_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn process_rss_bytes() -> Option<u64> {
    None
}
