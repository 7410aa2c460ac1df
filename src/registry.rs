//! In-memory authoritative job state with a durable store mirror.
//!
//! The map owns job records; the document store is a replica that may be
//! absent or failing without affecting correctness. Writers copy record
//! fields under the lock and do store I/O outside it. Terminal states are
//! final: a completed or failed job never transitions again.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::models::{CrawlResult, Job, JobStatus};
use crate::store::JobStore;

pub const RECOVERY_ERROR: &str = "Job interrupted by server restart";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("job id already exists")]
    Conflict,
}

pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Job>>,
    store: Option<JobStore>,
}

impl JobRegistry {
    pub fn new(store: Option<JobStore>) -> Arc<Self> {
        Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            store,
        })
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Insert a new job. A collision on the id is a conflict; store
    /// write failures are logged and ignored.
    pub async fn create(&self, job: Job) -> Result<(), RegistryError> {
        {
            let mut jobs = self.jobs.write().await;
            if jobs.contains_key(&job.id) {
                return Err(RegistryError::Conflict);
            }
            jobs.insert(job.id.clone(), job.clone());
        }

        self.mirror(&job).await;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        if let Some(job) = self.jobs.read().await.get(id).cloned() {
            return Some(job);
        }

        // Memory miss: fall back to the store replica.
        if let Some(store) = &self.store {
            match store.get(id).await {
                Ok(found) => return found,
                Err(err) => {
                    tracing::warn!(id, error = %err, "store lookup failed");
                }
            }
        }
        None
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.jobs.read().await.contains_key(id)
    }

    pub async fn active_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Transition a running job to completed. Returns the updated record,
    /// or None when the job is unknown or already terminal.
    pub async fn mark_completed(&self, id: &str, result: CrawlResult) -> Option<Job> {
        self.transition(id, |job| {
            job.status = JobStatus::Completed;
            job.result = Some(result);
            job.error = None;
        })
        .await
    }

    /// Transition a running job to failed.
    pub async fn mark_failed(&self, id: &str, error: impl Into<String>) -> Option<Job> {
        let error = error.into();
        self.transition(id, move |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error);
        })
        .await
    }

    async fn transition(&self, id: &str, apply: impl FnOnce(&mut Job)) -> Option<Job> {
        let updated = {
            let mut jobs = self.jobs.write().await;
            let job = jobs.get_mut(id)?;
            if job.status.is_terminal() {
                return None;
            }
            apply(job);
            job.updated_at = Utc::now();
            job.clone()
        };

        self.mirror(&updated).await;
        Some(updated)
    }

    /// List jobs sorted by `created_at` descending. Uses the store when
    /// available, otherwise the in-memory map.
    pub async fn list(&self, status: Option<JobStatus>, limit: Option<usize>) -> Vec<Job> {
        let limit = limit.unwrap_or(Config::DEFAULT_LIST_LIMIT);

        if let Some(store) = &self.store {
            match store.list(status, limit).await {
                Ok(jobs) => return jobs,
                Err(err) => {
                    tracing::warn!(error = %err, "store list failed, serving from memory");
                }
            }
        }

        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| status.is_none_or(|wanted| job.status == wanted))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        jobs
    }

    /// Startup recovery: every stored job still marked running was
    /// interrupted by the restart. Mark each failed, write it back, and
    /// load it into memory. Returns the number of recovered jobs.
    pub async fn recover(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };

        let interrupted = match store.running_jobs().await {
            Ok(jobs) => jobs,
            Err(err) => {
                tracing::warn!(error = %err, "job recovery scan failed");
                return 0;
            }
        };

        let mut recovered = 0;
        for mut job in interrupted {
            job.status = JobStatus::Failed;
            job.error = Some(RECOVERY_ERROR.to_string());
            job.updated_at = Utc::now();

            self.jobs.write().await.insert(job.id.clone(), job.clone());
            self.mirror(&job).await;
            recovered += 1;
        }

        if recovered > 0 {
            tracing::info!(recovered, "marked interrupted jobs as failed");
        }
        recovered
    }

    async fn mirror(&self, job: &Job) {
        if let Some(store) = &self.store {
            if let Err(err) = store.save(job).await {
                tracing::warn!(id = %job.id, error = %err, "store mirror failed, continuing in-memory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CrawlRequest, CrawlSettings};

    fn request() -> CrawlRequest {
        CrawlRequest {
            url: "https://example.com".to_string(),
            ..Default::default()
        }
    }

    fn result() -> CrawlResult {
        CrawlResult {
            id: "abc123".to_string(),
            target_url: "https://example.com".to_string(),
            crawled_at: Utc::now(),
            duration: "1.2s".to_string(),
            total_urls: 2,
            urls_per_second: "1.67".to_string(),
            settings: CrawlSettings {
                workers: 10,
                delay: "200ms".to_string(),
                depth: 1,
            },
            urls: vec![
                "https://example.com/".to_string(),
                "https://example.com/about".to_string(),
            ],
        }
    }

    #[tokio::test]
    async fn test_create_and_conflict() {
        let registry = JobRegistry::new(None);
        registry.create(Job::new("job-1", request())).await.unwrap();
        assert_eq!(
            registry.create(Job::new("job-1", request())).await,
            Err(RegistryError::Conflict)
        );
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let registry = JobRegistry::new(None);
        registry.create(Job::new("job-1", request())).await.unwrap();

        let completed = registry.mark_completed("job-1", result()).await.unwrap();
        assert_eq!(completed.status, JobStatus::Completed);
        assert!(completed.result.is_some());
        assert!(completed.error.is_none());
        assert!(completed.created_at <= completed.updated_at);

        // Neither failure nor a second completion may override it.
        assert!(registry.mark_failed("job-1", "late error").await.is_none());
        assert!(registry.mark_completed("job-1", result()).await.is_none());
        let job = registry.get("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_failed_job_carries_error() {
        let registry = JobRegistry::new(None);
        registry.create(Job::new("job-1", request())).await.unwrap();

        let failed = registry.mark_failed("job-1", "boom").await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.result.is_none());
    }

    #[tokio::test]
    async fn test_list_from_memory_sorted_desc() {
        let registry = JobRegistry::new(None);
        let mut older = Job::new("older", request());
        older.created_at = older.created_at - chrono::Duration::seconds(120);
        older.status = JobStatus::Completed;
        registry.create(older).await.unwrap();
        registry.create(Job::new("newer", request())).await.unwrap();

        let all = registry.list(None, None).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "newer");
        assert_eq!(all[1].id, "older");

        let running = registry.list(Some(JobStatus::Running), None).await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, "newer");

        let limited = registry.list(None, Some(1)).await;
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_job_transitions_are_noops() {
        let registry = JobRegistry::new(None);
        assert!(registry.mark_failed("ghost", "err").await.is_none());
        assert!(registry.get("ghost").await.is_none());
    }
}
