//! Durable mirror of job records in the document store.
//!
//! Records live under `job:<id>` as JSON with a 24-hour expiry; the
//! `jobs:created` sorted set (scored by creation epoch) drives
//! `created_at`-descending listing and the startup recovery scan. The
//! store is a replica: the in-memory registry stays authoritative, and
//! every operation here is allowed to fail without taking jobs down.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use crate::config::Config;
use crate::models::{Job, JobStatus};

const JOB_KEY_PREFIX: &str = "job:";
const CREATED_INDEX_KEY: &str = "jobs:created";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct JobStore {
    conn: ConnectionManager,
}

impl JobStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!(url = redis_url, "connected to document store");
        Ok(Self { conn })
    }

    fn job_key(id: &str) -> String {
        format!("{}{}", JOB_KEY_PREFIX, id)
    }

    /// Insert or overwrite a job record, refreshing its TTL and the
    /// created-at index entry.
    pub async fn save(&self, job: &Job) -> Result<(), StoreError> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();

        let _: () = conn
            .set_ex(Self::job_key(&job.id), payload, Config::JOB_TTL_SECS as u64)
            .await?;
        let _: () = conn
            .zadd(CREATED_INDEX_KEY, &job.id, job.created_at.timestamp())
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(Self::job_key(id)).await?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Jobs sorted by `created_at` descending, optionally filtered by
    /// status, up to `limit`. Index entries whose record has expired are
    /// pruned as they are encountered.
    pub async fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.zrevrange(CREATED_INDEX_KEY, 0, -1).await?;

        let mut jobs = Vec::new();
        for id in ids {
            if jobs.len() >= limit {
                break;
            }
            match self.get(&id).await? {
                Some(job) => {
                    if status.is_none_or(|wanted| job.status == wanted) {
                        jobs.push(job);
                    }
                }
                None => {
                    let _: () = conn.zrem(CREATED_INDEX_KEY, &id).await?;
                }
            }
        }
        Ok(jobs)
    }

    /// Every stored job still marked running. Used by crash recovery.
    pub async fn running_jobs(&self) -> Result<Vec<Job>, StoreError> {
        self.list(Some(JobStatus::Running), usize::MAX).await
    }
}
