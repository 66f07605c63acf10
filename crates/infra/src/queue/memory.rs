//! In-process job backend with the same contract as the Redis one.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use heroes_core::JobId;

use super::{JobBackend, JobDescriptor, JobOutcome, QueueError};

#[derive(Debug, Default)]
pub struct InMemoryJobBackend {
    jobs: Mutex<VecDeque<JobDescriptor>>,
    outcomes: Mutex<HashMap<JobId, JobOutcome>>,
    ready: Notify,
    closed: AtomicBool,
}

impl InMemoryJobBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs waiting to be popped.
    pub async fn pending(&self) -> Vec<JobDescriptor> {
        self.jobs.lock().await.iter().cloned().collect()
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Connection("backend closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobBackend for InMemoryJobBackend {
    async fn push(&self, job: &JobDescriptor) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.jobs.lock().await.push_back(job.clone());
        self.ready.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<JobDescriptor>, QueueError> {
        self.ensure_open()?;
        if let Some(job) = self.jobs.lock().await.pop_front() {
            return Ok(Some(job));
        }
        if tokio::time::timeout(timeout, self.ready.notified()).await.is_err() {
            return Ok(None);
        }
        Ok(self.jobs.lock().await.pop_front())
    }

    async fn record_outcome(&self, job_id: JobId, outcome: &JobOutcome) -> Result<(), QueueError> {
        self.outcomes.lock().await.insert(job_id, outcome.clone());
        Ok(())
    }

    async fn outcome(&self, job_id: JobId) -> Result<Option<JobOutcome>, QueueError> {
        Ok(self.outcomes.lock().await.get(&job_id).cloned())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::Release);
        self.ready.notify_waiters();
        Ok(())
    }
}
