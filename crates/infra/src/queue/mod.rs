//! Job dispatch: named jobs with a JSON payload and a correlation id.
//!
//! [`JobQueue`] is the process-wide handle created at startup. It holds a
//! [`JobBackend`] once connected (Redis in production, in-memory for tests
//! and local mode) and refuses to enqueue before that or after `close`.

pub mod memory;
pub mod redis_list;

pub use memory::InMemoryJobBackend;
pub use redis_list::RedisJobBackend;

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{Span, info, instrument};

use heroes_core::JobId;

use crate::config::RedisQueueSettings;

/// Keyword argument under which the correlation id travels with a job.
pub const CORRELATION_KWARG: &str = "correlation_id";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job queue is not initialized")]
    NotInitialized,

    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue command error: {0}")]
    Command(String),

    #[error("job serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Identifier tying a request to the jobs it triggers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// A fresh id (32 hex digits).
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A job as it travels through the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: JobId,
    pub job_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    /// Absent on jobs submitted by foreign producers; the worker then
    /// generates one.
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    pub enqueued_at: DateTime<Utc>,
}

impl JobDescriptor {
    pub fn new(
        job_name: impl Into<String>,
        args: Vec<Value>,
        mut kwargs: Map<String, Value>,
        correlation_id: CorrelationId,
    ) -> Self {
        kwargs.insert(
            CORRELATION_KWARG.to_string(),
            Value::String(correlation_id.as_str().to_string()),
        );
        Self {
            job_id: JobId::new(),
            job_name: job_name.into(),
            args,
            kwargs,
            correlation_id: Some(correlation_id),
            enqueued_at: Utc::now(),
        }
    }

    /// Positional argument `index`, deserialized.
    pub fn arg<T: serde::de::DeserializeOwned>(&self, index: usize) -> Result<T, QueueError> {
        let value = self.args.get(index).cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }
}

/// Recorded result of one job execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl JobOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            finished_at: Utc::now(),
        }
    }
}

/// Transport for jobs and their outcomes.
#[async_trait]
pub trait JobBackend: Send + Sync {
    async fn push(&self, job: &JobDescriptor) -> Result<(), QueueError>;

    /// Next job, or `None` when nothing arrived within `timeout`.
    async fn pop(&self, timeout: Duration) -> Result<Option<JobDescriptor>, QueueError>;

    async fn record_outcome(&self, job_id: JobId, outcome: &JobOutcome) -> Result<(), QueueError>;

    async fn outcome(&self, job_id: JobId) -> Result<Option<JobOutcome>, QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

/// Process-wide queue handle with an explicit connect/close lifecycle.
#[derive(Default)]
pub struct JobQueue {
    backend: RwLock<Option<Arc<dyn JobBackend>>>,
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl JobQueue {
    /// A queue with no backend; `enqueue` fails until one is attached.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(backend: Arc<dyn JobBackend>) -> Self {
        let queue = Self::new();
        queue.attach(backend);
        queue
    }

    #[instrument(skip_all, fields(redis = %settings.url()), err)]
    pub async fn connect_redis(
        &self,
        settings: &RedisQueueSettings,
        keep_result: Duration,
    ) -> Result<(), QueueError> {
        let backend = RedisJobBackend::connect(&settings.url(), keep_result).await?;
        self.attach(Arc::new(backend));
        info!("job queue connected");
        Ok(())
    }

    pub fn attach(&self, backend: Arc<dyn JobBackend>) {
        if let Ok(mut slot) = self.backend.write() {
            *slot = Some(backend);
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.read().map(|slot| slot.is_some()).unwrap_or(false)
    }

    pub fn backend(&self) -> Result<Arc<dyn JobBackend>, QueueError> {
        self.backend
            .read()
            .ok()
            .and_then(|slot| slot.clone())
            .ok_or(QueueError::NotInitialized)
    }

    /// Detach and close the backend. Later enqueues fail with `NotInitialized`.
    pub async fn close(&self) -> Result<(), QueueError> {
        let backend = self.backend.write().ok().and_then(|mut slot| slot.take());
        if let Some(backend) = backend {
            backend.close().await?;
            info!("job queue closed");
        }
        Ok(())
    }

    /// Submit `job_name` without waiting for it to run.
    ///
    /// The correlation id (given, or fresh when `None`) is attached to the
    /// descriptor and written into `kwargs`.
    #[instrument(
        skip(self, args, kwargs, correlation_id),
        fields(job_id = tracing::field::Empty, correlation_id = tracing::field::Empty),
        err
    )]
    pub async fn enqueue(
        &self,
        job_name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        correlation_id: Option<CorrelationId>,
    ) -> Result<JobId, QueueError> {
        let backend = self.backend()?;
        let correlation_id = correlation_id.unwrap_or_default();
        let span = Span::current();
        span.record("correlation_id", correlation_id.as_str());

        let job = JobDescriptor::new(job_name, args, kwargs, correlation_id);
        span.record("job_id", tracing::field::display(job.job_id));

        backend.push(&job).await?;
        info!("job enqueued");
        Ok(job.job_id)
    }
}
