//! Redis list-backed job backend.
//!
//! ## Keys
//!
//! - **Queue**: `heroes:queue`, producers `LPUSH`, workers `BRPOP` (FIFO)
//! - **Outcome**: `heroes:result:{job_id}`, written with `SET ... EX keep_result`
//!
//! Blocking pops run on their own connection so they never stall pushes or
//! outcome writes multiplexed on the command connection.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, instrument};

use heroes_core::JobId;

use super::{JobBackend, JobDescriptor, JobOutcome, QueueError};

pub const QUEUE_KEY: &str = "heroes:queue";
const RESULT_KEY_PREFIX: &str = "heroes:result";

#[derive(Clone)]
pub struct RedisJobBackend {
    commands: ConnectionManager,
    blocking: ConnectionManager,
    keep_result: Duration,
}

impl std::fmt::Debug for RedisJobBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJobBackend")
            .field("keep_result", &self.keep_result)
            .finish_non_exhaustive()
    }
}

impl RedisJobBackend {
    /// Connect to `redis_url` (e.g. `redis://localhost:6379`).
    pub async fn connect(redis_url: &str, keep_result: Duration) -> Result<Self, QueueError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| QueueError::Connection(e.to_string()))?;
        let commands = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let blocking = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(Self {
            commands,
            blocking,
            keep_result,
        })
    }
}

fn result_key(job_id: JobId) -> String {
    format!("{RESULT_KEY_PREFIX}:{job_id}")
}

#[async_trait]
impl JobBackend for RedisJobBackend {
    #[instrument(skip(self, job), fields(job_id = %job.job_id, job_name = %job.job_name), err)]
    async fn push(&self, job: &JobDescriptor) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.commands.clone();

        let _: i64 = redis::cmd("LPUSH")
            .arg(QUEUE_KEY)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<JobDescriptor>, QueueError> {
        let mut conn = self.blocking.clone();

        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(QUEUE_KEY)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;

        match popped {
            Some((_, payload)) => {
                let job: JobDescriptor = serde_json::from_str(&payload)?;
                debug!(job_id = %job.job_id, "job dequeued");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn record_outcome(&self, job_id: JobId, outcome: &JobOutcome) -> Result<(), QueueError> {
        let payload = serde_json::to_string(outcome)?;
        let mut conn = self.commands.clone();

        let _: () = redis::cmd("SET")
            .arg(result_key(job_id))
            .arg(payload)
            .arg("EX")
            .arg(self.keep_result.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;
        Ok(())
    }

    async fn outcome(&self, job_id: JobId) -> Result<Option<JobOutcome>, QueueError> {
        let mut conn = self.commands.clone();

        let payload: Option<String> = redis::cmd("GET")
            .arg(result_key(job_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;

        payload
            .map(|p| serde_json::from_str(&p).map_err(QueueError::from))
            .transpose()
    }

    async fn close(&self) -> Result<(), QueueError> {
        // Connections close when the last manager clone is dropped.
        Ok(())
    }
}
