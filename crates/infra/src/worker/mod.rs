//! Worker runtime: pulls jobs from the queue and runs each one in its own
//! database session.
//!
//! ## Job lifecycle
//!
//! `Dequeued -> SessionBound -> Executing -> Committed | RolledBack -> SessionReleased`
//!
//! - The session belongs to the job, not to the worker; concurrently running
//!   jobs never share one.
//! - After the handler returns, the outcome is recorded on the queue backend
//!   and read back; the session is committed only when that recorded outcome
//!   is a success.
//! - The `job` span (job id, job name, correlation id) is entered for the
//!   whole lifecycle and left when the job finishes, whatever the outcome.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Semaphore, watch};
use tracing::{Instrument, debug, error, info, info_span, warn};

use heroes_core::JobId;

use crate::config::{MAX_WORKER_JOBS, WorkerSettings};
use crate::db::{Session, Store};
use crate::queue::{CorrelationId, JobDescriptor, JobOutcome, JobQueue};

/// What a handler knows about the job it is running.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub job_name: String,
    pub correlation_id: CorrelationId,
    pub queue: Arc<JobQueue>,
}

/// Code run for one named job. `session` is the job's own unit of work.
#[async_trait]
pub trait JobHandler<T: Send>: Send + Sync {
    async fn run(&self, ctx: &JobContext, session: &mut T, job: &JobDescriptor) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Dequeued,
    SessionBound,
    Executing,
    Committed,
    RolledBack,
    SessionReleased,
}

pub struct Worker<S: Store> {
    store: S,
    queue: Arc<JobQueue>,
    handlers: HashMap<String, Arc<dyn JobHandler<S::Session>>>,
    settings: WorkerSettings,
}

impl<S: Store> fmt::Debug for Worker<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("jobs", &self.job_names())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<S: Store> Worker<S> {
    pub fn new(store: S, queue: Arc<JobQueue>, settings: WorkerSettings) -> Self {
        Self {
            store,
            queue,
            handlers: HashMap::new(),
            settings,
        }
    }

    pub fn register<H>(&mut self, job_name: impl Into<String>, handler: H) -> &mut Self
    where
        H: JobHandler<S::Session> + 'static,
    {
        self.handlers.insert(job_name.into(), Arc::new(handler));
        self
    }

    pub fn job_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run one job through its full lifecycle and return the final outcome.
    pub async fn process(&self, job: JobDescriptor) -> JobOutcome {
        let correlation_id = job.correlation_id.clone().unwrap_or_default();
        let span = info_span!(
            "job",
            job_id = %job.job_id,
            job_name = %job.job_name,
            correlation_id = %correlation_id,
        );
        self.execute(job, correlation_id).instrument(span).await
    }

    async fn execute(&self, job: JobDescriptor, correlation_id: CorrelationId) -> JobOutcome {
        info!("Job execution started");
        debug!(state = ?JobState::Dequeued);

        let Some(handler) = self.handlers.get(&job.job_name).cloned() else {
            error!("no handler registered for this job");
            let outcome = JobOutcome::failed(format!("unknown job `{}`", job.job_name));
            self.record(job.job_id, &outcome).await;
            return outcome;
        };

        let mut session = match self.store.begin().await {
            Ok(session) => session,
            Err(err) => {
                error!(error = %err, "could not open a session for the job");
                let outcome = JobOutcome::failed(err.to_string());
                self.record(job.job_id, &outcome).await;
                return outcome;
            }
        };
        debug!(state = ?JobState::SessionBound);

        let ctx = JobContext {
            job_id: job.job_id,
            job_name: job.job_name.clone(),
            correlation_id,
            queue: Arc::clone(&self.queue),
        };

        debug!(state = ?JobState::Executing);
        let outcome = match handler.run(&ctx, &mut session, &job).await {
            Ok(()) => JobOutcome::succeeded(),
            Err(err) => {
                error!(error = ?err, "job handler failed");
                JobOutcome::failed(format!("{err:#}"))
            }
        };

        self.record(job.job_id, &outcome).await;
        let recorded = self.recorded_outcome(job.job_id).await.unwrap_or(outcome);

        let outcome = if recorded.success {
            match session.commit().await {
                Ok(()) => {
                    debug!(state = ?JobState::Committed);
                    recorded
                }
                Err(err) => {
                    error!(error = %err, "job succeeded but its session failed to commit");
                    let failed = JobOutcome::failed(err.to_string());
                    self.record(job.job_id, &failed).await;
                    failed
                }
            }
        } else {
            if let Err(err) = session.rollback().await {
                warn!(error = %err, "rollback failed");
            }
            debug!(state = ?JobState::RolledBack);
            recorded
        };

        debug!(state = ?JobState::SessionReleased);
        info!(success = outcome.success, "Job execution completed");
        outcome
    }

    async fn record(&self, job_id: JobId, outcome: &JobOutcome) {
        let result = match self.queue.backend() {
            Ok(backend) => backend.record_outcome(job_id, outcome).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(error = %err, "could not record job outcome");
        }
    }

    async fn recorded_outcome(&self, job_id: JobId) -> Option<JobOutcome> {
        let backend = self.queue.backend().ok()?;
        match backend.outcome(job_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "could not read back job outcome");
                None
            }
        }
    }

    /// Poll for jobs until `shutdown` turns true, running up to
    /// `max_jobs` of them concurrently, then wait for in-flight jobs.
    ///
    /// A poll already in progress is not cancelled; shutdown takes effect
    /// within one poll timeout.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let max_jobs = self.settings.max_jobs.clamp(1, MAX_WORKER_JOBS);
        let permits = Arc::new(Semaphore::new(max_jobs));
        info!(max_jobs, jobs = ?self.job_names(), "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let polled = match self.queue.backend() {
                Ok(backend) => backend.pop(self.settings.poll_timeout).await,
                Err(err) => Err(err),
            };

            match polled {
                Ok(Some(job)) => {
                    let worker = Arc::clone(&self);
                    tokio::spawn(async move {
                        worker.process(job).await;
                        drop(permit);
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    drop(permit);
                    warn!(error = %err, "failed to poll job queue");
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.poll_timeout) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        info!("worker shutting down, waiting for running jobs");
        let _ = permits
            .acquire_many(u32::try_from(max_jobs).unwrap_or(u32::MAX))
            .await;
        info!("worker stopped");
    }
}
