//! Infrastructure layer: configuration, database stores, the CRUD repository,
//! the job queue and the worker runtime.

pub mod config;
pub mod db;
pub mod queue;
pub mod repository;
pub mod worker;

pub use config::{ConfigError, Environment, Settings};
pub use db::{EntitySession, MemoryStore, PgStore, Session, Store, Visibility, finish, unit_of_work};
pub use queue::{CorrelationId, JobDescriptor, JobOutcome, JobQueue, QueueError};
pub use repository::CrudRepository;
pub use worker::{JobContext, JobHandler, Worker};
