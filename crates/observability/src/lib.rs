//! Tracing and structured logging shared by the API and worker binaries.

pub mod tracing;

pub use self::tracing::{LogSettings, init};
