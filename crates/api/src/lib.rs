//! HTTP API: router, generic CRUD endpoints, request context and error mapping.

pub mod app;
pub mod context;
pub mod middleware;
