//! HTTP application wiring.
//!
//! - `crud.rs`: the generic endpoint factory mounted for each entity
//! - `routes/`: the remaining routes (health, hero relationship)
//! - `dto.rs`: extractors and small response bodies
//! - `errors.rs`: the error boundary

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;

use heroes_core::{Ability, Hero};
use heroes_infra::{EntitySession, JobQueue, Store};

use crate::middleware;

pub mod crud;
pub mod dto;
pub mod errors;
pub mod routes;

/// Shared handles every handler reaches through `Extension`.
#[derive(Debug)]
pub struct AppState<S> {
    pub store: S,
    pub queue: Arc<JobQueue>,
}

impl<S: Clone> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<S> AppState<S> {
    pub fn new(store: S, queue: Arc<JobQueue>) -> Self {
        Self { store, queue }
    }
}

/// Build the full HTTP router (public entrypoint used by `main.rs` and the
/// black-box tests).
pub fn build_app<S>(state: AppState<S>) -> Router
where
    S: Store,
    S::Session: EntitySession<Ability> + EntitySession<Hero>,
{
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/v1", routes::router::<S>())
        .layer(Extension(state))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::request_context))
                .layer(CatchPanicLayer::custom(errors::panic_response)),
        )
}
