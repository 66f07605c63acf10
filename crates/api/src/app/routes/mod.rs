use axum::Router;

use heroes_core::{Ability, Hero};
use heroes_infra::{EntitySession, Store};

pub mod hero;
pub mod system;

/// Versioned resource routes, mounted under `/v1`.
pub fn router<S>() -> Router
where
    S: Store,
    S::Session: EntitySession<Ability> + EntitySession<Hero>,
{
    Router::new()
        .nest("/ability", crate::app::crud::CrudEndpoints::<S, Ability>::router())
        .nest("/hero", hero::router::<S>())
}
