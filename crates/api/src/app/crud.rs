//! Generic CRUD endpoints.
//!
//! [`CrudEndpoints::router`] builds the same set of routes for any entity
//! whose store session can serve it. Routes that only make sense for
//! soft-deletable entities (`/deleted`, `/:id/restore`, `/:id/purge`,
//! `/purge`) are added only when the entity supports soft deletion.
//!
//! Every handler runs one unit of work and executes inside a `crud` span
//! carrying `db_model`, plus `db_id` / `found_items` once known.

use std::marker::PhantomData;

use axum::{
    extract::Extension,
    http::StatusCode,
    routing::{delete, get, patch},
    Json, Router,
};
use tracing::{field, info, info_span, warn, Instrument, Span};

use heroes_core::{
    CrudError, Entity, EntityId, FilterSchema, NoFilter, Page, PageParams,
};
use heroes_infra::{unit_of_work, CrudRepository, EntitySession, Store};

use crate::app::dto::{ApiJson, ApiPath, ApiQuery, MessageResponse};
use crate::app::errors::ApiError;
use crate::app::AppState;

pub type ApiResult<T> = Result<T, ApiError>;

/// Route factory for entity `E` stored in `S`, filtered with `F`.
pub struct CrudEndpoints<S, E, F = NoFilter> {
    _marker: PhantomData<fn() -> (S, E, F)>,
}

impl<S, E, F> CrudEndpoints<S, E, F>
where
    S: Store,
    S::Session: EntitySession<E>,
    E: Entity,
    F: FilterSchema,
{
    pub fn router() -> Router {
        let router = Router::new()
            .route("/all", get(list_all::<S, E, F>))
            .route("/", get(list_paginated::<S, E, F>).post(create::<S, E>))
            .route(
                "/:id",
                get(read_one::<S, E>)
                    .patch(update::<S, E>)
                    .delete(delete_one::<S, E>),
            );

        if !E::is_soft_deletable() {
            return router;
        }

        router
            .route("/deleted", get(list_deleted::<S, E, F>))
            .route("/purge", delete(purge_all::<S, E>))
            .route("/:id/restore", patch(restore::<S, E>))
            .route("/:id/purge", delete(purge_one::<S, E>))
    }
}

pub(crate) fn crud_span<E: Entity>(operation: &'static str) -> Span {
    info_span!(
        "crud",
        db_model = E::NAME,
        operation,
        db_id = field::Empty,
        found_items = field::Empty,
    )
}

fn repo<E: Entity>() -> CrudRepository<E> {
    CrudRepository::new()
}

async fn list_all<S, E, F>(
    Extension(state): Extension<AppState<S>>,
    ApiQuery(filter): ApiQuery<F>,
) -> ApiResult<Json<Vec<E>>>
where
    S: Store,
    S::Session: EntitySession<E>,
    E: Entity,
    F: FilterSchema,
{
    async move {
        info!("Reading all entries");
        let spec = filter.into_spec()?;
        let items = unit_of_work(&state.store, |mut session| async move {
            let outcome = repo::<E>().list_all(&mut session, spec.as_ref()).await;
            (session, outcome)
        })
        .await?;

        Span::current().record("found_items", items.len());
        info!("Entries read");
        Ok(Json(items))
    }
    .instrument(crud_span::<E>("list_all"))
    .await
}

async fn list_deleted<S, E, F>(
    Extension(state): Extension<AppState<S>>,
    ApiQuery(filter): ApiQuery<F>,
) -> ApiResult<Json<Vec<E>>>
where
    S: Store,
    S::Session: EntitySession<E>,
    E: Entity,
    F: FilterSchema,
{
    async move {
        info!("Reading all deleted entries");
        let spec = filter.into_spec()?;
        let items = unit_of_work(&state.store, |mut session| async move {
            let outcome = repo::<E>().list_deleted(&mut session, spec.as_ref()).await;
            (session, outcome)
        })
        .await?;

        Span::current().record("found_items", items.len());
        info!("Deleted entries read");
        Ok(Json(items))
    }
    .instrument(crud_span::<E>("list_deleted"))
    .await
}

async fn list_paginated<S, E, F>(
    Extension(state): Extension<AppState<S>>,
    ApiQuery(filter): ApiQuery<F>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> ApiResult<Json<Page<E>>>
where
    S: Store,
    S::Session: EntitySession<E>,
    E: Entity,
    F: FilterSchema,
{
    async move {
        info!(page = params.page, size = params.size, "Reading a page of entries");
        let spec = filter.into_spec()?;
        let page = unit_of_work(&state.store, |mut session| async move {
            let outcome = repo::<E>()
                .list_paginated(&mut session, spec.as_ref(), params)
                .await;
            (session, outcome)
        })
        .await?;

        Span::current().record("found_items", page.items.len());
        Ok(Json(page))
    }
    .instrument(crud_span::<E>("list_paginated"))
    .await
}

async fn read_one<S, E>(
    Extension(state): Extension<AppState<S>>,
    ApiPath(id): ApiPath<EntityId>,
) -> ApiResult<Json<E>>
where
    S: Store,
    S::Session: EntitySession<E>,
    E: Entity,
{
    async move {
        Span::current().record("db_id", field::display(id));
        info!("Reading a single entry");
        let found = unit_of_work(&state.store, |mut session| async move {
            let outcome = repo::<E>().get(&mut session, id).await;
            (session, outcome)
        })
        .await?;

        match found {
            Some(entity) => Ok(Json(entity)),
            None => {
                warn!("Entry not found");
                Err(CrudError::not_found(E::NAME, id).into())
            }
        }
    }
    .instrument(crud_span::<E>("read"))
    .await
}

async fn create<S, E>(
    Extension(state): Extension<AppState<S>>,
    ApiJson(input): ApiJson<E::Create>,
) -> ApiResult<Json<E>>
where
    S: Store,
    S::Session: EntitySession<E>,
    E: Entity,
{
    async move {
        info!("Creating a new entry");
        tracing::debug!(data = ?input, "create payload");
        let created = unit_of_work(&state.store, |mut session| async move {
            let outcome = repo::<E>().create(&mut session, input).await;
            (session, outcome)
        })
        .await?;

        Span::current().record("db_id", field::display(created.id()));
        info!("Entry created");
        Ok(Json(created))
    }
    .instrument(crud_span::<E>("create"))
    .await
}

async fn update<S, E>(
    Extension(state): Extension<AppState<S>>,
    ApiPath(id): ApiPath<EntityId>,
    ApiJson(patch): ApiJson<E::Update>,
) -> ApiResult<Json<E>>
where
    S: Store,
    S::Session: EntitySession<E>,
    E: Entity,
{
    async move {
        Span::current().record("db_id", field::display(id));
        info!("Updating an entry");
        tracing::debug!(data = ?patch, "update payload");
        let updated = unit_of_work(&state.store, |mut session| async move {
            let outcome = repo::<E>().update(&mut session, id, patch).await;
            (session, outcome)
        })
        .await?;

        info!("Entry updated");
        Ok(Json(updated))
    }
    .instrument(crud_span::<E>("update"))
    .await
}

async fn delete_one<S, E>(
    Extension(state): Extension<AppState<S>>,
    ApiPath(id): ApiPath<EntityId>,
) -> ApiResult<Json<MessageResponse>>
where
    S: Store,
    S::Session: EntitySession<E>,
    E: Entity,
{
    async move {
        Span::current().record("db_id", field::display(id));
        info!("Deleting an entry");
        unit_of_work(&state.store, |mut session| async move {
            let outcome = repo::<E>().delete(&mut session, id).await;
            (session, outcome)
        })
        .await?;

        info!("Entry deleted");
        Ok(Json(MessageResponse::DELETED))
    }
    .instrument(crud_span::<E>("delete"))
    .await
}

async fn restore<S, E>(
    Extension(state): Extension<AppState<S>>,
    ApiPath(id): ApiPath<EntityId>,
) -> ApiResult<Json<E>>
where
    S: Store,
    S::Session: EntitySession<E>,
    E: Entity,
{
    async move {
        Span::current().record("db_id", field::display(id));
        info!("Restoring an entry");
        let restored = unit_of_work(&state.store, |mut session| async move {
            let outcome = repo::<E>().restore(&mut session, id).await;
            (session, outcome)
        })
        .await?;

        info!("Entry restored");
        Ok(Json(restored))
    }
    .instrument(crud_span::<E>("restore"))
    .await
}

async fn purge_one<S, E>(
    Extension(state): Extension<AppState<S>>,
    ApiPath(id): ApiPath<EntityId>,
) -> ApiResult<Json<E>>
where
    S: Store,
    S::Session: EntitySession<E>,
    E: Entity,
{
    async move {
        Span::current().record("db_id", field::display(id));
        info!("Purging a soft-deleted entry");
        let purged = unit_of_work(&state.store, |mut session| async move {
            let outcome = repo::<E>().hard_delete(&mut session, id).await;
            (session, outcome)
        })
        .await?;

        info!("Entry purged");
        Ok(Json(purged))
    }
    .instrument(crud_span::<E>("purge"))
    .await
}

async fn purge_all<S, E>(Extension(state): Extension<AppState<S>>) -> ApiResult<StatusCode>
where
    S: Store,
    S::Session: EntitySession<E>,
    E: Entity,
{
    async move {
        info!("Purging all soft-deleted entries");
        unit_of_work(&state.store, |mut session| async move {
            let outcome = repo::<E>().purge_all(&mut session).await;
            (session, outcome)
        })
        .await?;

        info!("Soft-deleted entries purged");
        Ok(StatusCode::NO_CONTENT)
    }
    .instrument(crud_span::<E>("purge_all"))
    .await
}
