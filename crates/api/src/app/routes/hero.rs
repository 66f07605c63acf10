//! Hero routes: the generic CRUD set plus the ability relationship.

use axum::{Extension, Json, Router, http::StatusCode, routing::get};
use serde_json::{Map, json};
use tracing::{Instrument, Span, field, info, warn};

use heroes_core::{Ability, CrudError, CrudResult, Entity, EntityId, Hero, HeroFilter};
use heroes_infra::{CrudRepository, EntitySession, Store, unit_of_work};
use heroes_worker::handlers::PRINT_HERO;

use crate::app::AppState;
use crate::app::crud::{ApiResult, CrudEndpoints, crud_span};
use crate::app::dto::ApiPath;
use crate::app::errors::ApiError;
use crate::context::RequestContext;

pub fn router<S>() -> Router
where
    S: Store,
    S::Session: EntitySession<Ability> + EntitySession<Hero>,
{
    CrudEndpoints::<S, Hero, HeroFilter>::router()
        .route("/:id/ability", get(read_hero_ability::<S>))
}

/// `GET /v1/hero/:id/ability`
///
/// Returns the active ability of an active hero and asks the worker to
/// print the hero twice, tagged with this request's id.
async fn read_hero_ability<S>(
    Extension(state): Extension<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
    ApiPath(id): ApiPath<EntityId>,
) -> ApiResult<Json<Ability>>
where
    S: Store,
    S::Session: EntitySession<Ability> + EntitySession<Hero>,
{
    async move {
        Span::current().record("db_id", field::display(id));
        info!("Reading a hero's ability");

        let (hero, ability) = unit_of_work(&state.store, |mut session| async move {
            let outcome: CrudResult<(Hero, Option<Ability>)> = async {
                let hero = CrudRepository::<Hero>::new()
                    .get(&mut session, id)
                    .await?
                    .ok_or_else(|| CrudError::not_found(Hero::NAME, id))?;
                let ability = match hero.ability_id {
                    Some(ability_id) => {
                        CrudRepository::<Ability>::new()
                            .get(&mut session, ability_id)
                            .await?
                    }
                    None => None,
                };
                Ok((hero, ability))
            }
            .await;
            (session, outcome)
        })
        .await?;

        let correlation_id = ctx.correlation_id();
        for _ in 0..2 {
            state
                .queue
                .enqueue(
                    PRINT_HERO,
                    vec![json!(hero.id())],
                    Map::new(),
                    Some(correlation_id.clone()),
                )
                .await?;
        }

        match ability {
            Some(ability) => Ok(Json(ability)),
            None => {
                warn!("Hero has no active ability");
                Err(ApiError::client(StatusCode::NOT_FOUND, "Ability not found"))
            }
        }
    }
    .instrument(crud_span::<Hero>("read_ability"))
    .await
}
