//! Generic CRUD repository implementing the soft-delete lifecycle.
//!
//! ```text
//! create -> active --update--> active
//!           active --delete--> deleted    (soft-deletable types)
//!           active --delete--> removed    (everything else)
//!          deleted --restore-> active
//!          deleted --hard_delete / purge_all--> removed
//! ```
//!
//! Every method takes the session it runs in; callers decide where the unit
//! of work starts and ends (see [`crate::db::finish`]).

use std::marker::PhantomData;

use tracing::debug;

use heroes_core::{
    CrudError, CrudResult, Entity, EntityId, FilterSpec, Page, PageParams, Record, Validate,
    next_timestamp,
};

use crate::db::{EntitySession, Visibility};

pub struct CrudRepository<E> {
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for CrudRepository<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for CrudRepository<E> {}

impl<E> Default for CrudRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for CrudRepository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrudRepository").finish()
    }
}

impl<E> CrudRepository<E> {
    pub const fn new() -> Self {
        Self {
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> CrudRepository<E> {
    /// Active entity by id.
    pub async fn get<S>(&self, session: &mut S, id: EntityId) -> CrudResult<Option<E>>
    where
        S: EntitySession<E>,
    {
        session.find(id, Visibility::Active).await
    }

    /// Entity by id whether or not it is soft-deleted.
    pub async fn get_deleted<S>(&self, session: &mut S, id: EntityId) -> CrudResult<Option<E>>
    where
        S: EntitySession<E>,
    {
        session.find(id, Visibility::Any).await
    }

    pub async fn exists<S>(&self, session: &mut S, id: EntityId) -> CrudResult<bool>
    where
        S: EntitySession<E>,
    {
        Ok(self.get(session, id).await?.is_some())
    }

    pub async fn list_all<S>(&self, session: &mut S, filter: Option<&FilterSpec>) -> CrudResult<Vec<E>>
    where
        S: EntitySession<E>,
    {
        session.find_all(filter, Visibility::Active, None).await
    }

    pub async fn list_deleted<S>(&self, session: &mut S, filter: Option<&FilterSpec>) -> CrudResult<Vec<E>>
    where
        S: EntitySession<E>,
    {
        session.find_all(filter, Visibility::Deleted, None).await
    }

    pub async fn list_paginated<S>(
        &self,
        session: &mut S,
        filter: Option<&FilterSpec>,
        params: PageParams,
    ) -> CrudResult<Page<E>>
    where
        S: EntitySession<E>,
    {
        params.validate()?;
        let total = session.count(filter, Visibility::Active).await?;
        let items = session
            .find_all(filter, Visibility::Active, Some(params.window()))
            .await?;
        Ok(Page::new(items, total, params))
    }

    pub async fn create<S>(&self, session: &mut S, input: E::Create) -> CrudResult<E>
    where
        S: EntitySession<E>,
    {
        input.validate()?;
        let entity = E::from_create(input, Record::new());
        session.insert(&entity).await?;
        debug!(entity = E::NAME, id = %entity.id(), "created");
        Ok(entity)
    }

    /// Apply the fields present in `patch` to an active entity.
    pub async fn update<S>(&self, session: &mut S, id: EntityId, patch: E::Update) -> CrudResult<E>
    where
        S: EntitySession<E>,
    {
        patch.validate()?;
        let mut entity = self.require_active(session, id).await?;
        entity.apply_update(patch);
        entity.record_mut().touch();
        session.save(&entity, Visibility::Active).await?;
        Ok(entity)
    }

    /// Soft-delete when the type supports it, remove the row otherwise.
    /// Returns the entity's last state.
    pub async fn delete<S>(&self, session: &mut S, id: EntityId) -> CrudResult<E>
    where
        S: EntitySession<E>,
    {
        let mut entity = self.require_active(session, id).await?;

        let at = next_timestamp(entity.record().updated_at);
        match entity.as_soft_deletable_mut() {
            Some(soft) => {
                soft.deletion_mut().mark(at);
                entity.record_mut().updated_at = at;
                session.save(&entity, Visibility::Active).await?;
                debug!(entity = E::NAME, %id, "soft-deleted");
            }
            None => {
                if !session.remove(id).await? {
                    return Err(CrudError::not_found(E::NAME, id));
                }
                debug!(entity = E::NAME, %id, "removed");
            }
        }
        Ok(entity)
    }

    /// Bring a soft-deleted entity back. Restoring an active entity is a no-op.
    pub async fn restore<S>(&self, session: &mut S, id: EntityId) -> CrudResult<E>
    where
        S: EntitySession<E>,
    {
        let mut entity = self
            .get_deleted(session, id)
            .await?
            .ok_or_else(|| CrudError::not_found(E::NAME, id))?;

        let Some(soft) = entity.as_soft_deletable_mut() else {
            return Err(CrudError::unsupported(E::NAME, "restore"));
        };
        if !soft.is_deleted() {
            return Ok(entity);
        }
        soft.deletion_mut().clear();
        entity.record_mut().touch();
        session.save(&entity, Visibility::Deleted).await?;
        debug!(entity = E::NAME, %id, "restored");
        Ok(entity)
    }

    /// Permanently remove one entity.
    ///
    /// Soft-deletable entities must be soft-deleted first; an active one is
    /// reported as not found and left in place.
    pub async fn hard_delete<S>(&self, session: &mut S, id: EntityId) -> CrudResult<E>
    where
        S: EntitySession<E>,
    {
        let visibility = if E::is_soft_deletable() {
            Visibility::Deleted
        } else {
            Visibility::Any
        };
        let entity = session
            .find(id, visibility)
            .await?
            .ok_or_else(|| CrudError::not_found(E::NAME, id))?;

        session.remove(id).await?;
        debug!(entity = E::NAME, %id, "purged");
        Ok(entity)
    }

    /// Permanently remove every soft-deleted entity of this type.
    pub async fn purge_all<S>(&self, session: &mut S) -> CrudResult<()>
    where
        S: EntitySession<E>,
    {
        let purged = session.remove_deleted().await?;
        debug!(entity = E::NAME, purged, "purged all deleted");
        Ok(())
    }

    async fn require_active<S>(&self, session: &mut S, id: EntityId) -> CrudResult<E>
    where
        S: EntitySession<E>,
    {
        self.get(session, id)
            .await?
            .ok_or_else(|| CrudError::not_found(E::NAME, id))
    }
}
