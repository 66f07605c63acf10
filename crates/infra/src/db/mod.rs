//! Storage abstraction: a [`Store`] hands out transactional sessions, and a
//! session exposes row-level primitives per entity type through
//! [`EntitySession`].
//!
//! Sessions are passed explicitly to whoever needs them (HTTP handler, job
//! handler, repository). Dropping a session without committing discards its
//! changes.

pub mod memory;
pub mod postgres;

pub use memory::{MemorySession, MemoryStore};
pub use postgres::{PgSession, PgStore};

use async_trait::async_trait;

use heroes_core::{CrudResult, Entity, EntityId, FilterSpec, PageWindow};

/// Which rows a read may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Rows that are not soft-deleted. Same as `Any` for entities without
    /// soft-delete support.
    Active,
    /// Soft-deleted rows only. Always empty for entities without soft-delete.
    Deleted,
    /// Every row.
    Any,
}

/// A unit of work. Either `commit` applies every change made through it, or
/// nothing is applied.
#[async_trait]
pub trait Session: Send + Sized {
    async fn commit(self) -> CrudResult<()>;
    async fn rollback(self) -> CrudResult<()>;
}

/// Source of sessions; cheap to clone and shared across tasks.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    type Session: Session + 'static;

    async fn begin(&self) -> CrudResult<Self::Session>;
}

/// Row-level access to one entity type inside a session.
#[async_trait]
pub trait EntitySession<E: Entity>: Send {
    async fn find(&mut self, id: EntityId, visibility: Visibility) -> CrudResult<Option<E>>;

    async fn find_all(
        &mut self,
        filter: Option<&FilterSpec>,
        visibility: Visibility,
        window: Option<PageWindow>,
    ) -> CrudResult<Vec<E>>;

    async fn count(&mut self, filter: Option<&FilterSpec>, visibility: Visibility) -> CrudResult<u64>;

    async fn insert(&mut self, entity: &E) -> CrudResult<()>;

    /// Overwrite the stored row that has `entity.id()`, provided that row
    /// still matches `expected` when the write lands. `NotFound` otherwise,
    /// and nothing is written.
    async fn save(&mut self, entity: &E, expected: Visibility) -> CrudResult<()>;

    /// Delete the row; `false` when it did not exist.
    async fn remove(&mut self, id: EntityId) -> CrudResult<bool>;

    /// Delete every soft-deleted row of this entity type.
    async fn remove_deleted(&mut self) -> CrudResult<u64>;
}

/// Close a unit of work according to `outcome`: commit on success, roll back
/// on failure. The original error wins over a rollback failure.
pub async fn finish<S, T>(session: S, outcome: CrudResult<T>) -> CrudResult<T>
where
    S: Session,
{
    match outcome {
        Ok(value) => {
            session.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = session.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Open a session on `store`, hand it to `op`, then [`finish`] it with the
/// result `op` returns alongside the session.
pub async fn unit_of_work<S, T, F, Fut>(store: &S, op: F) -> CrudResult<T>
where
    S: Store,
    F: FnOnce(S::Session) -> Fut,
    Fut: Future<Output = (S::Session, CrudResult<T>)>,
{
    let session = store.begin().await?;
    let (session, outcome) = op(session).await;
    finish(session, outcome).await
}
