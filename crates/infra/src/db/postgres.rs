//! Postgres-backed store.
//!
//! Rows are mapped generically through JSON: reads select `to_jsonb(t)` and
//! deserialize the entity, writes go through `jsonb_populate_record`, so a
//! single implementation serves every entity type. Column names in generated
//! SQL come from the entity's static field lists (or its own serialized keys),
//! never from request input; filter values are always bound parameters.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | CrudError |
//! |------------|-----------------|-----------|
//! | Database (foreign key violation) | `23503` | `Validation` |
//! | Database (other) | any | `Storage` |
//! | PoolClosed | N/A | `NotInitialized("database")` |
//! | Other | N/A | `Storage` |
//!
//! Commit and rollback failures become `Transaction`.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{info, instrument};

use heroes_core::{
    CrudError, CrudResult, Direction, Entity, EntityId, FilterSpec, Op, PageWindow,
};

use super::{EntitySession, Session, Store, Visibility};
use crate::config::PostgresSettings;

/// Handle to the process-wide connection pool.
///
/// Cloning shares the same (possibly not yet connected) pool.
#[derive(Debug, Clone, Default)]
pub struct PgStore {
    pool: Arc<RwLock<Option<PgPool>>>,
}

impl PgStore {
    /// A store with no pool; `connect` must run before `begin`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(RwLock::new(Some(pool))),
        }
    }

    #[instrument(skip_all, fields(db = %settings.redacted_uri()), err)]
    pub async fn connect(&self, settings: &PostgresSettings) -> CrudResult<()> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect_with(settings.connect_options())
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let mut slot = self
            .pool
            .write()
            .map_err(|_| CrudError::storage("pool slot poisoned"))?;
        *slot = Some(pool);
        info!("database pool connected");
        Ok(())
    }

    /// Apply the embedded migrations under `crates/infra/migrations`.
    pub async fn migrate(&self) -> CrudResult<()> {
        let pool = self.pool()?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| CrudError::storage(format!("migration failed: {e}")))
    }

    /// Close the pool. Later `begin` calls fail with `NotInitialized`.
    pub async fn disconnect(&self) {
        let pool = match self.pool.write() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(pool) = pool {
            pool.close().await;
            info!("database pool closed");
        }
    }

    fn pool(&self) -> CrudResult<PgPool> {
        self.pool
            .read()
            .map_err(|_| CrudError::storage("pool slot poisoned"))?
            .clone()
            .ok_or(CrudError::NotInitialized("database"))
    }
}

#[async_trait]
impl Store for PgStore {
    type Session = PgSession;

    async fn begin(&self) -> CrudResult<PgSession> {
        let tx = self
            .pool()?
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(PgSession { tx })
    }
}

/// One database transaction.
pub struct PgSession {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl Session for PgSession {
    async fn commit(self) -> CrudResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| CrudError::transaction(format!("commit: {e}")))
    }

    async fn rollback(self) -> CrudResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| CrudError::transaction(format!("rollback: {e}")))
    }
}

#[async_trait]
impl<E: Entity> EntitySession<E> for PgSession {
    async fn find(&mut self, id: EntityId, visibility: Visibility) -> CrudResult<Option<E>> {
        let mut qb = select::<E>(visibility);
        qb.push(" AND t.id = ").push_bind(*id.as_uuid());

        let row = qb
            .build()
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find", e))?;
        row.map(|row| decode_row(&row)).transpose()
    }

    async fn find_all(
        &mut self,
        filter: Option<&FilterSpec>,
        visibility: Visibility,
        window: Option<PageWindow>,
    ) -> CrudResult<Vec<E>> {
        let mut qb = select::<E>(visibility);
        push_filter(&mut qb, filter, E::SEARCH_FIELDS);
        push_order(&mut qb, filter);
        push_window(&mut qb, window);

        let rows = qb
            .build()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_all", e))?;
        rows.iter().map(decode_row).collect()
    }

    async fn count(&mut self, filter: Option<&FilterSpec>, visibility: Visibility) -> CrudResult<u64> {
        let mut qb = count::<E>(visibility);
        push_filter(&mut qb, filter, E::SEARCH_FIELDS);

        let total: i64 = qb
            .build()
            .fetch_one(&mut *self.tx)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(|e| map_sqlx_error("count", e))?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn insert(&mut self, entity: &E) -> CrudResult<()> {
        let doc = encode(entity)?;
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {table} SELECT * FROM jsonb_populate_record(NULL::{table}, ",
            table = E::TABLE
        ));
        qb.push_bind(doc).push(")");

        qb.build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert", e))?;
        Ok(())
    }

    async fn save(&mut self, entity: &E, expected: Visibility) -> CrudResult<()> {
        let id = entity.id();
        let mut qb = save_statement::<E>(encode(entity)?, id, expected)?;

        let done = qb
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("save", e))?;
        if done.rows_affected() == 0 {
            return Err(CrudError::not_found(E::NAME, id));
        }
        Ok(())
    }

    async fn remove(&mut self, id: EntityId) -> CrudResult<bool> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("DELETE FROM {} WHERE id = ", E::TABLE));
        qb.push_bind(*id.as_uuid());

        let done = qb
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("remove", e))?;
        Ok(done.rows_affected() > 0)
    }

    async fn remove_deleted(&mut self) -> CrudResult<u64> {
        if !E::is_soft_deletable() {
            return Ok(0);
        }
        let done = sqlx::query(&format!("DELETE FROM {} WHERE is_deleted = TRUE", E::TABLE))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("remove_deleted", e))?;
        Ok(done.rows_affected())
    }
}

fn select<E: Entity>(visibility: Visibility) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT to_jsonb(t) AS doc FROM {} t WHERE TRUE", E::TABLE));
    push_visibility(&mut qb, visibility, E::is_soft_deletable());
    qb
}

fn count<E: Entity>(visibility: Visibility) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) AS total FROM {} t WHERE TRUE", E::TABLE));
    push_visibility(&mut qb, visibility, E::is_soft_deletable());
    qb
}

/// `UPDATE ... SET (cols) = (SELECT cols FROM jsonb_populate_record(NULL::table, ` with
/// the document bind and the `WHERE` clause left to the caller.
fn update<E: Entity>(doc: &Value) -> CrudResult<QueryBuilder<'static, Postgres>> {
    let columns = doc
        .as_object()
        .ok_or_else(|| CrudError::storage(format!("{} does not serialize to an object", E::NAME)))?
        .keys()
        .filter(|key| key.as_str() != "id")
        .map(|key| quote_ident(key))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(QueryBuilder::new(format!(
        "UPDATE {table} t SET ({columns}) = (SELECT {columns} FROM jsonb_populate_record(NULL::{table}, ",
        table = E::TABLE
    )))
}

/// `UPDATE` of the row with `id`, matching only while it has `expected`
/// visibility.
fn save_statement<E: Entity>(
    doc: Value,
    id: EntityId,
    expected: Visibility,
) -> CrudResult<QueryBuilder<'static, Postgres>> {
    let mut qb = update::<E>(&doc)?;
    qb.push_bind(doc).push(") WHERE t.id = ").push_bind(*id.as_uuid());
    push_visibility(&mut qb, expected, E::is_soft_deletable());
    Ok(qb)
}

fn push_visibility(qb: &mut QueryBuilder<'static, Postgres>, visibility: Visibility, soft: bool) {
    match (visibility, soft) {
        (Visibility::Any, _) | (Visibility::Active, false) => {}
        (Visibility::Active, true) => {
            qb.push(" AND t.deleted_at IS NULL");
        }
        (Visibility::Deleted, true) => {
            qb.push(" AND t.is_deleted = TRUE");
        }
        (Visibility::Deleted, false) => {
            qb.push(" AND FALSE");
        }
    }
}

fn push_filter(
    qb: &mut QueryBuilder<'static, Postgres>,
    filter: Option<&FilterSpec>,
    search_fields: &[&str],
) {
    let Some(spec) = filter else {
        return;
    };

    for p in &spec.predicates {
        let op = match p.op {
            Op::Eq => "=",
            Op::Neq => "<>",
            Op::Like => "LIKE",
            Op::ILike => "ILIKE",
        };
        qb.push(format!(" AND t.{}::text {op} ", quote_ident(p.field)))
            .push_bind(p.value.clone());
    }

    if let Some(term) = spec.search.as_deref() {
        if !search_fields.is_empty() {
            let pattern = format!("%{}%", escape_like(term));
            qb.push(" AND (");
            for (i, field) in search_fields.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                qb.push(format!("t.{}::text ILIKE ", quote_ident(field)))
                    .push_bind(pattern.clone());
            }
            qb.push(")");
        }
    }
}

fn push_order(qb: &mut QueryBuilder<'static, Postgres>, filter: Option<&FilterSpec>) {
    let keys = filter.map(|spec| spec.order_by.as_slice()).unwrap_or_default();
    if keys.is_empty() {
        qb.push(" ORDER BY t.created_at ASC, t.id ASC");
        return;
    }

    let rendered = keys
        .iter()
        .map(|key| {
            let dir = match key.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            format!("t.{} {dir}", quote_ident(key.field))
        })
        .collect::<Vec<_>>()
        .join(", ");
    qb.push(format!(" ORDER BY {rendered}, t.id ASC"));
}

fn push_window(qb: &mut QueryBuilder<'static, Postgres>, window: Option<PageWindow>) {
    if let Some(w) = window {
        let limit = i64::try_from(w.limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(w.offset).unwrap_or(i64::MAX);
        qb.push(" LIMIT ").push_bind(limit);
        qb.push(" OFFSET ").push_bind(offset);
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escape `LIKE` metacharacters so a search term matches literally.
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn encode<E: Entity>(entity: &E) -> CrudResult<Value> {
    serde_json::to_value(entity).map_err(|e| CrudError::storage(format!("encode {}: {e}", E::NAME)))
}

fn decode_row<E: Entity>(row: &sqlx::postgres::PgRow) -> CrudResult<E> {
    let doc: Value = row
        .try_get("doc")
        .map_err(|e| map_sqlx_error("decode", e))?;
    serde_json::from_value(doc).map_err(|e| CrudError::storage(format!("decode {}: {e}", E::NAME)))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> CrudError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23503") => CrudError::validation(format!(
                    "foreign key constraint {} violated",
                    db_err.constraint().unwrap_or("(unnamed)")
                )),
                _ => CrudError::storage(msg),
            }
        }
        sqlx::Error::PoolClosed => CrudError::NotInitialized("database"),
        other => CrudError::storage(format!("sqlx error in {operation}: {other}")),
    }
}
