//! Entity abstraction shared by every persisted type.
//!
//! An [`Entity`] carries a [`Record`] (identity + timestamps) and declares its
//! create/update inputs. Soft deletion is a capability: only entities that
//! implement [`SoftDeletable`] expose it through [`Entity::as_soft_deletable_mut`],
//! everything else is removed outright on delete.

use std::fmt::Debug;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CrudResult;
use crate::id::EntityId;

/// Current time truncated to the precision the database keeps (microseconds).
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// A timestamp strictly after `previous`, normally "now".
pub fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

/// Identity and bookkeeping timestamps common to all rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: EntityId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new() -> Self {
        let at = now();
        Self {
            id: EntityId::new(),
            created_at: at,
            updated_at: at,
        }
    }

    /// Bump `updated_at` and return the new value.
    pub fn touch(&mut self) -> DateTime<Utc> {
        self.updated_at = next_timestamp(self.updated_at);
        self.updated_at
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

/// Soft-delete metadata. `is_deleted` always mirrors `deleted_at.is_some()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deletion {
    pub deleted_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
}

impl Deletion {
    pub fn mark(&mut self, at: DateTime<Utc>) {
        self.deleted_at = Some(at);
        self.is_deleted = true;
    }

    pub fn clear(&mut self) {
        self.deleted_at = None;
        self.is_deleted = false;
    }
}

/// Capability of entities that are hidden rather than removed on delete.
pub trait SoftDeletable {
    fn deletion(&self) -> &Deletion;
    fn deletion_mut(&mut self) -> &mut Deletion;

    fn is_deleted(&self) -> bool {
        self.deletion().is_deleted
    }
}

/// Input-level checks that serde's typing cannot express.
pub trait Validate {
    fn validate(&self) -> CrudResult<()> {
        Ok(())
    }
}

/// A persisted entity type.
///
/// Serialization must produce a flat JSON object whose keys are exactly the
/// table's columns; stores rely on this to map rows generically.
pub trait Entity: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + Unpin + 'static {
    type Create: DeserializeOwned + Validate + Debug + Send + 'static;
    type Update: DeserializeOwned + Validate + Debug + Send + 'static;

    /// Human-readable model name used in logs and errors.
    const NAME: &'static str;
    const TABLE: &'static str;
    /// Columns that filters and ordering keys may reference.
    const FIELDS: &'static [&'static str];
    /// Columns matched by free-text search.
    const SEARCH_FIELDS: &'static [&'static str] = &[];
    /// Foreign keys as `(column, referenced table)`. A non-null value must be
    /// the id of an existing row in the referenced table.
    const REFERENCES: &'static [(&'static str, &'static str)] = &[];

    fn record(&self) -> &Record;
    fn record_mut(&mut self) -> &mut Record;

    fn from_create(input: Self::Create, record: Record) -> Self;

    /// Apply the fields present in `patch`, leaving absent ones untouched.
    fn apply_update(&mut self, patch: Self::Update);

    fn is_soft_deletable() -> bool {
        false
    }

    fn as_soft_deletable(&self) -> Option<&dyn SoftDeletable> {
        None
    }

    fn as_soft_deletable_mut(&mut self) -> Option<&mut dyn SoftDeletable> {
        None
    }

    fn id(&self) -> EntityId {
        self.record().id
    }
}
