//! In-memory store used by tests and by the API in local mode.
//!
//! Tables hold entities as JSON documents keyed by id. A session copies a
//! table the first time it touches it, works on that copy, and records every
//! write; `commit` checks the writes again against the shared tables and
//! applies all of them or none. Uncommitted writes are therefore invisible to
//! other sessions and rollback is a drop.
//!
//! Writes are checked the way Postgres checks them: a save only lands on a
//! row that still has the visibility the caller read it with, and foreign
//! keys declared by [`Entity::REFERENCES`] must point at existing rows, both
//! when the referencing row is written and when a referenced row is removed.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;

use heroes_core::filter::like_matches;
use heroes_core::{
    CrudError, CrudResult, Direction, Entity, EntityId, FilterSpec, Op, OrderKey, PageWindow,
};

use super::{EntitySession, Session, Store, Visibility};

type Table = BTreeMap<EntityId, Value>;
type Tables = HashMap<&'static str, Table>;

/// `table.column` references rows of `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Link {
    table: &'static str,
    column: &'static str,
    target: &'static str,
}

#[derive(Debug, Default)]
struct Shared {
    tables: Tables,
    /// Foreign keys of every entity type written so far.
    links: Vec<Link>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed rows in `table`.
    pub fn row_count(&self, table: &str) -> usize {
        lock(&self.shared)
            .map(|shared| shared.tables.get(table).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Session = MemorySession;

    async fn begin(&self) -> CrudResult<MemorySession> {
        Ok(MemorySession {
            shared: Arc::clone(&self.shared),
            local: HashMap::new(),
            writes: Vec::new(),
        })
    }
}

#[derive(Debug, Clone)]
enum Change {
    Insert(Value),
    Save {
        doc: Value,
        expected: Visibility,
        soft: bool,
    },
    Remove,
}

#[derive(Debug, Clone)]
struct Write {
    entity: &'static str,
    table: &'static str,
    id: EntityId,
    references: &'static [(&'static str, &'static str)],
    change: Change,
}

impl Write {
    fn of<E: Entity>(id: EntityId, change: Change) -> Self {
        Self {
            entity: E::NAME,
            table: E::TABLE,
            id,
            references: E::REFERENCES,
            change,
        }
    }
}

/// Tables a write is checked against and applied to.
trait View {
    fn table(&mut self, name: &'static str) -> CrudResult<&mut Table>;
}

/// Check `write` against `view`, then apply it. Returns whether a row
/// changed; removing a missing row changes nothing.
fn apply(view: &mut impl View, links: &[Link], write: &Write) -> CrudResult<bool> {
    let doc = match &write.change {
        Change::Remove => {
            ensure_unreferenced(view, links, write)?;
            return Ok(view.table(write.table)?.remove(&write.id).is_some());
        }
        Change::Insert(doc) => {
            if view.table(write.table)?.contains_key(&write.id) {
                return Err(CrudError::storage(format!(
                    "duplicate key: {} {} already exists",
                    write.entity, write.id
                )));
            }
            doc
        }
        Change::Save { doc, expected, soft } => {
            let current = view.table(write.table)?.get(&write.id);
            if !current.is_some_and(|row| visible(row, *expected, *soft)) {
                return Err(CrudError::not_found(write.entity, write.id));
            }
            doc
        }
    };

    ensure_references(view, write, doc)?;
    view.table(write.table)?.insert(write.id, doc.clone());
    Ok(true)
}

fn ensure_references(view: &mut impl View, write: &Write, doc: &Value) -> CrudResult<()> {
    for &(column, target) in write.references {
        let Some(raw) = doc.get(column).and_then(Value::as_str) else {
            continue;
        };
        let found = match raw.parse::<EntityId>() {
            Ok(id) => view.table(target)?.contains_key(&id),
            Err(_) => false,
        };
        if !found {
            return Err(CrudError::validation(format!(
                "foreign key constraint violated: {}.{column} references missing {target} row {raw}",
                write.table
            )));
        }
    }
    Ok(())
}

fn ensure_unreferenced(view: &mut impl View, links: &[Link], write: &Write) -> CrudResult<()> {
    let id = write.id.to_string();
    for link in links.iter().filter(|link| link.target == write.table) {
        let referenced = view
            .table(link.table)?
            .values()
            .any(|row| row.get(link.column).and_then(Value::as_str) == Some(id.as_str()));
        if referenced {
            return Err(CrudError::validation(format!(
                "foreign key constraint violated: {} {} is still referenced from {}.{}",
                write.entity, write.id, link.table, link.column
            )));
        }
    }
    Ok(())
}

/// The shared tables as a commit sees them: untouched ones are copied on
/// first use, and nothing reaches `base` until every write has applied.
struct Staging<'a> {
    base: &'a Tables,
    staged: Tables,
}

impl View for Staging<'_> {
    fn table(&mut self, name: &'static str) -> CrudResult<&mut Table> {
        let base = self.base;
        Ok(self
            .staged
            .entry(name)
            .or_insert_with(|| base.get(name).cloned().unwrap_or_default()))
    }
}

#[derive(Debug)]
pub struct MemorySession {
    shared: Arc<Mutex<Shared>>,
    local: Tables,
    writes: Vec<Write>,
}

impl View for MemorySession {
    fn table(&mut self, name: &'static str) -> CrudResult<&mut Table> {
        if !self.local.contains_key(name) {
            let snapshot = lock(&self.shared)?.tables.get(name).cloned().unwrap_or_default();
            self.local.insert(name, snapshot);
        }
        Ok(self.local.entry(name).or_default())
    }
}

impl MemorySession {
    fn write<E: Entity>(&mut self, id: EntityId, change: Change) -> CrudResult<bool> {
        let links = self.links::<E>()?;
        let write = Write::of::<E>(id, change);
        let changed = apply(self, &links, &write)?;
        if changed {
            self.writes.push(write);
        }
        Ok(changed)
    }

    /// Register `E`'s foreign keys with the store and return every known one.
    fn links<E: Entity>(&self) -> CrudResult<Vec<Link>> {
        let mut shared = lock(&self.shared)?;
        for &(column, target) in E::REFERENCES {
            let link = Link { table: E::TABLE, column, target };
            if !shared.links.contains(&link) {
                shared.links.push(link);
            }
        }
        Ok(shared.links.clone())
    }

    fn select<E: Entity>(
        &mut self,
        filter: Option<&FilterSpec>,
        visibility: Visibility,
    ) -> CrudResult<Vec<Value>> {
        let soft = E::is_soft_deletable();
        let docs = self
            .table(E::TABLE)?
            .values()
            .filter(|doc| visible(doc, visibility, soft))
            .filter(|doc| filter.is_none_or(|spec| matches_spec(doc, spec, E::SEARCH_FIELDS)))
            .cloned()
            .collect();
        Ok(docs)
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn commit(self) -> CrudResult<()> {
        let mut shared = lock(&self.shared).map_err(|e| CrudError::transaction(e.to_string()))?;
        let Shared { tables, links } = &mut *shared;

        let mut staging = Staging { base: &*tables, staged: Tables::new() };
        for write in &self.writes {
            apply(&mut staging, links.as_slice(), write)?;
        }
        let staged = staging.staged;
        tables.extend(staged);
        Ok(())
    }

    async fn rollback(self) -> CrudResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<E: Entity> EntitySession<E> for MemorySession {
    async fn find(&mut self, id: EntityId, visibility: Visibility) -> CrudResult<Option<E>> {
        let soft = E::is_soft_deletable();
        self.table(E::TABLE)?
            .get(&id)
            .filter(|doc| visible(doc, visibility, soft))
            .map(|doc| decode(doc.clone()))
            .transpose()
    }

    async fn find_all(
        &mut self,
        filter: Option<&FilterSpec>,
        visibility: Visibility,
        window: Option<PageWindow>,
    ) -> CrudResult<Vec<E>> {
        let mut docs = self.select::<E>(filter, visibility)?;
        let keys = order_keys(filter);
        docs.sort_by(|a, b| compare_docs(a, b, &keys));

        let (skip, take) = match window {
            Some(w) => (to_usize(w.offset), to_usize(w.limit)),
            None => (0, usize::MAX),
        };
        docs.into_iter().skip(skip).take(take).map(decode).collect()
    }

    async fn count(&mut self, filter: Option<&FilterSpec>, visibility: Visibility) -> CrudResult<u64> {
        Ok(self.select::<E>(filter, visibility)?.len() as u64)
    }

    async fn insert(&mut self, entity: &E) -> CrudResult<()> {
        self.write::<E>(entity.id(), Change::Insert(encode(entity)?))?;
        Ok(())
    }

    async fn save(&mut self, entity: &E, expected: Visibility) -> CrudResult<()> {
        let change = Change::Save {
            doc: encode(entity)?,
            expected,
            soft: E::is_soft_deletable(),
        };
        self.write::<E>(entity.id(), change)?;
        Ok(())
    }

    async fn remove(&mut self, id: EntityId) -> CrudResult<bool> {
        self.write::<E>(id, Change::Remove)
    }

    async fn remove_deleted(&mut self) -> CrudResult<u64> {
        if !E::is_soft_deletable() {
            return Ok(0);
        }
        let doomed: Vec<EntityId> = self
            .table(E::TABLE)?
            .iter()
            .filter(|(_, doc)| visible(doc, Visibility::Deleted, true))
            .map(|(id, _)| *id)
            .collect();
        for id in &doomed {
            self.write::<E>(*id, Change::Remove)?;
        }
        Ok(doomed.len() as u64)
    }
}

fn lock(shared: &Mutex<Shared>) -> CrudResult<MutexGuard<'_, Shared>> {
    shared
        .lock()
        .map_err(|_| CrudError::storage("memory store lock poisoned"))
}

fn encode<E: Entity>(entity: &E) -> CrudResult<Value> {
    serde_json::to_value(entity).map_err(|e| CrudError::storage(format!("encode {}: {e}", E::NAME)))
}

fn decode<E: Entity>(doc: Value) -> CrudResult<E> {
    serde_json::from_value(doc).map_err(|e| CrudError::storage(format!("decode {}: {e}", E::NAME)))
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

fn visible(doc: &Value, visibility: Visibility, soft: bool) -> bool {
    match visibility {
        Visibility::Any => true,
        Visibility::Active => !soft || doc.get("deleted_at").is_none_or(Value::is_null),
        Visibility::Deleted => soft && doc.get("is_deleted").and_then(Value::as_bool) == Some(true),
    }
}

/// Column value as SQL would render it with `::text`; `None` for NULL.
fn as_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn matches_spec(doc: &Value, spec: &FilterSpec, search_fields: &[&str]) -> bool {
    let predicates = spec.predicates.iter().all(|p| {
        let Some(text) = as_text(doc.get(p.field)) else {
            return false;
        };
        match p.op {
            Op::Eq => text == p.value,
            Op::Neq => text != p.value,
            Op::Like => like_matches(&p.value, &text, false),
            Op::ILike => like_matches(&p.value, &text, true),
        }
    });

    let search = match spec.search.as_deref() {
        Some(term) if !search_fields.is_empty() => {
            let term = term.to_lowercase();
            search_fields.iter().any(|field| {
                as_text(doc.get(*field)).is_some_and(|text| text.to_lowercase().contains(&term))
            })
        }
        _ => true,
    };

    predicates && search
}

const DEFAULT_ORDER: [OrderKey; 2] = [
    OrderKey { field: "created_at", direction: Direction::Asc },
    OrderKey { field: "id", direction: Direction::Asc },
];

fn order_keys(filter: Option<&FilterSpec>) -> Vec<OrderKey> {
    match filter {
        Some(spec) if !spec.order_by.is_empty() => {
            let mut keys = spec.order_by.clone();
            keys.push(OrderKey { field: "id", direction: Direction::Asc });
            keys
        }
        _ => DEFAULT_ORDER.to_vec(),
    }
}

fn compare_docs(a: &Value, b: &Value, keys: &[OrderKey]) -> Ordering {
    keys.iter()
        .map(|key| {
            let ord = compare_values(a.get(key.field), b.get(key.field));
            match key.direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            }
        })
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Ascending order with NULLs last, matching Postgres defaults.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}
