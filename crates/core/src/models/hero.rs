use serde::{Deserialize, Serialize};

use crate::entity::{Deletion, Entity, Record, SoftDeletable, Validate};
use crate::error::CrudResult;
use crate::filter::{FilterSchema, FilterSpec, Op, parse_order_by};
use crate::id::EntityId;

/// A hero, optionally referencing one [`crate::Ability`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hero {
    #[serde(flatten)]
    pub record: Record,
    pub name: String,
    pub ability_id: Option<EntityId>,
    #[serde(flatten)]
    pub deletion: Deletion,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeroCreate {
    pub name: String,
    #[serde(default)]
    pub ability_id: Option<EntityId>,
}

/// Sparse hero update. `ability_id: null` detaches the ability, an absent
/// `ability_id` leaves it alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeroUpdate {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "super::double_option")]
    pub ability_id: Option<Option<EntityId>>,
}

impl Validate for HeroCreate {
    fn validate(&self) -> CrudResult<()> {
        super::require_name(&self.name)
    }
}

impl Validate for HeroUpdate {
    fn validate(&self) -> CrudResult<()> {
        match &self.name {
            Some(name) => super::require_name(name),
            None => Ok(()),
        }
    }
}

impl SoftDeletable for Hero {
    fn deletion(&self) -> &Deletion {
        &self.deletion
    }

    fn deletion_mut(&mut self) -> &mut Deletion {
        &mut self.deletion
    }
}

impl Entity for Hero {
    type Create = HeroCreate;
    type Update = HeroUpdate;

    const NAME: &'static str = "Hero";
    const TABLE: &'static str = "heroes";
    const FIELDS: &'static [&'static str] = &[
        "id",
        "name",
        "ability_id",
        "created_at",
        "updated_at",
        "deleted_at",
        "is_deleted",
    ];
    const SEARCH_FIELDS: &'static [&'static str] = &["name"];
    const REFERENCES: &'static [(&'static str, &'static str)] = &[("ability_id", "abilities")];

    fn record(&self) -> &Record {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    fn from_create(input: HeroCreate, record: Record) -> Self {
        Self {
            record,
            name: input.name,
            ability_id: input.ability_id,
            deletion: Deletion::default(),
        }
    }

    fn apply_update(&mut self, patch: HeroUpdate) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(ability_id) = patch.ability_id {
            self.ability_id = ability_id;
        }
    }

    fn is_soft_deletable() -> bool {
        true
    }

    fn as_soft_deletable(&self) -> Option<&dyn SoftDeletable> {
        Some(self)
    }

    fn as_soft_deletable_mut(&mut self) -> Option<&mut dyn SoftDeletable> {
        Some(self)
    }
}

/// Query-string filter for hero listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeroFilter {
    pub name: Option<String>,
    #[serde(rename = "name__like")]
    pub name_like: Option<String>,
    #[serde(rename = "name__ilike")]
    pub name_ilike: Option<String>,
    #[serde(rename = "name__neq")]
    pub name_neq: Option<String>,
    pub search: Option<String>,
    /// Comma-separated ordering keys, `name` when absent.
    pub order_by: Option<String>,
}

impl FilterSchema for HeroFilter {
    fn into_spec(self) -> CrudResult<Option<FilterSpec>> {
        let mut spec = FilterSpec::new();
        let predicates = [
            (self.name, Op::Eq),
            (self.name_like, Op::Like),
            (self.name_ilike, Op::ILike),
            (self.name_neq, Op::Neq),
        ];
        for (value, op) in predicates {
            if let Some(value) = value {
                spec = spec.with("name", op, value);
            }
        }
        spec.search = self.search.filter(|s| !s.is_empty());
        spec.order_by = parse_order_by(self.order_by.as_deref().unwrap_or("name"), Hero::FIELDS)?;
        Ok(Some(spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Direction, OrderKey};

    fn hero(name: &str, ability_id: Option<EntityId>) -> Hero {
        Hero::from_create(HeroCreate { name: name.into(), ability_id }, Record::new())
    }

    #[test]
    fn update_distinguishes_null_from_absent() {
        let ability = EntityId::new();

        let mut renamed = hero("Superman", Some(ability));
        renamed.apply_update(serde_json::from_str(r#"{"name": "Clark"}"#).unwrap());
        assert_eq!(renamed.name, "Clark");
        assert_eq!(renamed.ability_id, Some(ability));

        let mut detached = hero("Superman", Some(ability));
        detached.apply_update(serde_json::from_str(r#"{"ability_id": null}"#).unwrap());
        assert_eq!(detached.name, "Superman");
        assert_eq!(detached.ability_id, None);
    }

    #[test]
    fn filter_defaults_to_name_ordering() {
        let spec = HeroFilter::default().into_spec().unwrap().unwrap();
        assert!(spec.predicates.is_empty());
        assert_eq!(spec.order_by, vec![OrderKey { field: "name", direction: Direction::Asc }]);
    }

    #[test]
    fn filter_maps_operators() {
        let filter = HeroFilter {
            name_ilike: Some("sup%".into()),
            name_neq: Some("Batman".into()),
            search: Some("man".into()),
            order_by: Some("-created_at".into()),
            ..HeroFilter::default()
        };
        let spec = filter.into_spec().unwrap().unwrap();
        assert_eq!(spec.predicates.len(), 2);
        assert_eq!(spec.predicates[0].op, Op::ILike);
        assert_eq!(spec.predicates[1].op, Op::Neq);
        assert_eq!(spec.search.as_deref(), Some("man"));
        assert_eq!(spec.order_by[0].direction, Direction::Desc);
    }

    #[test]
    fn filter_rejects_unknown_order_field() {
        let filter = HeroFilter { order_by: Some("secret".into()), ..HeroFilter::default() };
        assert!(filter.into_spec().is_err());
    }
}
