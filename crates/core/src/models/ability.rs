use serde::{Deserialize, Serialize};

use crate::entity::{Deletion, Entity, Record, SoftDeletable, Validate};
use crate::error::CrudResult;

/// A power that heroes can reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ability {
    #[serde(flatten)]
    pub record: Record,
    pub name: String,
    pub strength: i32,
    #[serde(flatten)]
    pub deletion: Deletion,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbilityCreate {
    pub name: String,
    pub strength: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AbilityUpdate {
    pub name: Option<String>,
    pub strength: Option<i32>,
}

impl Validate for AbilityCreate {
    fn validate(&self) -> CrudResult<()> {
        super::require_name(&self.name)
    }
}

impl Validate for AbilityUpdate {
    fn validate(&self) -> CrudResult<()> {
        match &self.name {
            Some(name) => super::require_name(name),
            None => Ok(()),
        }
    }
}

impl SoftDeletable for Ability {
    fn deletion(&self) -> &Deletion {
        &self.deletion
    }

    fn deletion_mut(&mut self) -> &mut Deletion {
        &mut self.deletion
    }
}

impl Entity for Ability {
    type Create = AbilityCreate;
    type Update = AbilityUpdate;

    const NAME: &'static str = "Ability";
    const TABLE: &'static str = "abilities";
    const FIELDS: &'static [&'static str] = &[
        "id",
        "name",
        "strength",
        "created_at",
        "updated_at",
        "deleted_at",
        "is_deleted",
    ];
    const SEARCH_FIELDS: &'static [&'static str] = &["name"];

    fn record(&self) -> &Record {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    fn from_create(input: AbilityCreate, record: Record) -> Self {
        Self {
            record,
            name: input.name,
            strength: input.strength,
            deletion: Deletion::default(),
        }
    }

    fn apply_update(&mut self, patch: AbilityUpdate) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(strength) = patch.strength {
            self.strength = strength;
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
