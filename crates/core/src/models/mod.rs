//! Concrete entities: abilities and the heroes that wield them.

mod ability;
mod hero;

pub use ability::{Ability, AbilityCreate, AbilityUpdate};
pub use hero::{Hero, HeroCreate, HeroFilter, HeroUpdate};

use serde::{Deserialize, Deserializer};

use crate::error::{CrudError, CrudResult};

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn require_name(name: &str) -> CrudResult<()> {
    if name.trim().is_empty() {
        return Err(CrudError::validation("name must not be blank"));
    }
    Ok(())
}
