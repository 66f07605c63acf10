//! Domain building blocks for the heroes service.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! identifiers, the entity/soft-delete traits, the concrete entities and
//! the filter/pagination vocabulary shared by the repository and the HTTP layer.

pub mod entity;
pub mod error;
pub mod filter;
pub mod id;
pub mod models;
pub mod page;

pub use entity::{Deletion, Entity, Record, SoftDeletable, Validate, next_timestamp, now};
pub use error::{CrudError, CrudResult};
pub use filter::{Direction, FilterSchema, FilterSpec, NoFilter, Op, OrderKey, Predicate};
pub use id::{EntityId, JobId};
pub use models::{Ability, AbilityCreate, AbilityUpdate, Hero, HeroCreate, HeroFilter, HeroUpdate};
pub use page::{Page, PageParams, PageWindow};
