//! Background jobs for the heroes service and the registry the worker
//! runtime dispatches through.

pub mod handlers;

pub use handlers::{PRINT_HERO, PrintHero, register};
