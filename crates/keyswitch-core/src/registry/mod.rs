//! Key registry: data model, manager, and import merge

mod manager;
mod merge;
mod normalize;
mod patch;
mod types;

pub use manager::{RegistryManager, SortMode};
pub use merge::merge_registries;
pub use patch::{FieldUpdate, KeyPatch};
pub use types::*;
