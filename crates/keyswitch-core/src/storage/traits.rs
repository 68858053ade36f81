//! Storage trait definitions

use crate::error::Result;
use crate::registry::Registry;
use async_trait::async_trait;

/// Trait for registry persistence backends
#[async_trait]
pub trait RegistryStorage: Send + Sync {
    /// Read the whole registry. A store that does not exist yet yields an empty one.
    async fn load(&self) -> Result<Registry>;

    /// Replace the stored registry wholesale
    async fn save(&self, registry: &Registry) -> Result<()>;

    /// Location of the stored registry, used to derive sibling paths
    fn path(&self) -> String;

    /// Get a human-readable name for this storage backend
    fn backend_name(&self) -> &'static str;
}
