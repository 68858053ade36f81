//! In-memory storage backend for tests
//!
//! Every save round-trips through JSON so the stored copy never shares state
//! with the caller's working copy.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::RegistryStorage;
use crate::error::Result;
use crate::registry::{Registry, DEFAULT_SCHEMA_VERSION};

/// In-memory registry storage
#[derive(Debug)]
pub struct MemoryStorage {
    stored: RwLock<Registry>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::with_registry(Registry {
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            ..Default::default()
        })
    }

    /// Create a store pre-seeded with `registry`
    pub fn with_registry(registry: Registry) -> Self {
        Self {
            stored: RwLock::new(registry),
        }
    }

    /// Peek at the stored copy
    pub async fn stored(&self) -> Registry {
        self.stored.read().await.clone()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryStorage for MemoryStorage {
    async fn load(&self) -> Result<Registry> {
        Ok(self.stored.read().await.clone())
    }

    async fn save(&self, registry: &Registry) -> Result<()> {
        let encoded = serde_json::to_vec(registry)?;
        let copy: Registry = serde_json::from_slice(&encoded)?;
        *self.stored.write().await = copy;
        Ok(())
    }

    fn path(&self) -> String {
        "memory://config".to_string()
    }

    fn backend_name(&self) -> &'static str {
        "Memory Storage"
    }
}
