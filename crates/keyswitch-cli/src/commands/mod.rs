//! Command implementations
//!
//! Each command writes user-facing output to the supplied writer and leaves
//! diagnostics to `tracing`.

pub mod check;
pub mod keys;
pub mod remote;
pub mod transfer;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use keyswitch_core::{FileStorage, KeyRecord, RegistryManager};

/// Load the registry stored at `config_path`
pub async fn open_registry(config_path: &Path) -> Result<RegistryManager> {
    let manager = RegistryManager::new(Arc::new(FileStorage::new(config_path)));
    manager
        .load()
        .await
        .with_context(|| format!("failed to load registry from {}", config_path.display()))?;
    Ok(manager)
}

/// Look a key up by id, then by name
pub async fn resolve_key(manager: &RegistryManager, target: &str) -> Result<KeyRecord> {
    match manager.get_key(target).await {
        Ok(key) => Ok(key),
        Err(e) if e.is_not_found() => manager
            .get_key_by_name(target)
            .await
            .with_context(|| format!("no key with id or name {}", target)),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use keyswitch_core::{MemoryStorage, RegistryManager};
    use std::sync::Arc;

    pub async fn manager() -> RegistryManager {
        let manager = RegistryManager::new(Arc::new(MemoryStorage::new()));
        manager.load().await.unwrap();
        manager
    }

    pub fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }
}
