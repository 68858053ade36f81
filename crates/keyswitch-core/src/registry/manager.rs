//! Registry manager for key CRUD and activation
//!
//! The manager buffers one in-memory copy of the registry behind a single
//! reader/writer lock. Mutations never auto-flush: callers persist with
//! [`RegistryManager::save`].

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::normalize::{check_unique, ensure_next_id, id_after, normalize, parse_id};
use super::patch::KeyPatch;
use super::types::{names_match, KeyKind, KeyRecord, Registry};
use crate::error::{RegistryError, Result};
use crate::storage::RegistryStorage;

/// Ordering for [`RegistryManager::list_keys`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    /// Active key first, then oldest first
    #[default]
    ActiveFirst,
    /// Case-insensitive by name
    Name,
}

impl SortMode {
    /// "name" selects [`SortMode::Name`]; anything else is the default order
    pub fn parse(input: &str) -> Self {
        if input.trim().eq_ignore_ascii_case("name") {
            Self::Name
        } else {
            Self::ActiveFirst
        }
    }
}

/// Registry manager
pub struct RegistryManager {
    /// Storage backend
    storage: Arc<dyn RegistryStorage>,
    /// Loaded registry; `None` until [`RegistryManager::load`] succeeds
    state: RwLock<Option<Registry>>,
}

impl RegistryManager {
    /// Create a new registry manager
    pub fn new(storage: Arc<dyn RegistryStorage>) -> Self {
        Self {
            storage,
            state: RwLock::new(None),
        }
    }

    /// Load and normalize the registry. Later calls return the cached copy.
    pub async fn load(&self) -> Result<Registry> {
        let mut state = self.state.write().await;
        if let Some(registry) = state.as_ref() {
            return Ok(registry.clone());
        }

        let mut registry = self.storage.load().await?;
        if normalize(&mut registry)? {
            registry.last_updated_at = Some(Utc::now());
            self.storage.save(&registry).await?;
            debug!("Persisted normalized registry to {}", self.storage.path());
        }

        debug!(
            "Loaded {} keys from {}",
            registry.keys.len(),
            self.storage.backend_name()
        );
        *state = Some(registry.clone());
        Ok(registry)
    }

    /// Persist the current registry
    pub async fn save(&self) -> Result<()> {
        let mut state = self.state.write().await;
        let registry = loaded_mut(&mut state)?;
        registry.last_updated_at = Some(Utc::now());
        self.storage.save(registry).await
    }

    /// Copy of the current registry
    pub async fn config(&self) -> Result<Registry> {
        let state = self.state.read().await;
        loaded(&state).cloned()
    }

    /// Location of the backing store
    pub fn config_path(&self) -> String {
        self.storage.path()
    }

    /// Replace the whole registry (import, restore, sync pull)
    ///
    /// Active flags are re-derived: a single flagged key wins, none flagged
    /// activates the first key, and with several flagged the last one wins.
    /// Repeated ids or names are rejected and leave the current registry alone.
    pub async fn replace_config(&self, mut registry: Registry) -> Result<()> {
        if let Some(remote) = &registry.remote {
            remote.validate()?;
        }

        let mut state = self.state.write().await;
        let changed = normalize(&mut registry)?;
        check_unique(&registry)?;

        let mut active_id = registry.active_id.clone();
        let mut active_count = 0;
        for key in registry.keys.iter().filter(|k| k.active) {
            active_count += 1;
            active_id = key.id.clone();
        }
        if active_count == 0 {
            if let Some(first) = registry.keys.first() {
                active_id = first.id.clone();
            }
        }
        registry.active_id = active_id;
        for key in &mut registry.keys {
            key.active = key.id == registry.active_id;
        }

        registry.last_updated_at = Some(Utc::now());
        if changed {
            self.storage.save(&registry).await?;
        }

        info!("Replaced registry with {} keys", registry.keys.len());
        *state = Some(registry);
        Ok(())
    }

    /// Add a new key, assigning an id and defaults where unset
    pub async fn add_key(&self, mut draft: KeyRecord) -> Result<KeyRecord> {
        let mut state = self.state.write().await;
        let registry = loaded_mut(&mut state)?;

        if draft.name.trim().is_empty() {
            return Err(RegistryError::Validation("key name must not be empty".to_string()));
        }
        if draft.secret.trim().is_empty() {
            return Err(RegistryError::Validation("API key must not be empty".to_string()));
        }
        if draft.kind.as_str().trim().is_empty() {
            draft.kind = KeyKind::default();
        }
        if registry.position_by_name(&draft.name).is_some() {
            return Err(RegistryError::Conflict(format!("name {} already exists", draft.name)));
        }

        let next_id = if draft.id.is_empty() {
            ensure_next_id(registry)?;
            let after = id_after(registry.next_id)?;
            draft.id = registry.next_id.to_string();
            after
        } else if registry.position(&draft.id).is_some() {
            return Err(RegistryError::Conflict(format!("id {} already exists", draft.id)));
        } else {
            match parse_id(&draft.id) {
                Some(n) => registry.next_id.max(id_after(n)?),
                None => registry.next_id,
            }
        };

        draft.apply_capability_defaults();
        let now = Utc::now();
        draft.created_at.get_or_insert(now);
        draft.last_checked_at.get_or_insert(now);
        draft.last_used_at.get_or_insert(now);

        // Committed from here on
        registry.next_id = next_id;

        let activate = draft.active || registry.active_id.is_empty();
        let id = draft.id.clone();
        let index = registry.keys.len();
        draft.active = false;
        registry.keys.push(draft);
        if activate {
            set_active_locked(registry, &id)?;
        }

        info!("Added key {} ({})", id, registry.keys[index].name);
        Ok(registry.keys[index].clone())
    }

    /// Apply a patch to an existing key
    pub async fn update_key(&self, patch: KeyPatch) -> Result<KeyRecord> {
        let mut state = self.state.write().await;
        let registry = loaded_mut(&mut state)?;

        let index = registry
            .position(&patch.id)
            .ok_or_else(|| RegistryError::NotFound(format!("key id {}", patch.id)))?;

        let activate = patch.active;
        let mut merged = patch.apply_to(&registry.keys[index]);
        merged.apply_capability_defaults();

        if merged.name.trim().is_empty() {
            return Err(RegistryError::Validation("key name must not be empty".to_string()));
        }
        let clash = registry
            .keys
            .iter()
            .enumerate()
            .any(|(i, k)| i != index && names_match(&k.name, &merged.name));
        if clash {
            return Err(RegistryError::Conflict(format!("name {} already exists", merged.name)));
        }

        let id = merged.id.clone();
        registry.keys[index] = merged;
        if activate {
            set_active_locked(registry, &id)?;
        }

        info!("Updated key {}", id);
        Ok(registry.keys[index].clone())
    }

    /// Remove a key; if it was active the first remaining key takes over
    pub async fn remove_key(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let registry = loaded_mut(&mut state)?;

        let index = registry
            .position(id)
            .ok_or_else(|| RegistryError::NotFound(format!("key id {}", id)))?;
        registry.keys.remove(index);

        if registry.active_id == id {
            registry.active_id.clear();
            if let Some(first) = registry.keys.first().map(|k| k.id.clone()) {
                set_active_locked(registry, &first)?;
            }
        }

        info!("Removed key {}", id);
        Ok(())
    }

    /// Make `id` the single active key
    pub async fn set_active_key(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let registry = loaded_mut(&mut state)?;
        set_active_locked(registry, id)?;
        info!("Activated key {}", id);
        Ok(())
    }

    /// Get a key by id
    pub async fn get_key(&self, id: &str) -> Result<KeyRecord> {
        let state = self.state.read().await;
        find_key(loaded(&state)?, id)
    }

    /// Get a key by case-insensitive name
    pub async fn get_key_by_name(&self, name: &str) -> Result<KeyRecord> {
        let state = self.state.read().await;
        let registry = loaded(&state)?;
        registry
            .position_by_name(name)
            .map(|i| registry.keys[i].clone())
            .ok_or_else(|| RegistryError::NotFound(format!("key name {}", name)))
    }

    /// The currently active key
    pub async fn active_key(&self) -> Result<KeyRecord> {
        let state = self.state.read().await;
        let registry = loaded(&state)?;
        if registry.active_id.is_empty() {
            return Err(RegistryError::NotFound("no active key".to_string()));
        }
        find_key(registry, &registry.active_id)
    }

    /// Sorted copy of every key
    pub async fn list_keys(&self, sort: SortMode) -> Result<Vec<KeyRecord>> {
        let state = self.state.read().await;
        let mut keys = loaded(&state)?.keys.clone();

        match sort {
            SortMode::Name => keys.sort_by_key(|k| k.name.to_lowercase()),
            SortMode::ActiveFirst => {
                keys.sort_by(|a, b| b.active.cmp(&a.active).then(a.created_at.cmp(&b.created_at)))
            }
        }
        Ok(keys)
    }

    /// Store a usage reading taken at `checked_at`; it also anchors the quota period
    pub async fn record_usage(&self, id: &str, used: f64, checked_at: DateTime<Utc>) -> Result<KeyRecord> {
        if !used.is_finite() || used < 0.0 {
            return Err(RegistryError::Validation(format!("usage {} is not a non-negative amount", used)));
        }

        let mut state = self.state.write().await;
        let registry = loaded_mut(&mut state)?;
        let index = registry
            .position(id)
            .ok_or_else(|| RegistryError::NotFound(format!("key id {}", id)))?;

        let key = &mut registry.keys[index];
        key.quota_used = used;
        key.last_checked_at = Some(checked_at);
        debug!("Recorded usage {:.2} for key {}", used, id);
        Ok(key.clone())
    }

    /// Record that a key was just used
    pub async fn touch_key(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let registry = loaded_mut(&mut state)?;
        let index = registry
            .position(id)
            .ok_or_else(|| RegistryError::NotFound(format!("key id {}", id)))?;
        registry.keys[index].last_used_at = Some(Utc::now());
        debug!("Touched key {}", id);
        Ok(())
    }
}

fn loaded(state: &Option<Registry>) -> Result<&Registry> {
    state.as_ref().ok_or(RegistryError::NotLoaded)
}

fn loaded_mut(state: &mut Option<Registry>) -> Result<&mut Registry> {
    state.as_mut().ok_or(RegistryError::NotLoaded)
}

fn find_key(registry: &Registry, id: &str) -> Result<KeyRecord> {
    registry
        .find(id)
        .cloned()
        .ok_or_else(|| RegistryError::NotFound(format!("key id {}", id)))
}

/// Exactly one key ends up active. Unknown ids leave everything unchanged.
fn set_active_locked(registry: &mut Registry, id: &str) -> Result<()> {
    if registry.position(id).is_none() {
        return Err(RegistryError::NotFound(format!("key id {}", id)));
    }
    for key in &mut registry.keys {
        key.active = key.id == id;
    }
    registry.active_id = id.to_string();
    Ok(())
}
