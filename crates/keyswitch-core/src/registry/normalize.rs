//! Normalization passes applied whenever a registry enters the manager

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::types::{Registry, RemoteSyncSettings, DEFAULT_SCHEMA_VERSION};
use crate::error::{RegistryError, Result};

/// Run every pass. Returns true if any of them changed persisted data.
pub(crate) fn normalize(registry: &mut Registry) -> Result<bool> {
    let mut changed = fill_schema_defaults(registry);
    changed |= renumber_foreign_ids(registry);
    changed |= ensure_remote_settings(registry);
    ensure_next_id(registry)?;

    for key in &mut registry.keys {
        key.apply_capability_defaults();
    }
    Ok(changed)
}

/// Ids and case-insensitive names must each be unique
pub(crate) fn check_unique(registry: &Registry) -> Result<()> {
    let mut ids = HashSet::with_capacity(registry.keys.len());
    let mut names = HashSet::with_capacity(registry.keys.len());
    for key in &registry.keys {
        if !ids.insert(key.id.as_str()) {
            return Err(RegistryError::Conflict(format!("id {} appears more than once", key.id)));
        }
        if !names.insert(key.name.to_lowercase()) {
            return Err(RegistryError::Conflict(format!("name {} appears more than once", key.name)));
        }
    }
    Ok(())
}

fn fill_schema_defaults(registry: &mut Registry) -> bool {
    if registry.schema_version.trim().is_empty() {
        registry.schema_version = DEFAULT_SCHEMA_VERSION.to_string();
        return true;
    }
    false
}

/// If any id is not a base-10 integer, every id becomes its 1-based position
/// and the active pointer is remapped through the old-to-new mapping.
fn renumber_foreign_ids(registry: &mut Registry) -> bool {
    if registry.keys.iter().all(|k| parse_id(&k.id).is_some()) {
        return false;
    }

    let mut mapping = HashMap::with_capacity(registry.keys.len());
    for (index, key) in registry.keys.iter_mut().enumerate() {
        let new_id = (index + 1).to_string();
        mapping.insert(std::mem::replace(&mut key.id, new_id.clone()), new_id);
    }
    if let Some(new_active) = mapping.get(&registry.active_id) {
        registry.active_id = new_active.clone();
    }

    debug!("Renumbered {} key ids", registry.keys.len());
    true
}

fn ensure_remote_settings(registry: &mut Registry) -> bool {
    let mut changed = false;
    let remote = registry.remote.get_or_insert_with(|| {
        changed = true;
        RemoteSyncSettings::default()
    });
    if remote.sync_token.is_empty() {
        remote.sync_token = generate_sync_token();
        changed = true;
    }
    changed
}

/// Raise the counter above every numeric id; it never moves down.
pub(crate) fn ensure_next_id(registry: &mut Registry) -> Result<()> {
    let max_id = registry.keys.iter().filter_map(|k| parse_id(&k.id)).max().unwrap_or(0);
    if registry.next_id <= max_id {
        registry.next_id = id_after(max_id)?;
    }
    Ok(())
}

/// The counter value that follows `id`
pub(crate) fn id_after(id: u64) -> Result<u64> {
    id.checked_add(1)
        .ok_or_else(|| RegistryError::Validation(format!("key id {} leaves no room for new ids", id)))
}

pub(crate) fn parse_id(id: &str) -> Option<u64> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    id.parse().ok()
}

/// 32 random bytes, base64url without padding
pub(crate) fn generate_sync_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::KeyRecord;

    fn keyed(ids: &[&str]) -> Registry {
        Registry {
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            keys: ids
                .iter()
                .map(|id| KeyRecord {
                    id: id.to_string(),
                    name: format!("key-{}", id),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_foreign_ids_renumbered_in_order() {
        let mut registry = keyed(&["x", "y"]);
        registry.active_id = "y".to_string();

        assert!(renumber_foreign_ids(&mut registry));
        let ids: Vec<&str> = registry.keys.iter().map(|k| k.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(registry.keys[1].name, "key-y");
        assert_eq!(registry.active_id, "2");
    }

    #[test]
    fn test_numeric_ids_untouched() {
        let mut registry = keyed(&["4", "9"]);
        assert!(!renumber_foreign_ids(&mut registry));
        ensure_next_id(&mut registry).unwrap();
        assert_eq!(registry.next_id, 10);
    }

    #[test]
    fn test_next_id_never_decreases() {
        let mut registry = keyed(&["2"]);
        registry.next_id = 40;
        ensure_next_id(&mut registry).unwrap();
        assert_eq!(registry.next_id, 40);
    }

    #[test]
    fn test_max_id_cannot_be_exceeded() {
        let mut registry = keyed(&[u64::MAX.to_string().as_str()]);
        let err = normalize(&mut registry).unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));

        let mut registry = keyed(&[(u64::MAX - 1).to_string().as_str()]);
        normalize(&mut registry).unwrap();
        assert_eq!(registry.next_id, u64::MAX);
    }

    #[test]
    fn test_check_unique() {
        assert!(check_unique(&keyed(&["1", "2"])).is_ok());

        let mut registry = keyed(&["1", "1"]);
        registry.keys[1].name = "other".to_string();
        assert!(matches!(check_unique(&registry), Err(RegistryError::Conflict(_))));

        let mut registry = keyed(&["1", "2"]);
        registry.keys[0].name = "Work".to_string();
        registry.keys[1].name = "work".to_string();
        assert!(matches!(check_unique(&registry), Err(RegistryError::Conflict(_))));
    }

    #[test]
    fn test_remote_settings_created_once() {
        let mut registry = keyed(&[]);
        assert!(ensure_remote_settings(&mut registry));
        let token = registry.remote.as_ref().unwrap().sync_token.clone();
        assert_eq!(URL_SAFE_NO_PAD.decode(&token).unwrap().len(), 32);

        assert!(!ensure_remote_settings(&mut registry));
        assert_eq!(registry.remote.unwrap().sync_token, token);
    }

    #[test]
    fn test_normalize_reports_schema_default() {
        let mut registry = Registry::default();
        assert!(normalize(&mut registry).unwrap());
        assert_eq!(registry.schema_version, DEFAULT_SCHEMA_VERSION);
        assert_eq!(registry.next_id, 1);
    }

    #[test]
    fn test_parse_id_rejects_signs_and_blanks() {
        assert_eq!(parse_id("12"), Some(12));
        assert_eq!(parse_id(""), None);
        assert_eq!(parse_id("+3"), None);
        assert_eq!(parse_id("-3"), None);
        assert_eq!(parse_id("a1"), None);
    }
}
