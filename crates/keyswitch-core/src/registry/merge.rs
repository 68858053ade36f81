//! Import merge of two registries

use std::collections::HashMap;

use super::types::Registry;

/// Merge `incoming` into a copy of `base`.
///
/// Each incoming key replaces the base key with the same id, else the one with
/// the same name (case-insensitive), else it is appended. A non-empty incoming
/// active id and schema version win. Feed the result to
/// [`RegistryManager::replace_config`](super::RegistryManager::replace_config)
/// so the active invariant is re-derived.
pub fn merge_registries(base: &Registry, incoming: &Registry) -> Registry {
    let mut result = base.clone();

    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();
    for (index, key) in result.keys.iter().enumerate() {
        by_id.insert(key.id.clone(), index);
        by_name.insert(key.name.to_lowercase(), index);
    }

    for key in &incoming.keys {
        let by_id_slot = if key.id.is_empty() { None } else { by_id.get(&key.id).copied() };
        let slot = by_id_slot.or_else(|| {
            if key.name.is_empty() {
                None
            } else {
                by_name.get(&key.name.to_lowercase()).copied()
            }
        });

        match slot {
            Some(index) => result.keys[index] = key.clone(),
            None => {
                let index = result.keys.len();
                by_id.insert(key.id.clone(), index);
                by_name.insert(key.name.to_lowercase(), index);
                result.keys.push(key.clone());
            }
        }
    }

    if !incoming.active_id.is_empty() {
        result.active_id = incoming.active_id.clone();
    }
    if !incoming.schema_version.is_empty() {
        result.schema_version = incoming.schema_version.clone();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::KeyRecord;

    fn key(id: &str, name: &str) -> KeyRecord {
        KeyRecord {
            id: id.to_string(),
            name: name.to_string(),
            secret: "sk".to_string(),
            ..Default::default()
        }
    }

    fn registry(keys: Vec<KeyRecord>) -> Registry {
        Registry {
            keys,
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_by_id_replaces() {
        let base = registry(vec![key("1", "A")]);
        let incoming = registry(vec![key("1", "A-renamed")]);

        let merged = merge_registries(&base, &incoming);
        assert_eq!(merged.keys.len(), 1);
        assert_eq!(merged.keys[0].id, "1");
        assert_eq!(merged.keys[0].name, "A-renamed");
    }

    #[test]
    fn test_merge_by_name_is_case_insensitive() {
        let base = registry(vec![key("1", "Work")]);
        let incoming = registry(vec![key("", "WORK")]);

        let merged = merge_registries(&base, &incoming);
        assert_eq!(merged.keys.len(), 1);
        assert_eq!(merged.keys[0].name, "WORK");
    }

    #[test]
    fn test_merge_appends_new_and_takes_active() {
        let mut base = registry(vec![key("1", "A")]);
        base.active_id = "1".to_string();
        let mut incoming = registry(vec![key("5", "B")]);
        incoming.active_id = "5".to_string();

        let merged = merge_registries(&base, &incoming);
        assert_eq!(merged.keys.len(), 2);
        assert_eq!(merged.keys[1].id, "5");
        assert_eq!(merged.active_id, "5");
    }

    #[test]
    fn test_merge_keeps_base_active_when_incoming_has_none() {
        let mut base = registry(vec![key("1", "A")]);
        base.active_id = "1".to_string();
        let merged = merge_registries(&base, &registry(vec![key("2", "B")]));
        assert_eq!(merged.active_id, "1");
    }
}
