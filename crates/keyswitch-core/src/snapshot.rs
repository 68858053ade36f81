//! Versioned snapshots of the registry for off-box sync
//!
//! A snapshot is the exportable subset of a registry: its keys, the active
//! pointer, and the time it was taken. Remote settings never leave the machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;
use crate::registry::{KeyRecord, Registry};
use crate::storage::{ensure_private_dir, write_private};

/// Schema version stamped on every snapshot
pub const SNAPSHOT_SCHEMA_VERSION: &str = "1.0";

const SNAPSHOT_DIR_NAME: &str = "snapshots";

/// Point-in-time copy of a registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// Unix epoch when the document does not say
    #[serde(default)]
    pub generated_at: DateTime<Utc>,

    #[serde(rename = "active_key_id", default)]
    pub active_id: String,

    #[serde(default)]
    pub keys: Vec<KeyRecord>,
}

fn default_schema_version() -> String {
    SNAPSHOT_SCHEMA_VERSION.to_string()
}

impl Snapshot {
    /// Take a snapshot of `registry` as of now
    pub fn build(registry: &Registry) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            active_id: registry.active_id.clone(),
            keys: registry.keys.clone(),
        }
    }

    /// Encode as indented JSON
    pub fn marshal(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decode JSON produced by [`Snapshot::marshal`]. Empty input is a decode error.
    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        let mut snapshot: Snapshot = serde_json::from_slice(data)?;
        if snapshot.schema_version.trim().is_empty() {
            snapshot.schema_version = default_schema_version();
        }
        Ok(snapshot)
    }

    /// Write to `path`, owner-only, creating the parent directory
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            ensure_private_dir(dir).await?;
        }
        write_private(path, &self.marshal()?).await?;
        debug!("Wrote snapshot with {} keys to {:?}", self.keys.len(), path);
        Ok(())
    }

    /// Read a snapshot written by [`Snapshot::save_to_file`]
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path).await?;
        Self::unmarshal(&data)
    }
}

/// Local copy location for a profile: `<registry dir>/snapshots/<profile>.json`
pub fn snapshot_path(config_path: &Path, profile: &str) -> PathBuf {
    let dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    dir.join(SNAPSHOT_DIR_NAME).join(format!("{}.json", profile))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use tempfile::TempDir;

    fn sample_registry() -> Registry {
        let mut registry = Registry::empty();
        registry.keys.push(KeyRecord {
            id: "1".to_string(),
            active: true,
            tags: vec!["prod".to_string()],
            ..KeyRecord::new("main", "sk-1")
        });
        registry.keys.push(KeyRecord {
            id: "2".to_string(),
            quota_limit: 20.0,
            ..KeyRecord::new("backup", "sk-2")
        });
        registry.active_id = "1".to_string();
        registry
    }

    #[test]
    fn test_build_copies_keys_and_active() {
        let registry = sample_registry();
        let snapshot = Snapshot::build(&registry);

        assert_eq!(snapshot.schema_version, SNAPSHOT_SCHEMA_VERSION);
        assert_eq!(snapshot.active_id, "1");
        assert_eq!(snapshot.keys, registry.keys);
    }

    #[test]
    fn test_marshal_round_trip() {
        let snapshot = Snapshot::build(&sample_registry());
        let data = snapshot.marshal().unwrap();
        assert!(String::from_utf8_lossy(&data).contains("\n  \"schema_version\""));

        assert_eq!(Snapshot::unmarshal(&data).unwrap(), snapshot);
    }

    #[test]
    fn test_unmarshal_defaults_missing_schema_version() {
        let json = br#"{"generated_at":"2024-05-01T10:00:00Z","active_key_id":"3","keys":[]}"#;
        let snapshot = Snapshot::unmarshal(json).unwrap();
        assert_eq!(snapshot.schema_version, SNAPSHOT_SCHEMA_VERSION);
        assert_eq!(snapshot.active_id, "3");
    }

    #[test]
    fn test_unmarshal_tolerates_missing_timestamp() {
        let json = br#"{"active_key_id":"1","keys":[{"id":"1","name":"main","api_key":"sk"}]}"#;
        let snapshot = Snapshot::unmarshal(json).unwrap();
        assert_eq!(snapshot.generated_at.timestamp(), 0);
        assert_eq!(snapshot.keys[0].name, "main");
    }

    #[test]
    fn test_unmarshal_rejects_empty_and_malformed() {
        assert!(matches!(Snapshot::unmarshal(b""), Err(RegistryError::Decode(_))));
        assert!(matches!(Snapshot::unmarshal(b"[1,2"), Err(RegistryError::Decode(_))));
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        let path = snapshot_path(&config_path, "laptop");
        assert_eq!(path, temp_dir.path().join("snapshots").join("laptop.json"));

        let snapshot = Snapshot::build(&sample_registry());
        snapshot.save_to_file(&path).await.unwrap();
        assert_eq!(Snapshot::load_from_file(&path).await.unwrap(), snapshot);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_load_missing_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = Snapshot::load_from_file(&temp_dir.path().join("absent.json")).await;
        assert!(matches!(result, Err(RegistryError::Io(_))));
    }
}
