//! File storage backend
//!
//! Stores the registry as one pretty-printed JSON document. Writes go to a
//! sibling temp file that is restricted to the owner and then renamed over the
//! destination, so readers never observe a partial file.

use async_trait::async_trait;
use directories::BaseDirs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ensure_private_dir, restrict_to_owner, write_private, RegistryStorage};
use crate::error::{RegistryError, Result};
use crate::registry::Registry;

/// Directory under the home directory that holds the default registry
const DEFAULT_DIR_NAME: &str = ".codex-manager";
const DEFAULT_FILE_NAME: &str = "config.json";

/// Owner-only JSON file storage
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Create storage backed by the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the default registry path
    pub fn default_path() -> Result<PathBuf> {
        BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(DEFAULT_DIR_NAME).join(DEFAULT_FILE_NAME))
            .ok_or_else(|| RegistryError::Storage("Could not determine home directory".to_string()))
    }

    /// Get the registry file path
    pub fn file_path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    async fn ensure_parent(&self) -> Result<()> {
        match self.path.parent() {
            Some(dir) => ensure_private_dir(dir).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RegistryStorage for FileStorage {
    async fn load(&self) -> Result<Registry> {
        self.ensure_parent().await?;

        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No registry at {:?}, creating an empty one", self.path);
                let registry = Registry::empty();
                self.save(&registry).await?;
                return Ok(registry);
            }
            Err(e) => return Err(e.into()),
        };

        if data.is_empty() {
            return Ok(Registry::empty());
        }

        let registry: Registry = serde_json::from_slice(&data)?;
        debug!("Loaded {} keys from {:?}", registry.keys.len(), self.path);
        Ok(registry)
    }

    async fn save(&self, registry: &Registry) -> Result<()> {
        self.ensure_parent().await?;

        let contents = serde_json::to_vec_pretty(registry)?;
        let temp_path = self.temp_path();

        write_private(&temp_path, &contents).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        restrict_to_owner(&self.path).await?;

        debug!("Saved {} keys to {:?}", registry.keys.len(), self.path);
        Ok(())
    }

    fn path(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    fn backend_name(&self) -> &'static str {
        "File Storage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::KeyRecord;
    use tempfile::TempDir;

    fn test_storage(temp_dir: &TempDir) -> FileStorage {
        FileStorage::new(temp_dir.path().join("nested").join("config.json"))
    }

    #[tokio::test]
    async fn test_load_missing_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = test_storage(&temp_dir);

        let registry = storage.load().await.unwrap();
        assert!(registry.keys.is_empty());
        assert_eq!(registry.schema_version, crate::registry::DEFAULT_SCHEMA_VERSION);
        assert!(storage.file_path().exists());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let storage = test_storage(&temp_dir);

        let mut registry = Registry::empty();
        registry.keys.push(KeyRecord {
            id: "1".to_string(),
            ..KeyRecord::new("main", "sk-live")
        });
        registry.active_id = "1".to_string();
        storage.save(&registry).await.unwrap();

        let loaded = storage.load().await.unwrap();
        assert_eq!(loaded, registry);
        assert!(!storage.temp_path().exists());
    }

    #[tokio::test]
    async fn test_empty_file_is_empty_registry() {
        let temp_dir = TempDir::new().unwrap();
        let storage = test_storage(&temp_dir);
        std::fs::create_dir_all(storage.file_path().parent().unwrap()).unwrap();
        std::fs::write(storage.file_path(), b"").unwrap();

        let registry = storage.load().await.unwrap();
        assert!(registry.keys.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_file_is_decode_error() {
        let temp_dir = TempDir::new().unwrap();
        let storage = test_storage(&temp_dir);
        std::fs::create_dir_all(storage.file_path().parent().unwrap()).unwrap();
        std::fs::write(storage.file_path(), b"{not json").unwrap();

        let result = storage.load().await;
        assert!(matches!(result, Err(RegistryError::Decode(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let storage = test_storage(&temp_dir);
        storage.save(&Registry::empty()).await.unwrap();

        let file_mode = std::fs::metadata(storage.file_path()).unwrap().permissions().mode();
        let dir_mode = std::fs::metadata(storage.file_path().parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);
        assert_eq!(dir_mode & 0o777, 0o700);
    }
}
