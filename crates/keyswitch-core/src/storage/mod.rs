//! Storage backends for the key registry
//!
//! Two backends share the [`RegistryStorage`] trait:
//! 1. Owner-only JSON file written atomically (default)
//! 2. In-memory store with deep-copy semantics (tests)

mod file;
mod memory;
mod traits;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use traits::RegistryStorage;

use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::error::Result;

/// Mode for registry files, snapshots, and logs
pub const PRIVATE_FILE_MODE: u32 = 0o600;

/// Mode for the directories that hold them
pub const PRIVATE_DIR_MODE: u32 = 0o700;

/// Create `dir` if missing and restrict it to the owner
pub async fn ensure_private_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    tokio::fs::create_dir_all(dir).await?;
    set_mode(dir, PRIVATE_DIR_MODE).await
}

/// Restrict an existing file to owner read/write
pub async fn restrict_to_owner(path: &Path) -> Result<()> {
    set_mode(path, PRIVATE_FILE_MODE).await
}

/// Write `data` to an owner-only file. The mode is set at creation and
/// re-asserted for files that already existed.
pub async fn write_private(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = open_private(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    drop(file);
    restrict_to_owner(path).await
}

#[cfg(unix)]
async fn open_private(path: &Path) -> Result<tokio::fs::File> {
    Ok(tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(PRIVATE_FILE_MODE)
        .open(path)
        .await?)
}

#[cfg(not(unix))]
async fn open_private(path: &Path) -> Result<tokio::fs::File> {
    Ok(tokio::fs::File::create(path).await?)
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
