//! File log sink for a single command run
//!
//! The sink installs a scoped subscriber: it is active on the current thread
//! between [`LogSink::init`] and [`LogSink::close`] and nowhere else.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;

/// Append-only log file shared by every event the subscriber writes
#[derive(Clone)]
struct SharedFile(Arc<Mutex<File>>);

impl Write for SharedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.flush()
    }
}

impl SharedFile {
    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, File>> {
        self.0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))
    }
}

/// Owns the log file and the subscriber guard
pub struct LogSink {
    path: PathBuf,
    file: SharedFile,
    guard: Option<DefaultGuard>,
}

impl LogSink {
    /// Open `path` for appending (owner-only) and route tracing events to it.
    ///
    /// `RUST_LOG` takes precedence over `level` when set.
    pub fn init(path: &Path, level: &str) -> Result<Self> {
        // Only directories created here are restricted
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty() && !d.exists()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            restrict(dir, 0o700)?;
        }

        let file = open_append(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        let shared = SharedFile(Arc::new(Mutex::new(file)));

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let writer = shared.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_target(false)
            .with_writer(move || writer.clone())
            .finish();

        Ok(Self {
            path: path.to_path_buf(),
            file: shared,
            guard: Some(tracing::subscriber::set_default(subscriber)),
        })
    }

    /// Uninstall the subscriber and flush the file
    pub fn close(mut self) -> Result<()> {
        self.guard.take();
        self.file
            .flush()
            .with_context(|| format!("failed to flush log file {}", self.path.display()))
    }
}

#[cfg(unix)]
fn open_append(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    let file = OpenOptions::new().create(true).append(true).mode(0o600).open(path)?;
    restrict(path, 0o600).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(unix)]
fn restrict(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to restrict permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
