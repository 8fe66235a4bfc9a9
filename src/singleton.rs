//! Only one mirror daemon may write the mapping file at a time.

use std::fs::{self, File};
use std::path::PathBuf;

use anyhow::{Context, Result};
use fs2::FileExt;

/// Holds the lock until dropped.
pub struct LockGuard {
    _file: File,
}

fn lock_path() -> Result<PathBuf> {
    let runtime_dir = dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .context("Could not determine runtime directory")?;

    let dir = runtime_dir.join("calmirror");
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;

    Ok(dir.join("daemon.lock"))
}

/// Acquire an exclusive lock, failing if another daemon is running.
pub fn acquire_lock() -> Result<LockGuard> {
    let path = lock_path()?;
    let file = File::create(&path).context("Failed to create lock file")?;

    file.try_lock_exclusive().map_err(|_| {
        anyhow::anyhow!(
            "Another calmirror daemon is already running.\n\
            If you believe this is an error, remove: {}",
            path.display()
        )
    })?;

    Ok(LockGuard { _file: file })
}
