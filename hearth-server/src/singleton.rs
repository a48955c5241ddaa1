//! Ensures only one hearth-server instance owns the agenda cache.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// A lock guard that releases the lock when dropped
pub struct LockGuard {
    _file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `agenda.json` gets `agenda.json.lock` beside it. Without a cache file the
/// lock lives in the runtime directory.
fn lock_path(cache_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(cache_path) = cache_path {
        let mut name = cache_path.as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        return Ok(path);
    }

    let runtime_dir = dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .ok_or_else(|| anyhow::anyhow!("Could not determine runtime directory"))?;

    let dir = runtime_dir.join("hearth");
    fs::create_dir_all(&dir)?;

    Ok(dir.join("server.lock"))
}

/// Acquire an exclusive lock, failing if another instance is running
pub fn acquire_lock(cache_path: Option<&Path>) -> Result<LockGuard> {
    let path = lock_path(cache_path)?;
    let file = File::create(&path).context("Failed to create lock file")?;

    file.try_lock_exclusive().map_err(|_| {
        anyhow::anyhow!(
            "Another hearth-server instance is already using this cache.\n\
            If you believe this is an error, remove: {}",
            path.display()
        )
    })?;

    Ok(LockGuard { _file: file, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_lock_on_same_cache_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("agenda.json");

        let first = acquire_lock(Some(&cache)).unwrap();
        assert_eq!(first.path(), dir.path().join("agenda.json.lock"));
        assert!(acquire_lock(Some(&cache)).is_err());

        drop(first);
        assert!(acquire_lock(Some(&cache)).is_ok());
    }
}
