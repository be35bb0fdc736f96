use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Result};
use scopeguard::ScopeGuard;
use tracing::{error, info};

use crate::error::CatalogServerError;

pub const META_DIR: &str = "meta";
pub const LOG_DIR: &str = "log";
pub const LOCK_FILE: &str = "LOCK";

/// Holds the work directory's `LOCK` file, removed when dropped.
pub type LockGuard = ScopeGuard<PathBuf, fn(PathBuf)>;

fn remove_lock_file(path: PathBuf) {
    match fs::remove_file(&path) {
        Ok(()) => info!("removed lock file: {:?}", path),
        Err(e) => error!("failed to remove lock file {:?}, err: {e}", path),
    }
}

/// Fails if another server already holds `dir`.
pub fn create_lock_file(dir: impl AsRef<Path>) -> Result<LockGuard> {
    let lock_path = dir.as_ref().join(LOCK_FILE);
    info!("create lock file: {:?}", lock_path);

    fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&lock_path)?;

    Ok(scopeguard::guard(lock_path, remove_lock_file as fn(PathBuf)))
}

pub struct Formatter {
    directory: PathBuf,
}

impl Formatter {
    pub fn new(p: impl AsRef<Path>) -> Result<Self> {
        ensure!(p.as_ref().exists(), CatalogServerError::PathNotExists);
        ensure!(p.as_ref().is_dir(), CatalogServerError::NotDir);

        Ok(Self {
            directory: p.as_ref().to_path_buf(),
        })
    }

    pub fn format(&self) -> std::io::Result<()> {
        info!("formatting {:?}...", self.directory.as_os_str());

        fs::create_dir(self.directory.join(LOG_DIR))?;
        fs::create_dir(self.directory.join(META_DIR))?;

        info!("successfully formatted {:?}!", self.directory.as_os_str());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "catalogserver-format-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    pub fn test_format() {
        let dir = scratch_dir("ok");
        Formatter::new(&dir).unwrap().format().unwrap();

        assert!(dir.join(META_DIR).is_dir());
        assert!(dir.join(LOG_DIR).is_dir());

        // formatting twice fails rather than reusing a directory
        assert!(Formatter::new(&dir).unwrap().format().is_err());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    pub fn test_lock_file_released_on_drop() {
        let dir = scratch_dir("lock");

        let guard = create_lock_file(&dir).unwrap();
        assert!(dir.join(LOCK_FILE).is_file());
        assert!(create_lock_file(&dir).is_err());

        drop(guard);
        assert!(!dir.join(LOCK_FILE).exists());

        // an early return through `?` releases it as well
        let again = || -> Result<()> {
            let _lock = create_lock_file(&dir)?;
            anyhow::bail!("bind failed");
        };
        assert!(again().is_err());
        assert!(!dir.join(LOCK_FILE).exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    pub fn test_missing_dir() {
        let dir = scratch_dir("missing").join("nope");
        assert!(Formatter::new(&dir).is_err());
    }
}
