//! Cross-process exclusion for the shared checkout.
//!
//! Every `tfci` process working on the same checkout directory takes an
//! exclusive advisory lock on one lock file inside it before touching the
//! working tree. The lock is released when the guard is dropped.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tracing::{debug, warn};

/// Lock file kept at the top of the checkout. Untracked, so `git diff` between
/// commits never sees it.
pub const LOCK_FILE_NAME: &str = ".tfci.lock";

#[derive(Debug)]
pub struct CheckoutLock {
    file: File,
    path: PathBuf,
}

impl CheckoutLock {
    /// Block until the lock on `checkout_dir` is held.
    pub fn acquire(checkout_dir: &Path) -> Result<Self> {
        let path = checkout_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("open checkout lock {}", path.display()))?;
        if file.try_lock_exclusive().is_err() {
            debug!(path = %path.display(), "checkout locked by another process, waiting");
            file.lock_exclusive()
                .with_context(|| format!("lock checkout {}", path.display()))?;
        }
        debug!(path = %path.display(), "checkout lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CheckoutLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), err = %err, "failed to release checkout lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_is_excluded_until_release() {
        let temp = tempfile::tempdir().expect("tempdir");
        let held = CheckoutLock::acquire(temp.path()).expect("first lock");
        assert!(held.path().exists());

        let other = File::open(held.path()).expect("open lock file");
        assert!(other.try_lock_exclusive().is_err());

        drop(held);
        other.try_lock_exclusive().expect("lock after release");
    }

    #[test]
    fn missing_checkout_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = CheckoutLock::acquire(&temp.path().join("absent")).expect_err("missing dir");
        assert!(format!("{err:#}").contains("open checkout lock"));
    }
}
