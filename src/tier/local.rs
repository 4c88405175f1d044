//! Local filesystem tier
//!
//! Layout: `<root>/<toolchain>/<name>/<version>/<digest>/...`
//!
//! An entry exists when its directory exists. Entries are created lazily on
//! the first store and never removed by the cache.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::key::CacheKey;

/// Cache tier rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalTier {
    root: PathBuf,
}

impl LocalTier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the entry for `key`. No I/O.
    pub fn fetch_path(&self, key: &CacheKey) -> PathBuf {
        key.local_path(&self.root)
    }

    /// Whether an entry for `key` exists.
    pub fn has(&self, key: &CacheKey) -> bool {
        self.fetch_path(key).is_dir()
    }

    /// Copy the contents of `input_dir` into the entry for `key`.
    ///
    /// Files already in the entry but absent from `input_dir` are kept;
    /// same-named files are overwritten. Returns the entry path.
    pub fn put(&self, key: &CacheKey, input_dir: &Path) -> io::Result<PathBuf> {
        let dest = self.fetch_path(key);
        fs::metadata(input_dir)?;
        fs::create_dir_all(&dest)?;
        let copied = copy_dir_contents(input_dir, &dest)?;
        debug!(key = %key, files = copied, dest = %dest.display(), "stored local entry");
        Ok(dest)
    }
}

/// Recursively copy everything inside `src` into `dest` (like `cp -R src/. dest`).
///
/// Symlinks are recreated, not followed. Returns the number of files and
/// symlinks copied.
pub fn copy_dir_contents(src: &Path, dest: &Path) -> io::Result<usize> {
    if !fs::metadata(src)?.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a directory: {}", src.display()),
        ));
    }

    let mut copied = 0;
    for entry in WalkDir::new(src)
        .follow_links(false)
        .min_depth(1)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
    {
        let entry = entry.map_err(io::Error::from)?;
        let rel_path = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let target = dest.join(rel_path);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        // Never write through a symlink already sitting at the destination.
        if fs::symlink_metadata(&target).is_ok_and(|m| m.file_type().is_symlink()) {
            fs::remove_file(&target)?;
        }

        if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
        copied += 1;
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    let link_target = fs::read_link(link)?;
    if fs::symlink_metadata(target).is_ok() {
        fs::remove_file(target)?;
    }
    std::os::unix::fs::symlink(link_target, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    fs::copy(link, target).map(|_| ())
}
