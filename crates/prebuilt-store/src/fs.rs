//! Directory-backed object store.
//!
//! Layout: `<root>/<key>`. Keys containing `/` become nested directories.
//! Writes go to a temp file in the destination directory and are renamed
//! into place, so readers never observe a partial object.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::{validate_key, ObjectStore, StoreError, StoreResult};

/// Object store rooted at a local (or mounted) directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Open a store at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> StoreResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

impl ObjectStore for FsObjectStore {
    fn get(&self, key: &str, dest: &Path) -> StoreResult<Option<u64>> {
        let path = self.object_path(key)?;
        if !path.is_file() {
            debug!(key, root = %self.root.display(), "object not found");
            return Ok(None);
        }
        let bytes = fs::copy(&path, dest)?;
        Ok(Some(bytes))
    }

    fn put(&self, key: &str, source: &Path) -> StoreResult<u64> {
        let path = self.object_path(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(parent)?;

        let mut staged = NamedTempFile::new_in(parent)?;
        let bytes = io::copy(&mut File::open(source)?, staged.as_file_mut())?;
        staged.as_file().sync_all()?;
        staged
            .persist(&path)
            .map_err(|e| StoreError::Io(e.error))?;

        debug!(key, bytes, "object written");
        Ok(bytes)
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.object_path(key)?.is_file())
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_get_missing_object_creates_nothing() {
        let bucket = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let store = FsObjectStore::new(bucket.path()).unwrap();

        let dest = scratch.path().join("download.tar");
        assert!(store.get("missing/key", &dest).unwrap().is_none());
        assert!(!dest.exists());
        assert!(!store.exists("missing/key").unwrap());
    }

    #[test]
    fn test_put_then_get_nested_key() {
        let bucket = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let store = FsObjectStore::new(bucket.path()).unwrap();

        let source = scratch.path().join("upload.tar");
        fs::write(&source, b"archive bytes").unwrap();

        assert_eq!(store.put("14.2/Alamofire/5.0.0/abc", &source).unwrap(), 13);
        assert!(store.exists("14.2/Alamofire/5.0.0/abc").unwrap());
        assert!(bucket.path().join("14.2/Alamofire/5.0.0/abc").is_file());

        let dest = scratch.path().join("download.tar");
        assert_eq!(store.get("14.2/Alamofire/5.0.0/abc", &dest).unwrap(), Some(13));
        assert_eq!(fs::read(&dest).unwrap(), b"archive bytes");
    }

    #[test]
    fn test_put_replaces_existing_object() {
        let bucket = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let store = FsObjectStore::new(bucket.path()).unwrap();

        let source = scratch.path().join("upload.tar");
        fs::write(&source, b"first").unwrap();
        store.put("key", &source).unwrap();
        fs::write(&source, b"second").unwrap();
        store.put("key", &source).unwrap();

        assert_eq!(fs::read(bucket.path().join("key")).unwrap(), b"second");
    }

    #[test]
    fn test_rejects_escaping_key() {
        let bucket = TempDir::new().unwrap();
        let store = FsObjectStore::new(bucket.path()).unwrap();
        assert!(matches!(
            store.exists("../outside"),
            Err(StoreError::InvalidKey(_))
        ));
    }
}
