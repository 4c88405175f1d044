//! Remote object store tier
//!
//! Each entry is a single archive object: tar under the nested key layout,
//! zip under the flat legacy layout. Fetch downloads it to a scratch
//! directory and unpacks it into the local entry path; put packs the local
//! entry into a scratch archive and uploads it. Scratch files never outlive
//! the call.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use prebuilt_store::{FsObjectStore, GcsConfig, GcsObjectStore, ObjectStore};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveFormat, Archiver};
use crate::config::{ConfigError, RemoteBackend, RemoteSettings};
use crate::error::{CacheError, CacheResult};
use crate::key::{CacheKey, RemoteKeyLayout};

/// Container format of the objects stored under `layout`.
pub fn archive_format(layout: RemoteKeyLayout) -> ArchiveFormat {
    match layout {
        RemoteKeyLayout::Nested => ArchiveFormat::Tar,
        RemoteKeyLayout::Legacy => ArchiveFormat::Zip,
    }
}

/// Cache tier backed by an [`ObjectStore`].
#[derive(Clone)]
pub struct RemoteTier {
    store: Arc<dyn ObjectStore>,
    layout: RemoteKeyLayout,
    archiver: Archiver,
}

impl RemoteTier {
    pub fn new(store: Arc<dyn ObjectStore>, layout: RemoteKeyLayout, archiver: Archiver) -> Self {
        Self {
            store,
            layout,
            archiver: archiver.with_format(archive_format(layout)),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn layout(&self) -> RemoteKeyLayout {
        self.layout
    }

    /// Object key for `key` under this tier's layout.
    pub fn object_key(&self, key: &CacheKey) -> String {
        key.object_key(self.layout)
    }

    /// Whether the store holds an object for `key`, without downloading it.
    pub fn contains(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.store.exists(&self.object_key(key))?)
    }

    /// Download and unpack the entry for `key` into `dest`.
    ///
    /// Returns `false` if the store has no such object; nothing is created
    /// locally in that case.
    pub fn fetch(&self, key: &CacheKey, dest: &Path) -> CacheResult<bool> {
        let object_key = self.object_key(key);
        let scratch = scratch_dir()?;
        let archive_path = scratch.path().join(self.archiver.format().file_name());

        let Some(bytes) = self.store.get(&object_key, &archive_path)? else {
            debug!(%object_key, store = %self.store.describe(), "remote entry not found");
            return Ok(false);
        };
        info!(%object_key, bytes, "downloaded remote entry");

        if dest.exists() {
            self.archiver.unpack(&archive_path, dest, true)?;
        } else {
            self.promote(&archive_path, dest)?;
        }
        Ok(true)
    }

    /// Pack `source` and upload it as the entry for `key`.
    ///
    /// Returns the uploaded archive size in bytes.
    pub fn put(&self, key: &CacheKey, source: &Path) -> CacheResult<u64> {
        let object_key = self.object_key(key);
        let scratch = scratch_dir()?;
        let archive_path = scratch.path().join(self.archiver.format().file_name());

        let summary = self.archiver.pack(source, &archive_path)?;
        let bytes = self.store.put(&object_key, &archive_path)?;
        info!(
            %object_key,
            bytes,
            entries = summary.entries,
            sha256 = %summary.sha256,
            store = %self.store.describe(),
            "uploaded remote entry"
        );
        Ok(bytes)
    }

    /// Unpack into a hidden staging directory beside `dest`, then rename it
    /// into place so a failed unpack never leaves a half-filled entry.
    fn promote(&self, archive_path: &Path, dest: &Path) -> CacheResult<()> {
        let parent = dest.parent().ok_or_else(|| {
            CacheError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cache entry has no parent: {}", dest.display()),
            ))
        })?;
        fs::create_dir_all(parent)?;

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(parent)?;
        self.archiver.unpack(archive_path, staging.path(), false)?;

        if let Err(e) = fs::rename(staging.path(), dest) {
            if !dest.is_dir() {
                return Err(e.into());
            }
            // Another writer won the race; merge without overwriting.
            warn!(dest = %dest.display(), "entry appeared during promotion, merging");
            self.archiver.unpack(archive_path, dest, false)?;
        }
        Ok(())
    }
}

fn scratch_dir() -> std::io::Result<TempDir> {
    tempfile::Builder::new().prefix("prebuilt-cache-").tempdir()
}

/// Open the object store described by `settings`.
pub fn open_store(settings: &RemoteSettings) -> CacheResult<Arc<dyn ObjectStore>> {
    let bucket = settings.bucket.as_deref().ok_or_else(|| {
        ConfigError::ValidationError("remote.bucket is required when remote.enabled".to_string())
    })?;

    let store: Arc<dyn ObjectStore> = match settings.backend {
        RemoteBackend::Gcs => {
            let config = GcsConfig::new(bucket)
                .with_timeout(settings.timeout())
                .with_service_account(settings.service_account.clone());
            let config = match settings.endpoint.as_deref() {
                Some(endpoint) => config.with_endpoint(endpoint),
                None => config,
            };
            let store = GcsObjectStore::new(config);
            match settings.access_token.as_deref() {
                Some(token) => Arc::new(store.with_access_token(token)),
                None => Arc::new(store),
            }
        }
        RemoteBackend::Fs => Arc::new(FsObjectStore::new(bucket)?),
    };
    debug!(store = %store.describe(), "opened remote store");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prebuilt_store::MemoryObjectStore;

    fn key() -> CacheKey {
        CacheKey::derive("14.2", "Alamofire", "5.0.0", "ios", &["static", "debug"])
    }

    fn tier(store: Arc<MemoryObjectStore>) -> RemoteTier {
        RemoteTier::new(store, RemoteKeyLayout::Nested, Archiver::new())
    }

    fn framework_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("Alamofire.framework")).unwrap();
        fs::write(dir.path().join("Alamofire.framework/Alamofire"), "binary").unwrap();
        fs::write(dir.path().join(".DS_Store"), "junk").unwrap();
        dir
    }

    #[test]
    fn test_put_uploads_under_object_key() {
        let store = Arc::new(MemoryObjectStore::new());
        let source = framework_dir();

        let bytes = tier(store.clone()).put(&key(), source.path()).unwrap();

        assert!(bytes > 0);
        assert_eq!(
            store.keys(),
            vec!["14.2/Alamofire/5.0.0/2d16cd783160a678e0ced1b3f19aadc3".to_string()]
        );
    }

    #[test]
    fn test_fetch_missing_returns_false_and_creates_nothing() {
        let store = Arc::new(MemoryObjectStore::new());
        let root = TempDir::new().unwrap();
        let dest = key().local_path(root.path());

        assert!(!tier(store).fetch(&key(), &dest).unwrap());
        assert!(!dest.exists());
        assert!(!root.path().join("14.2").exists());
    }

    #[test]
    fn test_fetch_promotes_into_dest() {
        let store = Arc::new(MemoryObjectStore::new());
        let source = framework_dir();
        let remote = tier(store);
        remote.put(&key(), source.path()).unwrap();

        let root = TempDir::new().unwrap();
        let dest = key().local_path(root.path());
        assert!(remote.fetch(&key(), &dest).unwrap());

        assert_eq!(
            fs::read_to_string(dest.join("Alamofire.framework/Alamofire")).unwrap(),
            "binary"
        );
        assert!(!dest.join(".DS_Store").exists());
        // No staging directories left behind
        let leftovers: Vec<_> = fs::read_dir(dest.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_fetch_into_existing_dest_keeps_files() {
        let store = Arc::new(MemoryObjectStore::new());
        let source = framework_dir();
        let remote = tier(store);
        remote.put(&key(), source.path()).unwrap();

        let root = TempDir::new().unwrap();
        let dest = key().local_path(root.path());
        fs::create_dir_all(dest.join("Alamofire.framework")).unwrap();
        fs::write(dest.join("Alamofire.framework/Alamofire"), "local").unwrap();

        assert!(remote.fetch(&key(), &dest).unwrap());
        assert_eq!(
            fs::read_to_string(dest.join("Alamofire.framework/Alamofire")).unwrap(),
            "local"
        );
    }

    #[test]
    fn test_corrupt_object_is_format_error_and_leaves_no_entry() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert(key().object_key(RemoteKeyLayout::Nested), vec![0x42; 2048]);

        let root = TempDir::new().unwrap();
        let dest = key().local_path(root.path());
        let err = tier(store).fetch(&key(), &dest).unwrap_err();

        assert!(matches!(err, CacheError::Format(_)));
        assert!(!dest.exists());
    }

    #[test]
    fn test_unavailable_store_propagates() {
        let store = Arc::new(MemoryObjectStore::new());
        store.set_unavailable(true);

        let root = TempDir::new().unwrap();
        let err = tier(store).fetch(&key(), &key().local_path(root.path())).unwrap_err();
        assert!(matches!(err, CacheError::RemoteUnavailable(_)));
    }

    #[test]
    fn test_legacy_layout_object_key() {
        let store = Arc::new(MemoryObjectStore::new());
        let remote = RemoteTier::new(store, RemoteKeyLayout::Legacy, Archiver::new());
        assert_eq!(
            remote.object_key(&key()),
            "14.2Alamofire5.0.02d16cd783160a678e0ced1b3f19aadc3"
        );
    }

    #[test]
    fn test_legacy_layout_uploads_zip() {
        let store = Arc::new(MemoryObjectStore::new());
        let remote = RemoteTier::new(store.clone(), RemoteKeyLayout::Legacy, Archiver::new());
        let source = framework_dir();

        remote.put(&key(), source.path()).unwrap();

        let object = store.object(&key().object_key(RemoteKeyLayout::Legacy)).unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(object)).unwrap();
        let mut binary = String::new();
        std::io::Read::read_to_string(
            &mut archive.by_name("Alamofire.framework/Alamofire").unwrap(),
            &mut binary,
        )
        .unwrap();
        assert_eq!(binary, "binary");

        let root = TempDir::new().unwrap();
        let dest = key().local_path(root.path());
        assert!(remote.fetch(&key(), &dest).unwrap());
        assert!(dest.join("Alamofire.framework/Alamofire").is_file());
    }

    #[test]
    fn test_archive_format_per_layout() {
        assert_eq!(archive_format(RemoteKeyLayout::Nested), ArchiveFormat::Tar);
        assert_eq!(archive_format(RemoteKeyLayout::Legacy), ArchiveFormat::Zip);
    }

    #[test]
    fn test_contains_uses_object_key() {
        let store = Arc::new(MemoryObjectStore::new());
        let remote = tier(store.clone());
        assert!(!remote.contains(&key()).unwrap());

        store.insert(key().object_key(RemoteKeyLayout::Nested), b"x".to_vec());
        assert!(remote.contains(&key()).unwrap());
    }

    #[test]
    fn test_open_store_requires_bucket() {
        let settings = RemoteSettings {
            enabled: true,
            bucket: None,
            ..RemoteSettings::default()
        };
        assert!(matches!(open_store(&settings), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_open_fs_store() {
        let bucket = TempDir::new().unwrap();
        let settings = RemoteSettings {
            enabled: true,
            backend: RemoteBackend::Fs,
            bucket: Some(bucket.path().to_string_lossy().to_string()),
            ..RemoteSettings::default()
        };
        let store = open_store(&settings).unwrap();
        assert!(store.describe().starts_with("file://"));
    }
}
