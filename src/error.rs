//! Cache error taxonomy
//!
//! "Not found" on either tier and the archiver's duplicate/already-exists
//! guards are normal results and never show up here.

use std::io;

use prebuilt_store::StoreError;

use crate::archive::ArchiveError;
use crate::config::ConfigError;

/// Errors surfaced by lookup and store requests.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Local filesystem could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport or auth failure talking to the remote store.
    #[error("remote cache unavailable: {0}")]
    RemoteUnavailable(#[from] StoreError),

    /// Downloaded archive is corrupt or unsafe to extract.
    #[error("corrupt archive: {0}")]
    Format(String),

    /// Packaging refused the input tree.
    #[error("archive error: {0}")]
    Archive(ArchiveError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<ArchiveError> for CacheError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Io(e) => CacheError::Io(e),
            ArchiveError::Walk(e) => CacheError::Io(e.into()),
            ArchiveError::Format(msg) => CacheError::Format(msg),
            ArchiveError::UnsafeEntry { .. } => CacheError::Format(err.to_string()),
            other => CacheError::Archive(other),
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_archive_format_maps_to_format() {
        let err: CacheError = ArchiveError::Format("truncated header".to_string()).into();
        assert!(matches!(err, CacheError::Format(ref m) if m == "truncated header"));
    }

    #[test]
    fn test_unsafe_entry_maps_to_format() {
        let err: CacheError = ArchiveError::UnsafeEntry {
            name: PathBuf::from("../evil"),
        }
        .into();
        assert!(matches!(err, CacheError::Format(_)));
    }

    #[test]
    fn test_archive_io_maps_to_io() {
        let err: CacheError =
            ArchiveError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "denied")).into();
        assert!(matches!(err, CacheError::Io(_)));
    }

    #[test]
    fn test_store_error_is_remote_unavailable() {
        let err: CacheError = StoreError::Unavailable("timeout".to_string()).into();
        assert!(err.to_string().starts_with("remote cache unavailable"));
    }
}
