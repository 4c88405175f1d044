//! Built-in defaults (layer 1)

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Subdirectory of the per-user cache directory holding prebuilt entries.
pub const CACHE_SUBDIR: &str = "CocoaPods/Prebuilt";

/// Default remote request timeout in seconds.
pub const DEFAULT_REMOTE_TIMEOUT_SECONDS: u64 = 300;

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Local cache enabled (default: true)
    pub local_enabled: bool,

    /// Local cache root (default: `<user cache dir>/CocoaPods/Prebuilt`)
    pub local_root: PathBuf,

    /// Remote cache enabled (default: false)
    pub remote_enabled: bool,

    /// Remote backend (default: "gcs")
    pub remote_backend: String,

    /// Remote request timeout in seconds (default: 300)
    pub remote_timeout_seconds: u64,

    /// Remote object key layout (default: "nested")
    pub remote_key_layout: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            local_enabled: true,
            local_root: default_cache_root(),
            remote_enabled: false,
            remote_backend: "gcs".to_string(),
            remote_timeout_seconds: DEFAULT_REMOTE_TIMEOUT_SECONDS,
            remote_key_layout: "nested".to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "local": {
                "enabled": self.local_enabled,
                "root": self.local_root.to_string_lossy(),
            },
            "remote": {
                "enabled": self.remote_enabled,
                "backend": self.remote_backend,
                "timeout_seconds": self.remote_timeout_seconds,
                "key_layout": self.remote_key_layout,
            },
            "archive": {
                "exclude": []
            }
        })
    }
}

/// `<user cache dir>/CocoaPods/Prebuilt`, e.g. `~/Library/Caches/CocoaPods/Prebuilt` on macOS.
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(CACHE_SUBDIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let defaults = BuiltinDefaults::default();
        assert!(defaults.local_enabled);
        assert!(!defaults.remote_enabled);
        assert_eq!(defaults.remote_backend, "gcs");
        assert_eq!(defaults.remote_timeout_seconds, 300);
        assert!(defaults.local_root.ends_with("CocoaPods/Prebuilt"));
    }

    #[test]
    fn test_to_value() {
        let value = BuiltinDefaults::default().to_value();

        assert_eq!(value["local"]["enabled"], true);
        assert_eq!(value["remote"]["enabled"], false);
        assert_eq!(value["remote"]["key_layout"], "nested");
        assert!(value["archive"]["exclude"].as_array().unwrap().is_empty());
    }
}
