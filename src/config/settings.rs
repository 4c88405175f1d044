//! Typed view of the merged configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::defaults::{default_cache_root, DEFAULT_REMOTE_TIMEOUT_SECONDS};
use super::ConfigError;
use crate::archive::ExcludeRules;
use crate::key::RemoteKeyLayout;

/// Upper bound for `remote.timeout_seconds`.
pub const MAX_REMOTE_TIMEOUT_SECONDS: u64 = 3600;

/// Object store implementation behind the remote tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    /// Google Cloud Storage bucket
    #[default]
    Gcs,
    /// Directory used as a bucket
    Fs,
}

/// `[local]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalSettings {
    pub enabled: bool,
    pub root: PathBuf,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            root: default_cache_root(),
        }
    }
}

/// `[remote]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteSettings {
    pub enabled: bool,
    pub backend: RemoteBackend,
    /// GCS bucket name, or the bucket directory for the `fs` backend.
    pub bucket: Option<String>,
    pub timeout_seconds: u64,
    pub key_layout: RemoteKeyLayout,
    /// Impersonated when requesting GCS access tokens.
    pub service_account: Option<String>,
    /// Overrides the GCS API endpoint (emulators).
    pub endpoint: Option<String>,
    /// Fixed GCS bearer token; minted with gcloud when unset.
    pub access_token: Option<String>,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: RemoteBackend::default(),
            bucket: None,
            timeout_seconds: DEFAULT_REMOTE_TIMEOUT_SECONDS,
            key_layout: RemoteKeyLayout::default(),
            service_account: None,
            endpoint: None,
            access_token: None,
        }
    }
}

/// `[archive]` table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveSettings {
    /// Globs excluded from archives in addition to dot-prefixed names.
    pub exclude: Vec<String>,
}

/// `[toolchain]` table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolchainSettings {
    /// Fixed toolchain version; probed when unset.
    pub version: Option<String>,
}

/// Settings consumed by the cache coordinator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    pub local: LocalSettings,
    pub remote: RemoteSettings,
    pub archive: ArchiveSettings,
    pub toolchain: ToolchainSettings,
}

impl RemoteSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl CacheSettings {
    /// Local tier at `root`, remote disabled.
    pub fn local_only(root: impl Into<PathBuf>) -> Self {
        Self {
            local: LocalSettings {
                enabled: true,
                root: root.into(),
            },
            ..Self::default()
        }
    }

    /// Enable the remote tier against `bucket`.
    pub fn with_remote(mut self, backend: RemoteBackend, bucket: impl Into<String>) -> Self {
        self.remote.enabled = true;
        self.remote.backend = backend;
        self.remote.bucket = Some(bucket.into());
        self
    }

    /// Parse and validate the merged configuration value.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let mut settings: Self = serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        settings.local.root = expand_home(&settings.local.root);
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote.enabled && self.remote.bucket.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::ValidationError(
                "remote.bucket is required when remote.enabled".to_string(),
            ));
        }

        let timeout = self.remote.timeout_seconds;
        if timeout == 0 || timeout > MAX_REMOTE_TIMEOUT_SECONDS {
            return Err(ConfigError::ValidationError(format!(
                "remote.timeout_seconds must be in (0, {}]",
                MAX_REMOTE_TIMEOUT_SECONDS
            )));
        }

        if self.local.enabled && self.local.root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "local.root must not be empty".to_string(),
            ));
        }

        self.exclude_rules()?;
        Ok(())
    }

    /// Compiled `archive.exclude` globs.
    pub fn exclude_rules(&self) -> Result<ExcludeRules, ConfigError> {
        ExcludeRules::new()
            .with_patterns(&self.archive.exclude)
            .map_err(|e| ConfigError::ValidationError(format!("archive.exclude: {}", e)))
    }
}

/// Expand a leading `~/` against the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
