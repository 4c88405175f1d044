//! Tiered lookup and store
//!
//! Lookup order: local tier, then remote tier. A remote hit is unpacked
//! into the local tier before it is reported. Store writes the local tier
//! and, when enabled, uploads the local entry to the remote tier.
//!
//! A disabled local tier turns both operations into no-ops that touch
//! neither the filesystem nor the network.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use prebuilt_store::ObjectStore;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::archive::Archiver;
use crate::config::{CacheSettings, ConfigError};
use crate::error::CacheResult;
use crate::key::{BuildTarget, CacheKey, KeyDeriver};
use crate::tier::{open_store, LocalTier, RemoteTier};
use crate::toolchain::ToolchainVersion;

/// Result state of a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupOutcome {
    /// Local caching is off; nothing was checked.
    Disabled,
    LocalHit,
    /// Found remotely and promoted into the local tier.
    RemoteHit,
    Miss,
}

/// Outcome of [`CacheCoordinator::lookup`].
#[derive(Debug, Clone, Serialize)]
pub struct Lookup {
    pub key: CacheKey,
    /// Local entry path; exists only on a hit.
    pub path: PathBuf,
    pub outcome: LookupOutcome,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self.outcome, LookupOutcome::LocalHit | LookupOutcome::RemoteHit)
    }
}

/// Outcome of [`CacheCoordinator::store`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StoreOutcome {
    /// Local caching is off; nothing was written.
    Disabled,
    Stored {
        path: PathBuf,
        /// Archive size, when the entry was also uploaded.
        uploaded_bytes: Option<u64>,
    },
}

/// One target in a batch lookup.
#[derive(Debug, Clone)]
pub struct LookupRequest {
    pub target: BuildTarget,
    pub options: Vec<String>,
}

impl LookupRequest {
    pub fn new<S: AsRef<str>>(target: BuildTarget, options: &[S]) -> Self {
        Self {
            target,
            options: options.iter().map(|o| o.as_ref().to_string()).collect(),
        }
    }
}

/// Two-tier prebuilt artifact cache.
pub struct CacheCoordinator {
    settings: CacheSettings,
    deriver: KeyDeriver,
    local: LocalTier,
    remote: Option<RemoteTier>,
}

impl CacheCoordinator {
    /// Build a coordinator over an explicit object store.
    ///
    /// `store` is required when the remote tier is enabled and ignored
    /// otherwise.
    pub fn new(
        settings: CacheSettings,
        toolchain: ToolchainVersion,
        store: Option<Arc<dyn ObjectStore>>,
    ) -> CacheResult<Self> {
        let archiver = Archiver::new().with_exclude(settings.exclude_rules()?);

        let remote = if settings.remote.enabled {
            let store = store.ok_or_else(|| {
                ConfigError::ValidationError(
                    "remote tier enabled without an object store".to_string(),
                )
            })?;
            Some(RemoteTier::new(store, settings.remote.key_layout, archiver))
        } else {
            None
        };

        debug!(
            toolchain = %toolchain,
            local = settings.local.enabled,
            remote = remote.is_some(),
            root = %settings.local.root.display(),
            "cache coordinator ready"
        );

        Ok(Self {
            local: LocalTier::new(settings.local.root.clone()),
            deriver: KeyDeriver::new(toolchain),
            settings,
            remote,
        })
    }

    /// Validate `settings` and open the configured object store.
    pub fn from_settings(settings: CacheSettings, toolchain: ToolchainVersion) -> CacheResult<Self> {
        settings.validate()?;
        let store = if settings.remote.enabled && settings.local.enabled {
            Some(open_store(&settings.remote)?)
        } else {
            None
        };
        let mut settings = settings;
        if store.is_none() {
            settings.remote.enabled = false;
        }
        Self::new(settings, toolchain, store)
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn toolchain(&self) -> &ToolchainVersion {
        self.deriver.toolchain()
    }

    pub fn local(&self) -> &LocalTier {
        &self.local
    }

    pub fn remote(&self) -> Option<&RemoteTier> {
        self.remote.as_ref()
    }

    pub fn key_for<S: AsRef<str>>(&self, target: &BuildTarget, options: &[S]) -> CacheKey {
        self.deriver.derive(target, options)
    }

    /// Whether the remote store already holds `target` built with
    /// `options`, checked without downloading. `None` when the remote tier
    /// is off.
    pub fn remote_contains<S: AsRef<str>>(
        &self,
        target: &BuildTarget,
        options: &[S],
    ) -> CacheResult<Option<bool>> {
        match &self.remote {
            Some(remote) => Ok(Some(remote.contains(&self.key_for(target, options))?)),
            None => Ok(None),
        }
    }

    /// Find a prebuilt artifact for `target` built with `options`.
    ///
    /// Not-found in either tier is a miss, never an error. Remote transport
    /// failures are returned as errors.
    pub fn lookup<S: AsRef<str>>(&self, target: &BuildTarget, options: &[S]) -> CacheResult<Lookup> {
        let key = self.key_for(target, options);
        let path = self.local.fetch_path(&key);

        let outcome = if !self.settings.local.enabled {
            LookupOutcome::Disabled
        } else if self.local.has(&key) {
            LookupOutcome::LocalHit
        } else {
            match &self.remote {
                Some(remote) if remote.fetch(&key, &path)? => LookupOutcome::RemoteHit,
                _ => LookupOutcome::Miss,
            }
        };

        info!(artifact = %target, key = %key, outcome = ?outcome, "cache lookup");
        Ok(Lookup { key, path, outcome })
    }

    /// Look up many independent targets in parallel. Results keep input order.
    pub fn lookup_all(&self, requests: &[LookupRequest]) -> Vec<CacheResult<Lookup>> {
        requests
            .par_iter()
            .map(|request| self.lookup(&request.target, &request.options))
            .collect()
    }

    /// Store the build output in `input_dir` for `target` built with `options`.
    pub fn store<S: AsRef<str>>(
        &self,
        target: &BuildTarget,
        input_dir: &Path,
        options: &[S],
    ) -> CacheResult<StoreOutcome> {
        if !self.settings.local.enabled {
            debug!(artifact = %target, "local cache disabled, skipping store");
            return Ok(StoreOutcome::Disabled);
        }

        let key = self.key_for(target, options);
        let path = self.local.put(&key, input_dir)?;

        let uploaded_bytes = match &self.remote {
            Some(remote) => Some(remote.put(&key, &path)?),
            None => None,
        };

        info!(artifact = %target, key = %key, uploaded = uploaded_bytes.is_some(), "cache store");
        Ok(StoreOutcome::Stored {
            path,
            uploaded_bytes,
        })
    }
}
