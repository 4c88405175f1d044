//! Prebuilt Cache - two-tier cache for prebuilt framework artifacts
//!
//! Build outputs are addressed by toolchain version, target name, target
//! version and a digest of the build options plus platform. Lookups consult
//! a local directory tree first and fall back to a remote object store,
//! promoting remote hits into the local tree.

pub mod archive;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod key;
pub mod tier;
pub mod toolchain;

pub use archive::{
    ArchiveError, ArchiveFormat, Archiver, ExcludeRules, PackSummary, UnpackSummary,
};
pub use config::{CacheSettings, ConfigError, EffectiveConfig, RemoteBackend};
pub use coordinator::{CacheCoordinator, Lookup, LookupOutcome, LookupRequest, StoreOutcome};
pub use error::{CacheError, CacheResult};
pub use key::{BuildTarget, CacheKey, KeyDeriver, RemoteKeyLayout};
pub use tier::{LocalTier, RemoteTier};
pub use toolchain::ToolchainVersion;

pub use prebuilt_store::{
    FsObjectStore, GcsConfig, GcsObjectStore, MemoryObjectStore, ObjectStore, StoreError,
};
