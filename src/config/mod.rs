//! Configuration merge system
//!
//! Implements the 4-layer configuration merge:
//! 1. Built-in defaults
//! 2. Host/user config (`<config dir>/prebuilt-cache/config.toml`)
//! 3. Project config (`.prebuilt-cache.toml`)
//! 4. CLI flags

mod defaults;
mod effective;
mod merge;
mod settings;

pub use defaults::{default_cache_root, BuiltinDefaults, DEFAULT_REMOTE_TIMEOUT_SECONDS};
pub use effective::{
    default_host_config_path, default_project_config_path, ConfigError, ConfigOrigin,
    ConfigSource, EffectiveConfig, PROJECT_CONFIG_FILE,
};
pub use merge::{deep_merge, merge_layers};
pub use settings::{
    ArchiveSettings, CacheSettings, LocalSettings, RemoteBackend, RemoteSettings,
    ToolchainSettings, MAX_REMOTE_TIMEOUT_SECONDS,
};
