//! Effective configuration with full provenance
//!
//! The effective config captures the merged configuration plus
//! information about where each value came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use super::settings::CacheSettings;

/// Schema version for effective config
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "prebuilt-cache/effective_config@1";

/// Project config file name, looked up in the working directory
pub const PROJECT_CONFIG_FILE: &str = ".prebuilt-cache.toml";

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Host,
    Project,
    Cli,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    /// Origin of this source
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Effective configuration with full provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// When this config was computed
    pub created_at: DateTime<Utc>,

    /// The merged configuration object (secrets redacted)
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,

    /// Redacted key paths
    pub redactions: Vec<String>,

    /// Typed settings, extracted before redaction
    #[serde(skip)]
    pub settings: CacheSettings,
}

/// Keys that contain secrets and should be redacted
const SECRET_KEYS: &[&str] = &["password", "token", "secret", "private_key", "credential"];

/// `<config dir>/prebuilt-cache/config.toml`
pub fn default_host_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("prebuilt-cache").join("config.toml"))
}

/// `<cwd>/.prebuilt-cache.toml`
pub fn default_project_config_path() -> Option<PathBuf> {
    std::env::current_dir()
        .ok()
        .map(|dir| dir.join(PROJECT_CONFIG_FILE))
}

impl EffectiveConfig {
    /// Build effective config from layers
    pub fn build(
        host_config_path: Option<&Path>,
        project_config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = Vec::new();
        let mut sources = Vec::new();

        // Layer 1: Built-in defaults
        layers.push(BuiltinDefaults::default().to_value());
        sources.push(ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        });

        // Layer 2: Host config
        if let Some(path) = host_config_path.filter(|p| p.exists()) {
            let (value, digest) = Self::load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Host,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        // Layer 3: Project config
        if let Some(path) = project_config_path.filter(|p| p.exists()) {
            let (value, digest) = Self::load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Project,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        // Layer 4: CLI overrides
        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let mut merged = merge_layers(layers);
        let settings = CacheSettings::from_value(&merged)?;
        let redactions = Self::redact_secrets(&mut merged);
        debug!(sources = sources.len(), "built effective config");

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config: merged,
            sources,
            redactions,
            settings,
        })
    }

    /// Load and parse a TOML file, returning the value and digest
    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let contents = String::from_utf8(bytes)
            .map_err(|e| ConfigError::ParseError(format!("Invalid UTF-8: {}", e)))?;

        let toml_value: toml::Value = toml::from_str(&contents).map_err(|e| {
            ConfigError::ParseError(format!("{}: TOML parse error: {}", path.display(), e))
        })?;

        Ok((Self::toml_to_json(toml_value), digest))
    }

    /// Convert TOML Value to JSON Value
    fn toml_to_json(toml: toml::Value) -> Value {
        match toml {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Number(i.into()),
            toml::Value::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
            toml::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Self::toml_to_json).collect())
            }
            toml::Value::Table(table) => Value::Object(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::toml_to_json(v)))
                    .collect(),
            ),
        }
    }

    /// Redact secrets in the config, returning list of redacted paths
    fn redact_secrets(value: &mut Value) -> Vec<String> {
        let mut redactions = Vec::new();
        Self::redact_recursive(value, String::new(), &mut redactions);
        redactions
    }

    fn redact_recursive(value: &mut Value, path: String, redactions: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let current_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", path, key)
                    };

                    let is_secret = SECRET_KEYS.iter().any(|s| key_lower.contains(s));
                    if is_secret && !val.is_object() && !val.is_array() {
                        *val = Value::String("[REDACTED]".to_string());
                        redactions.push(current_path);
                    } else {
                        Self::redact_recursive(val, current_path, redactions);
                    }
                }
            }
            Value::Array(arr) => {
                for (i, val) in arr.iter_mut().enumerate() {
                    Self::redact_recursive(val, format!("{}[{}]", path, i), redactions);
                }
            }
            _ => {}
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Get a config value by path (dot-separated)
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.config;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(|v| v.as_u64())
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(|v| v.as_bool())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteBackend;
    use crate::key::RemoteKeyLayout;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_build_with_defaults_only() {
        let config = EffectiveConfig::build(None, None, None).unwrap();

        assert_eq!(config.schema_version, SCHEMA_VERSION);
        assert_eq!(config.get_bool("local.enabled"), Some(true));
        assert_eq!(config.get_bool("remote.enabled"), Some(false));
        assert_eq!(config.get_u64("remote.timeout_seconds"), Some(300));
        assert_eq!(config.settings, CacheSettings::default());
    }

    #[test]
    fn test_build_with_cli_override() {
        let cli = serde_json::json!({
            "remote": {"enabled": true, "bucket": "ci-prebuilt", "timeout_seconds": 45}
        });

        let config = EffectiveConfig::build(None, None, Some(cli)).unwrap();

        assert_eq!(config.get_u64("remote.timeout_seconds"), Some(45));
        assert!(config.settings.remote.enabled);
        assert_eq!(config.settings.remote.bucket.as_deref(), Some("ci-prebuilt"));
    }

    #[test]
    fn test_validation_bucket_required() {
        let cli = serde_json::json!({"remote": {"enabled": true}});

        let result = EffectiveConfig::build(None, None, Some(cli));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validation_timeout() {
        let cli = serde_json::json!({"remote": {"timeout_seconds": 0}});

        let result = EffectiveConfig::build(None, None, Some(cli));
        assert!(result.unwrap_err().to_string().contains("timeout_seconds"));
    }

    #[test]
    fn test_secret_redaction_keeps_typed_settings() {
        let cli = serde_json::json!({
            "remote": {"access_token": "ya29.secret", "bucket": "visible"}
        });

        let config = EffectiveConfig::build(None, None, Some(cli)).unwrap();

        assert_eq!(config.get_str("remote.access_token"), Some("[REDACTED]"));
        assert_eq!(config.get_str("remote.bucket"), Some("visible"));
        assert_eq!(config.redactions, vec!["remote.access_token".to_string()]);
        assert!(!config.to_json().unwrap().contains("ya29.secret"));
        assert_eq!(config.settings.remote.access_token.as_deref(), Some("ya29.secret"));
    }

    #[test]
    fn test_host_and_project_layers() {
        let mut host = NamedTempFile::new().unwrap();
        writeln!(host, "[local]").unwrap();
        writeln!(host, "root = \"/host/cache\"").unwrap();
        writeln!(host, "[remote]").unwrap();
        writeln!(host, "bucket = \"host-bucket\"").unwrap();
        writeln!(host, "key_layout = \"legacy\"").unwrap();

        let mut project = NamedTempFile::new().unwrap();
        writeln!(project, "[remote]").unwrap();
        writeln!(project, "enabled = true").unwrap();
        writeln!(project, "backend = \"fs\"").unwrap();
        writeln!(project, "[archive]").unwrap();
        writeln!(project, "exclude = [\"*.dSYM\"]").unwrap();

        let config =
            EffectiveConfig::build(Some(host.path()), Some(project.path()), None).unwrap();

        let settings = &config.settings;
        assert_eq!(settings.local.root, PathBuf::from("/host/cache"));
        assert!(settings.remote.enabled);
        assert_eq!(settings.remote.backend, RemoteBackend::Fs);
        assert_eq!(settings.remote.bucket.as_deref(), Some("host-bucket"));
        assert_eq!(settings.remote.key_layout, RemoteKeyLayout::Legacy);
        assert_eq!(settings.archive.exclude, vec!["*.dSYM".to_string()]);

        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.sources[1].origin, ConfigOrigin::Host);
        assert_eq!(config.sources[2].origin, ConfigOrigin::Project);
        assert_eq!(config.sources[1].digest.as_ref().unwrap().len(), 64);
    }

    #[test]
    fn test_missing_files_are_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("config.toml");

        let config =
            EffectiveConfig::build(Some(missing.as_path()), Some(missing.as_path()), None)
                .unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].origin, ConfigOrigin::Builtin);
    }

    #[test]
    fn test_misspelled_key_in_file_is_rejected() {
        let mut project = NamedTempFile::new().unwrap();
        writeln!(project, "[remote]").unwrap();
        writeln!(project, "enable = true").unwrap();
        writeln!(project, "bucket = \"team-prebuilt\"").unwrap();

        let result = EffectiveConfig::build(None, Some(project.path()), None);
        match result {
            Err(ConfigError::ValidationError(message)) => assert!(message.contains("enable")),
            other => panic!("expected a validation error, got {:?}", other.map(|c| c.settings)),
        }
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let mut host = NamedTempFile::new().unwrap();
        writeln!(host, "[remote").unwrap();

        let result = EffectiveConfig::build(Some(host.path()), None, None);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
