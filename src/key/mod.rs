//! Cache key derivation
//!
//! A cache key addresses one prebuilt artifact:
//!
//! ```text
//! (toolchain version, target name, target version, digest)
//! digest = md5(render(options ++ [platform]))
//! ```
//!
//! Options are an ordered list, not a set: callers must pass them in a
//! deterministic order or keys fragment. The digest is 128 bits rendered as
//! 32 lowercase hex characters.
//!
//! The same four components address the artifact in both tiers:
//! - local: `<root>/<toolchain>/<name>/<version>/<digest>`
//! - remote: see [`RemoteKeyLayout`]

mod canonical;

pub use canonical::render_list;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::toolchain::ToolchainVersion;

/// Identity of the thing being built. Read-only to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildTarget {
    /// Target (pod/framework) name, e.g. "Alamofire"
    pub name: String,
    /// Target version, e.g. "5.0.0"
    pub version: String,
    /// Platform name, e.g. "ios"
    pub platform: String,
}

impl BuildTarget {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            platform: platform.into(),
        }
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.name, self.version, self.platform)
    }
}

/// Derived address of one cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub toolchain: String,
    pub name: String,
    pub version: String,
    pub digest: String,
}

impl CacheKey {
    /// Derive a key from raw components. Pure; never fails.
    pub fn derive<S: AsRef<str>>(
        toolchain: &str,
        name: &str,
        version: &str,
        platform: &str,
        options: &[S],
    ) -> Self {
        Self {
            toolchain: toolchain.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            digest: options_digest(options, platform),
        }
    }

    /// `<root>/<toolchain>/<name>/<version>/<digest>`
    pub fn local_path(&self, root: &Path) -> PathBuf {
        root.join(&self.toolchain)
            .join(&self.name)
            .join(&self.version)
            .join(&self.digest)
    }

    /// Object key in the remote store under the given layout.
    pub fn object_key(&self, layout: RemoteKeyLayout) -> String {
        match layout {
            RemoteKeyLayout::Nested => format!(
                "{}/{}/{}/{}",
                self.toolchain, self.name, self.version, self.digest
            ),
            RemoteKeyLayout::Legacy => format!(
                "{}{}{}{}",
                self.toolchain, self.name, self.version, self.digest
            ),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.toolchain, self.name, self.version, self.digest
        )
    }
}

/// Hex MD5 of the option list with the platform appended.
pub fn options_digest<S: AsRef<str>>(options: &[S], platform: &str) -> String {
    let mut items: Vec<&str> = options.iter().map(AsRef::as_ref).collect();
    items.push(platform);
    hex::encode(Md5::digest(render_list(&items).as_bytes()))
}

/// Derives keys with a toolchain version fixed for the whole run.
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    toolchain: ToolchainVersion,
}

impl KeyDeriver {
    pub fn new(toolchain: ToolchainVersion) -> Self {
        Self { toolchain }
    }

    pub fn toolchain(&self) -> &ToolchainVersion {
        &self.toolchain
    }

    pub fn derive<S: AsRef<str>>(&self, target: &BuildTarget, options: &[S]) -> CacheKey {
        CacheKey::derive(
            self.toolchain.as_str(),
            &target.name,
            &target.version,
            &target.platform,
            options,
        )
    }
}

/// How the four key components are joined into a remote object key.
///
/// `Legacy` concatenates them with no separator, byte-compatible with objects
/// uploaded by earlier tooling. It is ambiguous: name "AB" + version "1" and
/// name "A" + version "B1" share a prefix. `Nested` separates components with
/// `/` and is the default for new buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKeyLayout {
    #[default]
    Nested,
    Legacy,
}

impl RemoteKeyLayout {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteKeyLayout::Nested => "nested",
            RemoteKeyLayout::Legacy => "legacy",
        }
    }
}

impl FromStr for RemoteKeyLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nested" => Ok(RemoteKeyLayout::Nested),
            "legacy" => Ok(RemoteKeyLayout::Legacy),
            other => Err(format!(
                "unknown remote key layout {:?} (expected \"nested\" or \"legacy\")",
                other
            )),
        }
    }
}

impl fmt::Display for RemoteKeyLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
