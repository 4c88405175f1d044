//! Toolchain version probe
//!
//! Every cache key is scoped to the Xcode version that produced the
//! artifact. The version is probed once at startup and then passed around as
//! a plain value:
//!
//! ```text
//! $ xcodebuild -version
//! Xcode 14.2
//! Build version 14C18
//! ```
//!
//! yields `14.2` (last token of the first line). When the probe fails the
//! version is the literal [`UNKNOWN`]; every entry written in such a session
//! shares one toolchain bucket.

use std::fmt;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Sentinel used when the toolchain cannot be probed.
pub const UNKNOWN: &str = "Unknown";

/// Toolchain version string used as the first cache key component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolchainVersion(String);

impl ToolchainVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// The degraded value used after a failed probe.
    pub fn unknown() -> Self {
        Self(UNKNOWN.to_string())
    }

    /// Probe `xcodebuild -version`.
    pub fn probe() -> Self {
        Self::probe_with("xcodebuild", &["-version"])
    }

    /// Run `program args...` and parse its output like `xcodebuild -version`.
    pub fn probe_with(program: &str, args: &[&str]) -> Self {
        match run_command(program, args) {
            Ok(output) => match parse_version_output(&output) {
                Some(version) => {
                    debug!(program, %version, "probed toolchain version");
                    Self(version)
                }
                None => {
                    warn!(program, "toolchain probe produced no version, using {}", UNKNOWN);
                    Self::unknown()
                }
            },
            Err(e) => {
                warn!(program, error = %e, "toolchain probe failed, using {}", UNKNOWN);
                Self::unknown()
            }
        }
    }

    /// Use the configured version if present, otherwise probe.
    pub fn resolve(configured: Option<&str>) -> Self {
        match configured.map(str::trim).filter(|v| !v.is_empty()) {
            Some(version) => Self::new(version),
            None => Self::probe(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN
    }
}

impl fmt::Display for ToolchainVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the version from `xcodebuild -version` output.
///
/// "Xcode 10.2.1\nBuild version 10E1001\n" -> "10.2.1"
pub fn parse_version_output(output: &str) -> Option<String> {
    output
        .lines()
        .next()?
        .split_whitespace()
        .last()
        .map(str::to_string)
}

fn run_command(cmd: &str, args: &[&str]) -> Result<String, std::io::Error> {
    let output = Command::new(cmd).args(args).output()?;

    if output.status.success() {
        String::from_utf8(output.stdout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("command failed with exit code: {:?}", output.status.code()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_xcodebuild_output() {
        assert_eq!(
            parse_version_output("Xcode 10.2.1\nBuild version 10E1001\n"),
            Some("10.2.1".to_string())
        );
        assert_eq!(
            parse_version_output("Xcode 14.2\nBuild version 14C18"),
            Some("14.2".to_string())
        );
    }

    #[test]
    fn test_parse_empty_output() {
        assert_eq!(parse_version_output(""), None);
        assert_eq!(parse_version_output("   \nBuild version 1"), None);
    }

    #[test]
    fn test_missing_program_degrades_to_unknown() {
        let version = ToolchainVersion::probe_with("definitely-not-a-real-xcodebuild", &[]);
        assert!(version.is_unknown());
        assert_eq!(version.as_str(), "Unknown");
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_with_echo() {
        let version = ToolchainVersion::probe_with("echo", &["Xcode 15.4"]);
        assert_eq!(version, ToolchainVersion::new("15.4"));
    }

    #[test]
    fn test_resolve_prefers_configured() {
        assert_eq!(ToolchainVersion::resolve(Some("14.2")).as_str(), "14.2");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let json = serde_json::to_string(&ToolchainVersion::new("14.2")).unwrap();
        assert_eq!(json, "\"14.2\"");
    }
}
