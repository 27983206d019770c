//! Provider versions and execution modes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::VcrError;

/// Execution mode for a test run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Fixtures are read back instead of calling real APIs.
    Replaying,

    /// Real interactions are captured as new fixtures.
    Recording,
}

impl Mode {
    /// Canonical lowercase label, used in log paths.
    pub fn lower(&self) -> &'static str {
        match self {
            Mode::Replaying => "replaying",
            Mode::Recording => "recording",
        }
    }

    /// Uppercase label passed to child processes as `VCR_MODE`.
    pub fn upper(&self) -> &'static str {
        match self {
            Mode::Replaying => "REPLAYING",
            Mode::Recording => "RECORDING",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.lower())
    }
}

impl FromStr for Mode {
    type Err = VcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replaying" => Ok(Mode::Replaying),
            "recording" => Ok(Mode::Recording),
            _ => Err(VcrError::UnknownMode(s.to_string())),
        }
    }
}

/// Provider release track.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Version {
    Ga,
    Beta,
}

impl Version {
    pub const ALL: [Version; 2] = [Version::Ga, Version::Beta];

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Ga => "ga",
            Version::Beta => "beta",
        }
    }

    /// Prefix of this version's objects inside a fixture bucket.
    ///
    /// GA fixtures live at the bucket root.
    pub fn bucket_path(&self) -> String {
        match self {
            Version::Ga => String::new(),
            other => format!("{}/", other.as_str()),
        }
    }

    /// Go module path of the provider built from this track.
    pub fn module_path(&self) -> &'static str {
        match self {
            Version::Ga => "github.com/hashicorp/terraform-provider-google",
            Version::Beta => "github.com/hashicorp/terraform-provider-google-beta",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Version {
    type Err = VcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ga" => Ok(Version::Ga),
            "beta" => Ok(Version::Beta),
            _ => Err(VcrError::UnknownVersion(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_labels() {
        assert_eq!(Mode::Recording.lower(), "recording");
        assert_eq!(Mode::Replaying.lower(), "replaying");
        assert_eq!(Mode::Recording.upper(), "RECORDING");
        assert_eq!(Mode::Replaying.upper(), "REPLAYING");
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("RECORDING".parse::<Mode>().unwrap(), Mode::Recording);
        assert_eq!("replaying".parse::<Mode>().unwrap(), Mode::Replaying);
        assert!(matches!(
            "rewinding".parse::<Mode>(),
            Err(VcrError::UnknownMode(_))
        ));
    }

    #[test]
    fn test_version_bucket_path() {
        assert_eq!(Version::Ga.bucket_path(), "");
        assert_eq!(Version::Beta.bucket_path(), "beta/");
    }

    #[test]
    fn test_unknown_version_fails_fast() {
        assert!(matches!(
            "alpha".parse::<Version>(),
            Err(VcrError::UnknownVersion(v)) if v == "alpha"
        ));
        assert!(matches!("".parse::<Version>(), Err(VcrError::UnknownVersion(_))));
    }

    #[test]
    fn test_version_module_paths_differ() {
        assert!(Version::Beta.module_path().ends_with("-beta"));
        assert!(!Version::Ga.module_path().ends_with("-beta"));
    }
}
