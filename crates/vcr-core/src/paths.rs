//! Artifact path registry.
//!
//! Layout under the orchestrator's base directory:
//!
//! ```text
//! cassettes/<version>/                       fixtures
//! testlogs/<mode>/<version>/                 provider debug logs
//! testlogs/<mode>_test.log                   cumulative runner output
//! testlogs/<mode>_build/<test>_<mode>_test.log   per-job output
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, VcrError};
use crate::exec::ExecRunner;
use crate::model::{Mode, Version};

/// Composite key for per-mode, per-version log directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogKey {
    pub mode: Mode,
    pub version: Version,
}

impl LogKey {
    pub fn new(mode: Mode, version: Version) -> Self {
        Self { mode, version }
    }
}

/// Memoized fixture and log directories for one orchestrator instance.
pub struct ArtifactPaths {
    rnr: Arc<dyn ExecRunner>,
    base_dir: PathBuf,
    fixture_dirs: HashMap<Version, PathBuf>,
    log_dirs: HashMap<LogKey, PathBuf>,
}

impl ArtifactPaths {
    pub fn new(rnr: Arc<dyn ExecRunner>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            rnr,
            base_dir: base_dir.into(),
            fixture_dirs: HashMap::with_capacity(Version::ALL.len()),
            log_dirs: HashMap::with_capacity(Version::ALL.len() * 2),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Fixture directory for `version`, created on first call.
    pub async fn fixture_dir(&mut self, version: Version) -> Result<PathBuf> {
        if let Some(path) = self.fixture_dirs.get(&version) {
            return Ok(path.clone());
        }
        let path = self.fixture_root(version);
        self.create(&path).await?;
        self.fixture_dirs.insert(version, path.clone());
        Ok(path)
    }

    /// Log directory for `(mode, version)`, created on first call.
    pub async fn log_dir(&mut self, mode: Mode, version: Version) -> Result<PathBuf> {
        let key = LogKey::new(mode, version);
        if let Some(path) = self.log_dirs.get(&key) {
            return Ok(path.clone());
        }
        let path = self
            .base_dir
            .join("testlogs")
            .join(mode.lower())
            .join(version.as_str());
        self.create(&path).await?;
        debug!(mode = %mode, version = %version, path = ?path, "registered log dir");
        self.log_dirs.insert(key, path.clone());
        Ok(path)
    }

    /// Empty the fixture directory for `version` ahead of a recording run.
    ///
    /// Replaces any earlier registration, including fetched fixtures.
    pub async fn reset_fixture_dir(&mut self, version: Version) -> Result<PathBuf> {
        let path = self.fixture_root(version);
        self.rnr
            .remove_all(&path)
            .await
            .map_err(|source| VcrError::RemoveCassettes {
                path: path.clone(),
                source,
            })?;
        self.create(&path).await?;
        self.fixture_dirs.insert(version, path.clone());
        Ok(path)
    }

    /// Registered fixture directory, without creating one.
    pub fn registered_fixture_dir(&self, version: Version) -> Option<&Path> {
        self.fixture_dirs.get(&version).map(PathBuf::as_path)
    }

    /// Registered log directory, without creating one.
    pub fn registered_log_dir(&self, mode: Mode, version: Version) -> Option<&Path> {
        self.log_dirs
            .get(&LogKey::new(mode, version))
            .map(PathBuf::as_path)
    }

    /// Cumulative runner output for every run in `mode`.
    pub fn cumulative_log(&self, mode: Mode) -> PathBuf {
        self.base_dir
            .join("testlogs")
            .join(format!("{}_test.log", mode.lower()))
    }

    /// Directory holding one log per fan-out job.
    pub fn build_log_dir(&self, mode: Mode) -> PathBuf {
        self.base_dir
            .join("testlogs")
            .join(format!("{}_build", mode.lower()))
    }

    pub fn job_log(&self, mode: Mode, test: &str) -> PathBuf {
        self.build_log_dir(mode)
            .join(format!("{}_{}_test.log", test, mode.lower()))
    }

    fn fixture_root(&self, version: Version) -> PathBuf {
        self.base_dir.join("cassettes").join(version.as_str())
    }

    async fn create(&self, path: &Path) -> Result<()> {
        self.rnr
            .mkdir(path)
            .await
            .map_err(|source| VcrError::CreateDir {
                path: path.to_path_buf(),
                source,
            })
    }
}
