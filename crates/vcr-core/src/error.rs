//! Error taxonomy for the VCR test orchestrator.

use std::path::PathBuf;

use crate::model::{Mode, Version};

/// Failures raised by the process execution adapter.
///
/// A non-zero exit keeps whatever combined output the child produced so
/// callers can still log and classify it.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to launch {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with status {code}\nOutput:\n{output}")]
    NonZeroExit {
        command: String,
        code: i32,
        output: String,
    },

    #[error("{command} timed out after {secs} seconds")]
    Timeout { command: String, secs: u64 },

    #[error("test job aborted: {0}")]
    Aborted(String),

    #[error("directory stack is empty")]
    EmptyDirStack,

    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExecError {
    /// Output captured before the failure, if any.
    pub fn output(&self) -> &str {
        match self {
            ExecError::NonZeroExit { output, .. } => output,
            _ => "",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExecError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Orchestrator errors. These abort a run; test failures never do.
#[derive(Debug, thiserror::Error)]
pub enum VcrError {
    #[error("unknown provider version: {0}")]
    UnknownVersion(String),

    #[error("unknown mode: {0}")]
    UnknownMode(String),

    #[error("no repo cloned for version {0}")]
    RepoNotCloned(Version),

    #[error("no log path found for mode {mode} and version {version}")]
    LogPathMissing { mode: Mode, version: Version },

    #[error("no cassettes found for version {0}")]
    CassettesMissing(Version),

    #[error("cassettes not fetched for version {0}")]
    CassettesNotFetched(Version),

    #[error("error creating directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: ExecError,
    },

    #[error("error removing cassettes at {path:?}: {source}")]
    RemoveCassettes {
        path: PathBuf,
        #[source]
        source: ExecError,
    },

    #[error("error listing test packages: {0}")]
    Discovery(#[source] ExecError),

    #[error("error writing log {path:?}: {source}")]
    WriteLog {
        path: PathBuf,
        #[source]
        source: ExecError,
    },

    #[error("error writing service account key: {0}")]
    Credentials(#[source] ExecError),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("exec error: {0}")]
    Exec(#[from] ExecError),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, VcrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_zero_exit_keeps_output() {
        let err = ExecError::NonZeroExit {
            command: "go".to_string(),
            code: 1,
            output: "--- FAIL: TestAccFoo".to_string(),
        };
        assert_eq!(err.output(), "--- FAIL: TestAccFoo");
        let msg = err.to_string();
        assert!(msg.contains("exited with status 1"));
        assert!(msg.contains("--- FAIL: TestAccFoo"));
    }

    #[test]
    fn test_spawn_error_has_no_output() {
        let err = ExecError::Spawn {
            command: "go".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(err.output(), "");
        assert!(err.to_string().contains("failed to launch go"));
    }

    #[test]
    fn test_log_path_missing_display() {
        let err = VcrError::LogPathMissing {
            mode: Mode::Recording,
            version: Version::Beta,
        };
        let msg = err.to_string();
        assert!(msg.contains("recording"));
        assert!(msg.contains("beta"));
    }
}
