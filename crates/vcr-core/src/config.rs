//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Tunables for a [`crate::Tester`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TesterConfig {
    /// Bucket holding recorded fixtures.
    pub cassette_bucket: String,

    /// Bucket receiving run logs.
    pub log_bucket: String,

    /// `-parallel` passed to an aggregated `go test` invocation.
    pub acc_test_parallelism: usize,

    /// Concurrent jobs in a fan-out run.
    pub parallel_jobs: usize,

    /// `-timeout` passed to `go test`.
    pub test_timeout: String,

    /// Base branch whose own fixtures replace the main track entirely.
    pub major_release_branch: Option<String>,

    /// Kill a child process after this many seconds (0 = never).
    pub command_timeout_secs: u64,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            cassette_bucket: "ci-vcr-cassettes".to_string(),
            log_bucket: "ci-vcr-logs".to_string(),
            acc_test_parallelism: 32,
            parallel_jobs: 16,
            test_timeout: "240m".to_string(),
            major_release_branch: None,
            command_timeout_secs: 0,
        }
    }
}
