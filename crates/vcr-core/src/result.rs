//! Outcome report types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExecError;
use crate::model::{Mode, Version};

/// Structured classification of one or more test-runner outputs.
///
/// Every list is sorted. Test and subtest lists are deduplicated; panics keep
/// one entry per line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub passed_tests: Vec<String>,
    pub skipped_tests: Vec<String>,
    pub failed_tests: Vec<String>,
    pub passed_subtests: Vec<String>,
    pub skipped_subtests: Vec<String>,
    pub failed_subtests: Vec<String>,
    pub panics: Vec<String>,
}

impl TestResult {
    /// True when no test failed and nothing panicked.
    pub fn is_clean(&self) -> bool {
        self.failed_tests.is_empty() && self.failed_subtests.is_empty() && self.panics.is_empty()
    }

    /// Tests reported both passing and failing in the same output.
    pub fn flaky_tests(&self) -> Vec<String> {
        self.passed_tests
            .iter()
            .filter(|t| self.failed_tests.binary_search(t).is_ok())
            .cloned()
            .collect()
    }
}

/// What a scheduling call produced.
///
/// `exec_error` is set when a child process failed; the result is still
/// populated from whatever output (or error stand-in) was captured.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub result: TestResult,
    pub exec_error: Option<ExecError>,
}

impl RunOutcome {
    /// Collapse into a `Result`, surfacing the execution error if any.
    pub fn into_result(self) -> Result<TestResult, ExecError> {
        match self.exec_error {
            Some(err) => Err(err),
            None => Ok(self.result),
        }
    }
}

/// Serializable envelope written by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub mode: Mode,
    pub version: Version,
    pub parallel: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub result: TestResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.result.is_clean()
    }
}
