//! Structured lifecycle events for test runs.
//!
//! This module provides:
//! - A run-scoped span carrying mode and version, via [`run_span`]
//! - Emission functions for run start, each launched command, each fan-out
//!   job, run completion and swallowed transfer failures
//!
//! Every event carries an `event` field (`run.started`, `job.finished`, ...)
//! so log pipelines can filter on it regardless of the message text. Pass
//! `--json` to the `vcr` binary for machine-readable lines.

use tracing::{info, warn};

use crate::model::{Mode, Version};
use crate::result::TestResult;

/// Span that tags every event inside a run with its mode and version.
///
/// Runs are async and fan out across tasks, so the span is attached with
/// [`tracing::Instrument`] instead of being entered; an entered guard held
/// across an `.await` would make the run future `!Send`.
///
/// # Example
///
/// ```ignore
/// use tracing::Instrument;
///
/// let span = run_span(Mode::Replaying, Version::Ga);
/// tester_run().instrument(span).await;
/// // every event inside carries mode=replaying version=ga
/// ```
pub fn run_span(mode: Mode, version: Version) -> tracing::Span {
    tracing::info_span!("vcr.run", mode = %mode, version = %version)
}

/// Emit event: packages and tests resolved, about to launch.
///
/// # Example
///
/// ```ignore
/// emit_run_started(Mode::Recording, Version::Beta, 12, 0, false);
/// // logs: event=run.started mode=recording version=beta test_dirs=12 tests=0 parallel=false
/// ```
pub fn emit_run_started(mode: Mode, version: Version, test_dirs: usize, tests: usize, parallel: bool) {
    info!(
        event = "run.started",
        mode = %mode,
        version = %version,
        test_dirs = test_dirs,
        tests = tests,
        parallel = parallel,
    );
}

/// Emit event: a command is about to run.
///
/// `printed_env` must already be redacted; see [`crate::env::redacted_env`].
pub fn emit_command(command: &str, args: &[String], printed_env: &str) {
    info!(
        event = "run.command",
        "Running {}:\n\tenv:\n{}\n\targs:\n{}",
        command,
        printed_env,
        args.join(" ")
    );
}

/// Emit event: one fan-out job exited.
pub fn emit_job_finished(test: &str, test_dir: &str, success: bool, duration_ms: u64) {
    info!(
        event = "job.finished",
        test = %test,
        test_dir = %test_dir,
        success = success,
        duration_ms = duration_ms,
    );
}

/// Emit event: run finished, with result counts.
///
/// `errored` reports a failed child process; failing tests alone show up in
/// `failed`.
pub fn emit_run_finished(mode: Mode, version: Version, result: &TestResult, errored: bool, duration_ms: u64) {
    info!(
        event = "run.finished",
        mode = %mode,
        version = %version,
        passed = result.passed_tests.len(),
        failed = result.failed_tests.len(),
        skipped = result.skipped_tests.len(),
        panics = result.panics.len(),
        errored = errored,
        duration_ms = duration_ms,
    );
}

/// Emit event: a best-effort transfer failed and was skipped (warning level).
pub fn emit_transfer_failed(operation: &str, error: &dyn std::fmt::Display) {
    warn!(event = "transfer.failed", operation = %operation, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Instrument;

    #[test]
    fn test_events_emit_without_subscriber() {
        let result = TestResult {
            passed_tests: vec!["TestAccFoo".to_string()],
            ..Default::default()
        };
        emit_run_started(Mode::Recording, Version::Beta, 2, 3, true);
        emit_command("go", &["test".to_string()], "TF_ACC=1\n");
        emit_job_finished("TestAccFoo", "./a", true, 10);
        emit_run_finished(Mode::Recording, Version::Beta, &result, false, 10);
        emit_transfer_failed("upload logs", &"403");
    }

    #[tokio::test]
    async fn test_run_span_instruments_future() {
        let value = async { 7 }
            .instrument(run_span(Mode::Replaying, Version::Ga))
            .await;
        assert_eq!(value, 7);
    }
}
