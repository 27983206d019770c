//! VCR Core: record/replay acceptance-test orchestration
//!
//! Drives the provider's acceptance tests against recorded HTTP fixtures
//! ("cassettes") in replaying mode, or against live infrastructure in
//! recording mode, and reports which tests passed, failed, or were skipped.
//!
//! ## Key Components
//!
//! - `Tester`: schedules `go test` runs, aggregated or fanned out
//! - `collect_result`: turns verbose test output into a `TestResult`
//! - `ArtifactSync`: fetches fixtures and uploads logs and fixtures
//! - `ExecRunner`: the single seam to the operating system

pub mod collector;
pub mod config;
pub mod env;
mod error;
pub mod exec;
pub mod fakes;
pub mod model;
pub mod obs;
pub mod paths;
pub mod result;
pub mod scheduler;
pub mod telemetry;
pub mod transfer;

pub use collector::collect_result;
pub use config::TesterConfig;
pub use env::{forwarded_env, redacted_env};
pub use error::{ExecError, Result, VcrError};
pub use exec::{DirStack, ExecRunner, ProcessRunner, WalkEntry};
pub use model::{Mode, Version};
pub use paths::ArtifactPaths;
pub use result::{RunOutcome, RunReport, TestResult};
pub use scheduler::{filter_packages, RunOptions, Tester, SA_KEY_FILE};
pub use telemetry::init_tracing;
pub use transfer::{ArtifactSync, Notifier, TracingNotifier, UploadLogsOptions};
