//! VCR - record/replay acceptance-test orchestrator CLI
//!
//! ## Commands
//!
//! - `run`: run acceptance tests for one provider in replaying or recording mode
//! - `collect`: classify an existing test log
//! - `upload-cassettes`: publish fixtures recorded by an earlier run

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn, Level};

use vcr_core::{
    collect_result, forwarded_env, ExecRunner, Mode, ProcessRunner, RunOptions, RunReport, Tester,
    TesterConfig, UploadLogsOptions, Version,
};

#[derive(Parser)]
#[command(name = "vcr")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run provider acceptance tests against recorded HTTP fixtures", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run acceptance tests and print a JSON report
    Run {
        /// replaying or recording
        #[arg(long, default_value = "replaying")]
        mode: Mode,

        /// Provider version: ga or beta
        #[arg(long, default_value = "ga")]
        provider: Version,

        /// Checkout of the provider repository
        #[arg(long)]
        repo: PathBuf,

        /// Package to test (repeatable; default: every package)
        #[arg(long = "test-dir")]
        test_dirs: Vec<String>,

        /// Test name to run (repeatable; default: every acceptance test)
        #[arg(long = "test")]
        tests: Vec<String>,

        /// Run one `go test` per (package, test) pair
        #[arg(long)]
        parallel: bool,

        /// Fetch fixtures before running (default: replay local fixtures)
        #[arg(long)]
        fetch: bool,

        /// Base branch whose fixture track is layered over main
        #[arg(long, default_value = "main", env = "BASE_BRANCH")]
        base_branch: String,

        /// Head ref for fixture and log tracks
        #[arg(long, env = "HEAD_REF")]
        head: Option<String>,

        /// Upload logs (and recorded fixtures) after the run
        #[arg(long)]
        upload: bool,

        /// Build identifier used in the log bucket layout
        #[arg(long, env = "BUILD_ID")]
        build_id: Option<String>,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Classify a verbose `go test` log and print the result as JSON
    Collect {
        /// Log file to read
        log_file: PathBuf,
    },

    /// Upload fixtures recorded into the local cassette directory
    UploadCassettes {
        /// Provider version: ga or beta
        #[arg(long, default_value = "ga")]
        provider: Version,

        /// Head ref to publish under
        #[arg(long, env = "HEAD_REF")]
        head: String,

        #[command(flatten)]
        config: ConfigArgs,
    },
}

/// Tester settings. Flags override the optional JSON file.
#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// JSON file with tester settings
    #[arg(long = "config", env = "VCR_CONFIG")]
    file: Option<PathBuf>,

    #[arg(long, env = "VCR_CASSETTE_BUCKET")]
    cassette_bucket: Option<String>,

    #[arg(long, env = "VCR_LOG_BUCKET")]
    log_bucket: Option<String>,

    /// `-parallel` for aggregated runs
    #[arg(long, env = "VCR_ACC_TEST_PARALLELISM")]
    acc_test_parallelism: Option<usize>,

    /// Concurrent jobs for --parallel runs
    #[arg(long, env = "VCR_PARALLEL_JOBS")]
    parallel_jobs: Option<usize>,

    #[arg(long, env = "VCR_TEST_TIMEOUT")]
    test_timeout: Option<String>,

    #[arg(long, env = "VCR_MAJOR_RELEASE_BRANCH")]
    major_release_branch: Option<String>,

    /// Kill child processes after this many seconds (0 = never)
    #[arg(long, env = "VCR_COMMAND_TIMEOUT_SECS")]
    command_timeout_secs: Option<u64>,
}

impl ConfigArgs {
    fn load(&self) -> Result<TesterConfig> {
        let mut config = match &self.file {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => TesterConfig::default(),
        };
        if let Some(v) = &self.cassette_bucket {
            config.cassette_bucket = v.clone();
        }
        if let Some(v) = &self.log_bucket {
            config.log_bucket = v.clone();
        }
        if let Some(v) = self.acc_test_parallelism {
            config.acc_test_parallelism = v;
        }
        if let Some(v) = self.parallel_jobs {
            config.parallel_jobs = v;
        }
        if let Some(v) = &self.test_timeout {
            config.test_timeout = v.clone();
        }
        if let Some(v) = &self.major_release_branch {
            config.major_release_branch = Some(v.clone());
        }
        if let Some(v) = self.command_timeout_secs {
            config.command_timeout_secs = v;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    vcr_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            mode,
            provider,
            repo,
            test_dirs,
            tests,
            parallel,
            fetch,
            base_branch,
            head,
            upload,
            build_id,
            config,
        } => {
            let opts = RunOptions::new(mode, provider)
                .with_test_dirs(test_dirs)
                .with_tests(tests);
            let transfer = Transfer {
                fetch,
                base_branch,
                head,
                upload,
                build_id,
            };
            cmd_run(opts, parallel, &repo, transfer, config.load()?).await
        }
        Commands::Collect { log_file } => Ok(exit_code(cmd_collect(&log_file)?)),
        Commands::UploadCassettes {
            provider,
            head,
            config,
        } => cmd_upload_cassettes(provider, &head, config.load()?).await,
    }
}

struct Transfer {
    fetch: bool,
    base_branch: String,
    head: Option<String>,
    upload: bool,
    build_id: Option<String>,
}

async fn new_tester(config: TesterConfig) -> Result<Tester> {
    let rnr: Arc<dyn ExecRunner> = Arc::new(
        ProcessRunner::from_current_dir(config.command_timeout_secs)
            .context("Failed to resolve working directory")?,
    );
    Tester::new(forwarded_env(), config, rnr)
        .await
        .context("Failed to set up tester")
}

async fn cmd_run(
    opts: RunOptions,
    parallel: bool,
    repo: &Path,
    transfer: Transfer,
    config: TesterConfig,
) -> Result<ExitCode> {
    let (mode, version) = (opts.mode, opts.version);
    let mut tester = new_tester(config).await?;
    tester.set_repo_path(version, repo);

    if transfer.fetch {
        let path = tester
            .fetch_cassettes(version, &transfer.base_branch, transfer.head.as_deref())
            .await
            .context("Failed to prepare fixtures")?;
        info!(path = %path.display(), "fixtures ready");
    } else if mode == Mode::Replaying {
        let path = tester
            .adopt_cassettes(version)
            .await
            .context("Failed to prepare fixtures")?;
        info!(path = %path.display(), "replaying from local fixtures");
    }

    let started_at = Utc::now();
    let start = Instant::now();
    let outcome = if parallel {
        tester.run_parallel(opts).await
    } else {
        tester.run(opts).await
    };
    let duration_ms = start.elapsed().as_millis() as u64;

    let report = match outcome {
        Ok(outcome) => RunReport {
            mode,
            version,
            parallel,
            started_at,
            duration_ms,
            error: outcome.exec_error.as_ref().map(ToString::to_string),
            result: outcome.result,
        },
        Err(e) => {
            // Nothing to upload; still remove the key before bailing.
            tester.cleanup().await.ok();
            return Err(e).context("Test run failed");
        }
    };

    if transfer.upload {
        let upload_opts = UploadLogsOptions {
            head: transfer.head.clone(),
            build_id: transfer.build_id,
            parallel,
            ..UploadLogsOptions::new(mode, version)
        };
        tester
            .upload_logs(&upload_opts)
            .await
            .context("Failed to upload logs")?;
        match (mode, transfer.head.as_deref()) {
            (Mode::Recording, Some(head)) => tester
                .upload_cassettes(head, version)
                .await
                .context("Failed to upload cassettes")?,
            (Mode::Recording, None) => warn!("no head ref given; recorded fixtures not uploaded"),
            (Mode::Replaying, _) => {}
        }
    }

    tester.cleanup().await.context("Failed to remove credentials")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(exit_code(report.succeeded()))
}

/// Print the classified log; returns whether it was clean.
fn cmd_collect(log_file: &Path) -> Result<bool> {
    let output = std::fs::read_to_string(log_file)
        .with_context(|| format!("Failed to read {}", log_file.display()))?;
    let result = collect_result(&output);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.is_clean())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn cmd_upload_cassettes(version: Version, head: &str, config: TesterConfig) -> Result<ExitCode> {
    let mut tester = new_tester(config).await?;
    let path = tester.adopt_cassettes(version).await?;
    info!(path = %path.display(), head, "uploading cassettes");
    tester
        .upload_cassettes(head, version)
        .await
        .context("Failed to upload cassettes")?;
    tester.cleanup().await?;
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_repeated_filters() {
        let cli = Cli::try_parse_from([
            "vcr",
            "run",
            "--mode",
            "RECORDING",
            "--provider",
            "beta",
            "--repo",
            "/src/tpgb",
            "--test-dir",
            "./a",
            "--test-dir",
            "./b",
            "--test",
            "TestAccFoo",
            "--parallel",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                mode,
                provider,
                test_dirs,
                tests,
                parallel,
                ..
            } => {
                assert_eq!(mode, Mode::Recording);
                assert_eq!(provider, Version::Beta);
                assert_eq!(test_dirs, vec!["./a", "./b"]);
                assert_eq!(tests, vec!["TestAccFoo"]);
                assert!(parallel);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_version() {
        assert!(Cli::try_parse_from(["vcr", "run", "--provider", "alpha", "--repo", "."]).is_err());
    }

    #[test]
    fn test_config_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("vcr.json");
        std::fs::write(&file, r#"{"parallel_jobs": 4, "log_bucket": "from-file"}"#).unwrap();

        let args = ConfigArgs {
            file: Some(file),
            log_bucket: Some("from-flag".to_string()),
            ..ConfigArgs::default()
        };
        let config = args.load().unwrap();
        assert_eq!(config.parallel_jobs, 4);
        assert_eq!(config.log_bucket, "from-flag");
        assert_eq!(config.acc_test_parallelism, 32);
    }

    #[test]
    fn test_collect_reports_cleanliness() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("replaying_test.log");
        std::fs::write(&log, "--- PASS: TestAccFoo (1.00s)\n").unwrap();
        assert!(cmd_collect(&log).unwrap());

        std::fs::write(&log, "--- FAIL: TestAccFoo (1.00s)\n").unwrap();
        assert!(!cmd_collect(&log).unwrap());
    }
}
