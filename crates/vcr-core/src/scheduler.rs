//! Test-run scheduling.
//!
//! [`Tester`] owns the artifact path registry and drives `go test` either as
//! one aggregated invocation ([`Tester::run`]) or as a bounded fan-out with one
//! invocation per (directory, test) pair ([`Tester::run_parallel`]).

use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{info, warn, Instrument};

use crate::collector::collect_result;
use crate::config::TesterConfig;
use crate::env::{redacted_env, TestEnv};
use crate::error::{ExecError, Result, VcrError};
use crate::exec::ExecRunner;
use crate::model::{Mode, Version};
use crate::obs;
use crate::paths::ArtifactPaths;
use crate::result::RunOutcome;
use crate::transfer::{ArtifactSync, Notifier, UploadLogsOptions};

/// Name of the provisioned service-account key, relative to the base dir.
pub const SA_KEY_FILE: &str = "sa_key.json";

/// Run pattern used when no test names are requested.
const DEFAULT_RUN_PATTERN: &str = "TestAcc";

/// Inputs for one scheduling call.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: Mode,
    pub version: Version,
    /// Packages to test. Empty means every package in the repo.
    pub test_dirs: Vec<String>,
    /// Test names. Empty means every acceptance test.
    pub tests: Vec<String>,
}

impl RunOptions {
    pub fn new(mode: Mode, version: Version) -> Self {
        Self {
            mode,
            version,
            test_dirs: Vec::new(),
            tests: Vec::new(),
        }
    }

    pub fn with_test_dirs(mut self, dirs: Vec<String>) -> Self {
        self.test_dirs = dirs;
        self
    }

    pub fn with_tests(mut self, tests: Vec<String>) -> Self {
        self.tests = tests;
        self
    }
}

/// Record/replay test orchestrator for one CI build.
pub struct Tester {
    env: BTreeMap<String, String>,
    rnr: Arc<dyn ExecRunner>,
    config: TesterConfig,
    base_dir: PathBuf,
    sa_key_path: Option<PathBuf>,
    paths: ArtifactPaths,
    repo_paths: HashMap<Version, PathBuf>,
    sync: ArtifactSync,
}

impl Tester {
    /// Create a tester rooted at the runner's current directory.
    ///
    /// When `env` carries `SA_KEY`, the key is written to [`SA_KEY_FILE`] so
    /// tests can use it as application default credentials.
    pub async fn new(
        env: BTreeMap<String, String>,
        config: TesterConfig,
        rnr: Arc<dyn ExecRunner>,
    ) -> Result<Self> {
        let base_dir = rnr.cwd();
        let sa_key_path = match env.get("SA_KEY") {
            Some(key) => {
                let path = base_dir.join(SA_KEY_FILE);
                rnr.write_file(&path, key)
                    .await
                    .map_err(VcrError::Credentials)?;
                Some(path)
            }
            None => None,
        };
        let paths = ArtifactPaths::new(Arc::clone(&rnr), &base_dir);
        let sync = ArtifactSync::new(Arc::clone(&rnr), &config);
        Ok(Self {
            env,
            rnr,
            config,
            base_dir,
            sa_key_path,
            paths,
            repo_paths: HashMap::with_capacity(Version::ALL.len()),
            sync,
        })
    }

    /// Route best-effort transfer failures to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.sync = self.sync.with_notifier(notifier);
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn config(&self) -> &TesterConfig {
        &self.config
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// Register the checkout of the provider for `version`.
    pub fn set_repo_path(&mut self, version: Version, repo_path: impl Into<PathBuf>) {
        self.repo_paths.insert(version, repo_path.into());
    }

    /// Local fixture directory for `version`, once fetched or reset.
    pub fn cassette_path(&self, version: Version) -> Option<&Path> {
        self.paths.registered_fixture_dir(version)
    }

    /// Local provider log directory, once a run in `mode` has started.
    pub fn log_path(&self, mode: Mode, version: Version) -> Option<&Path> {
        self.paths.registered_log_dir(mode, version)
    }

    /// Register fixtures left on disk by an earlier process, to replay from
    /// or upload without fetching. Creates an empty fixture directory if none
    /// exists.
    pub async fn adopt_cassettes(&mut self, version: Version) -> Result<PathBuf> {
        self.paths.fixture_dir(version).await
    }

    /// Fetch fixtures for `version` unless already fetched.
    pub async fn fetch_cassettes(
        &mut self,
        version: Version,
        base_branch: &str,
        head: Option<&str>,
    ) -> Result<PathBuf> {
        self.sync
            .fetch_cassettes(&mut self.paths, version, base_branch, head)
            .await
    }

    pub async fn upload_logs(&self, opts: &UploadLogsOptions) -> Result<()> {
        self.sync.upload_logs(&self.paths, opts).await
    }

    pub async fn upload_cassettes(&self, head: &str, version: Version) -> Result<()> {
        self.sync.upload_cassettes(&self.paths, head, version).await
    }

    /// Delete the provisioned service-account key.
    pub async fn cleanup(&self) -> Result<()> {
        if let Some(path) = &self.sa_key_path {
            self.rnr.remove_all(path).await?;
        }
        Ok(())
    }

    /// Run every requested test in a single `go test` invocation.
    ///
    /// The combined output, or an error stand-in when the child failed, is
    /// appended to the cumulative log for the mode.
    pub async fn run(&mut self, opt: RunOptions) -> Result<RunOutcome> {
        let span = obs::run_span(opt.mode, opt.version);
        self.run_aggregated(opt).instrument(span).await
    }

    /// Run each (directory, test) pair as its own `go test` invocation, at
    /// most `parallel_jobs` at a time.
    pub async fn run_parallel(&mut self, opt: RunOptions) -> Result<RunOutcome> {
        let span = obs::run_span(opt.mode, opt.version);
        self.run_fan_out(opt).instrument(span).await
    }

    async fn run_aggregated(&mut self, opt: RunOptions) -> Result<RunOutcome> {
        let start = Instant::now();
        let log_dir = self.paths.log_dir(opt.mode, opt.version).await?;
        let repo_path = self.repo_path(opt.version)?;

        self.rnr.push_dir(&repo_path)?;
        let executed = self.execute_aggregated(&opt, &log_dir).await;
        self.rnr.pop_dir()?;
        let (output, exec_error) = executed?;

        let log_file = self.paths.cumulative_log(opt.mode);
        append_log(self.rnr.as_ref(), &log_file, &output)
            .await
            .map_err(|source| VcrError::WriteLog {
                path: log_file.clone(),
                source,
            })?;

        let result = collect_result(&output);
        obs::emit_run_finished(
            opt.mode,
            opt.version,
            &result,
            exec_error.is_some(),
            start.elapsed().as_millis() as u64,
        );
        Ok(RunOutcome { result, exec_error })
    }

    async fn execute_aggregated(
        &mut self,
        opt: &RunOptions,
        log_dir: &Path,
    ) -> Result<(String, Option<ExecError>)> {
        let test_dirs = self.resolve_test_dirs(opt).await?;
        let fixture_dir = self.fixture_dir_for(opt.mode, opt.version).await?;
        obs::emit_run_started(opt.mode, opt.version, test_dirs.len(), opt.tests.len(), false);

        let pattern = run_pattern(&opt.tests);
        let mut args = vec!["test".to_string()];
        args.extend(test_dirs.iter().cloned());
        args.extend(go_test_flags(
            self.config.acc_test_parallelism,
            &pattern,
            &self.config.test_timeout,
            opt.version,
        ));

        let env = TestEnv {
            mode: opt.mode,
            fixture_dir: &fixture_dir,
            log_dir,
            parallelism: self.config.acc_test_parallelism,
            test_dirs: &test_dirs,
            credentials_file: self.sa_key_path.as_deref(),
        }
        .build(&self.env);
        obs::emit_command("go", &args, &redacted_env(&env));

        Ok(match self.rnr.run("go", &args, &env).await {
            Ok(output) => (output, None),
            Err(err) => (error_stand_in(opt.mode, &err), Some(err)),
        })
    }

    async fn run_fan_out(&mut self, opt: RunOptions) -> Result<RunOutcome> {
        if opt.tests.is_empty() {
            warn!(
                mode = %opt.mode,
                version = %opt.version,
                "parallel run requested without test names; nothing scheduled"
            );
            return Ok(RunOutcome::default());
        }

        let start = Instant::now();
        let log_dir = self.paths.log_dir(opt.mode, opt.version).await?;
        let build_dir = self.paths.build_log_dir(opt.mode);
        self.rnr
            .mkdir(&build_dir)
            .await
            .map_err(|source| VcrError::CreateDir {
                path: build_dir.clone(),
                source,
            })?;
        let repo_path = self.repo_path(opt.version)?;

        self.rnr.push_dir(&repo_path)?;
        let executed = self.execute_fan_out(&opt, &log_dir).await;
        self.rnr.pop_dir()?;
        let (output, exec_error) = executed?;

        let log_file = self.paths.cumulative_log(opt.mode);
        self.rnr
            .write_file(&log_file, &output)
            .await
            .map_err(|source| VcrError::WriteLog {
                path: log_file.clone(),
                source,
            })?;

        let result = collect_result(&output);
        obs::emit_run_finished(
            opt.mode,
            opt.version,
            &result,
            exec_error.is_some(),
            start.elapsed().as_millis() as u64,
        );
        Ok(RunOutcome { result, exec_error })
    }

    async fn execute_fan_out(
        &mut self,
        opt: &RunOptions,
        log_dir: &Path,
    ) -> Result<(String, Option<ExecError>)> {
        let test_dirs = self.resolve_test_dirs(opt).await?;
        let fixture_dir = self.fixture_dir_for(opt.mode, opt.version).await?;
        obs::emit_run_started(opt.mode, opt.version, test_dirs.len(), opt.tests.len(), true);

        let total = test_dirs.len() * opt.tests.len();
        let running = Arc::new(Semaphore::new(self.config.parallel_jobs.max(1)));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (err_tx, mut err_rx) = mpsc::unbounded_channel::<ExecError>();
        let ctx = Arc::new(JobContext {
            rnr: Arc::clone(&self.rnr),
            mode: opt.mode,
            version: opt.version,
            fixture_dir,
            log_dir: log_dir.to_path_buf(),
            credentials_file: self.sa_key_path.clone(),
            overrides: self.env.clone(),
            timeout: self.config.test_timeout.clone(),
            log_lock: Mutex::new(()),
        });

        let mut handles = Vec::with_capacity(total);
        for test_dir in &test_dirs {
            for test in &opt.tests {
                // A slot must be free before the job is launched.
                let permit = Arc::clone(&running)
                    .acquire_owned()
                    .await
                    .map_err(|e| VcrError::Scheduler(e.to_string()))?;
                let job = Job {
                    test_dir: test_dir.clone(),
                    test: test.clone(),
                    job_log: self.paths.job_log(opt.mode, test),
                };
                let ctx = Arc::clone(&ctx);
                let out_tx = out_tx.clone();
                let err_tx = err_tx.clone();
                handles.push(tokio::spawn(
                    async move {
                        let _permit = permit;
                        run_job(&ctx, &job, &out_tx, &err_tx).await;
                    }
                    .in_current_span(),
                ));
            }
        }

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                warn!(error = %e, "test job aborted");
                let _ = err_tx.send(ExecError::Aborted(e.to_string()));
            }
        }
        drop(out_tx);
        drop(err_tx);

        let mut output = String::new();
        while let Some(chunk) = out_rx.recv().await {
            output.push_str(&chunk);
        }
        let first_error = err_rx.recv().await;
        info!(jobs = total, errored = first_error.is_some(), "all test jobs finished");
        Ok((output, first_error))
    }

    fn repo_path(&self, version: Version) -> Result<PathBuf> {
        self.repo_paths
            .get(&version)
            .cloned()
            .ok_or(VcrError::RepoNotCloned(version))
    }

    /// Fixture directory for a run. Replaying needs fetched (or adopted)
    /// fixtures; recording always starts from empty.
    async fn fixture_dir_for(&mut self, mode: Mode, version: Version) -> Result<PathBuf> {
        match mode {
            Mode::Replaying => self
                .paths
                .registered_fixture_dir(version)
                .map(Path::to_path_buf)
                .ok_or(VcrError::CassettesNotFetched(version)),
            Mode::Recording => self.paths.reset_fixture_dir(version).await,
        }
    }

    /// Requested directories, or every package in the repo when none were
    /// given. Must be called from inside the repo directory.
    async fn resolve_test_dirs(&self, opt: &RunOptions) -> Result<Vec<String>> {
        if !opt.test_dirs.is_empty() {
            return Ok(opt.test_dirs.clone());
        }
        let listing = self
            .rnr
            .run("go", &["list".to_string(), "./...".to_string()], &BTreeMap::new())
            .await
            .map_err(VcrError::Discovery)?;
        Ok(filter_packages(&listing, opt.version))
    }
}

/// Packages from `go list` output, minus the provider's non-test utilities.
pub fn filter_packages(listing: &str, version: Version) -> Vec<String> {
    let excluded = format!("{}/scripts", version.module_path());
    listing
        .lines()
        .map(str::trim)
        .filter(|pkg| !pkg.is_empty() && !pkg.contains(&excluded))
        .map(String::from)
        .collect()
}

fn go_test_flags(parallelism: usize, run: &str, timeout: &str, version: Version) -> Vec<String> {
    vec![
        "-parallel".to_string(),
        parallelism.to_string(),
        "-v".to_string(),
        format!("-run={}", run),
        "-timeout".to_string(),
        timeout.to_string(),
        format!(
            "-ldflags=-X={}/version.ProviderVersion=acc",
            version.module_path()
        ),
        "-vet=off".to_string(),
    ]
}

/// `-run` value for an aggregated invocation. Names are anchored so a
/// requested test never drags in others sharing its prefix.
fn run_pattern(tests: &[String]) -> String {
    if tests.is_empty() {
        DEFAULT_RUN_PATTERN.to_string()
    } else {
        format!("^({})$", tests.join("|"))
    }
}

fn error_stand_in(mode: Mode, err: &ExecError) -> String {
    format!("Error {} tests:\n{}", mode.lower(), err)
}

/// Append `output` to `path`, separated from earlier content by a newline.
///
/// Only a missing log starts fresh; any other read failure is returned so an
/// existing log is never clobbered.
async fn append_log(rnr: &dyn ExecRunner, path: &Path, output: &str) -> std::result::Result<(), ExecError> {
    let mut contents = match rnr.read_file(path).await {
        Ok(contents) => contents,
        Err(ExecError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            String::new()
        }
        Err(err) => return Err(err),
    };
    if !contents.is_empty() {
        contents.push('\n');
    }
    contents.push_str(output);
    rnr.write_file(path, &contents).await
}

/// State shared by every job of one fan-out run.
struct JobContext {
    rnr: Arc<dyn ExecRunner>,
    mode: Mode,
    version: Version,
    fixture_dir: PathBuf,
    log_dir: PathBuf,
    credentials_file: Option<PathBuf>,
    overrides: BTreeMap<String, String>,
    timeout: String,
    /// Serializes per-job log appends; two directories may share a test name.
    log_lock: Mutex<()>,
}

struct Job {
    test_dir: String,
    test: String,
    job_log: PathBuf,
}

async fn run_job(
    ctx: &JobContext,
    job: &Job,
    out_tx: &mpsc::UnboundedSender<String>,
    err_tx: &mpsc::UnboundedSender<ExecError>,
) {
    let start = Instant::now();
    let mut args = vec!["test".to_string(), job.test_dir.clone()];
    args.extend(go_test_flags(
        1,
        &format!("{}$", job.test),
        &ctx.timeout,
        ctx.version,
    ));
    let test_dirs = [job.test_dir.clone()];
    let env = TestEnv {
        mode: ctx.mode,
        fixture_dir: &ctx.fixture_dir,
        log_dir: &ctx.log_dir,
        parallelism: 1,
        test_dirs: &test_dirs,
        credentials_file: ctx.credentials_file.as_deref(),
    }
    .build(&ctx.overrides);

    let (output, failed) = match ctx.rnr.run("go", &args, &env).await {
        Ok(output) => (output, false),
        Err(err) => {
            let stand_in = error_stand_in(ctx.mode, &err);
            let _ = err_tx.send(err);
            (stand_in, true)
        }
    };
    let _ = out_tx.send(output.clone());

    {
        let _guard = ctx.log_lock.lock().await;
        if let Err(err) = append_log(ctx.rnr.as_ref(), &job.job_log, &output).await {
            warn!(test = %job.test, error = %err, "error writing job log");
            let _ = err_tx.send(err);
        }
    }

    obs::emit_job_finished(
        &job.test,
        &job.test_dir,
        !failed,
        start.elapsed().as_millis() as u64,
    );
}
