//! Fixture and log transfer against object storage.
//!
//! Every transfer shells out to `gsutil` through the [`ExecRunner`]. Transfer
//! failures never fail the build: they are handed to a [`Notifier`] and the
//! operation carries on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::TesterConfig;
use crate::error::{ExecError, Result, VcrError};
use crate::exec::{ExecRunner, WalkEntry};
use crate::model::{Mode, Version};
use crate::obs;
use crate::paths::ArtifactPaths;

/// Log file that is never dumped by the diagnostic printer.
const ALL_TESTS_LOG: &str = "all_tests.log";

/// Sink for best-effort side operations.
pub trait Notifier: Send + Sync {
    /// A transfer failed and was skipped.
    fn transfer_failed(&self, operation: &str, error: &ExecError);

    /// Diagnostic output, such as a local log dumped after a failed upload.
    fn diagnostic(&self, title: &str, body: &str);
}

/// Default notifier: everything goes to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn transfer_failed(&self, operation: &str, error: &ExecError) {
        obs::emit_transfer_failed(operation, error);
    }

    fn diagnostic(&self, title: &str, body: &str) {
        info!("======= {} =======\n{}", title, body);
    }
}

/// Where and what to upload after a run.
#[derive(Debug, Clone)]
pub struct UploadLogsOptions {
    pub mode: Mode,
    pub version: Version,
    pub head: Option<String>,
    pub build_id: Option<String>,
    /// Also upload the per-job logs of a fan-out run.
    pub parallel: bool,
    /// Upload under the `_after_recording` names.
    pub after_recording: bool,
}

impl UploadLogsOptions {
    pub fn new(mode: Mode, version: Version) -> Self {
        Self {
            mode,
            version,
            head: None,
            build_id: None,
            parallel: false,
            after_recording: false,
        }
    }
}

/// Fetches fixtures before a run and uploads artifacts after it.
pub struct ArtifactSync {
    rnr: Arc<dyn ExecRunner>,
    cassette_bucket: String,
    log_bucket: String,
    major_release_branch: Option<String>,
    notifier: Arc<dyn Notifier>,
}

impl ArtifactSync {
    pub fn new(rnr: Arc<dyn ExecRunner>, config: &TesterConfig) -> Self {
        Self {
            rnr,
            cassette_bucket: config.cassette_bucket.clone(),
            log_bucket: config.log_bucket.clone(),
            major_release_branch: config.major_release_branch.clone(),
            notifier: Arc::new(TracingNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Pull fixtures for `version` into its local fixture directory.
    ///
    /// Sources, later ones overwriting earlier files: the main track (unless
    /// `base_branch` is the major-release branch), the base branch's track
    /// (unless it is `main`), then the head ref's track. A no-op once
    /// fixtures for `version` are registered.
    pub async fn fetch_cassettes(
        &self,
        paths: &mut ArtifactPaths,
        version: Version,
        base_branch: &str,
        head: Option<&str>,
    ) -> Result<PathBuf> {
        if let Some(existing) = paths.registered_fixture_dir(version) {
            return Ok(existing.to_path_buf());
        }
        let cassette_path = paths.fixture_dir(version).await?;

        let prefix = format!("gs://{}/{}", self.cassette_bucket, version.bucket_path());
        let mut sources = Vec::with_capacity(3);
        if self.major_release_branch.as_deref() != Some(base_branch) {
            sources.push(format!("{}fixtures/*", prefix));
        }
        if base_branch != "main" {
            sources.push(format!("{}refs/branches/{}/fixtures/*", prefix, base_branch));
        }
        if let Some(head) = head.filter(|h| !h.is_empty()) {
            sources.push(format!("{}refs/heads/{}/fixtures/*", prefix, head));
        }

        for source in sources {
            let args = vec![
                "-m".to_string(),
                "-q".to_string(),
                "cp".to_string(),
                source,
                path_arg(&cassette_path),
            ];
            info!("Fetching cassettes:\n gsutil {}", args.join(" "));
            if let Err(e) = self.gsutil(&args).await {
                self.notifier.transfer_failed("fetch cassettes", &e);
            }
        }
        Ok(cassette_path)
    }

    /// Upload the cumulative log, optionally the per-job logs, and the
    /// provider log directory for `(mode, version)`.
    ///
    /// Fails only when no run in that mode and version has registered a log
    /// directory.
    pub async fn upload_logs(&self, paths: &ArtifactPaths, opts: &UploadLogsOptions) -> Result<()> {
        let log_dir = paths
            .registered_log_dir(opts.mode, opts.version)
            .ok_or(VcrError::LogPathMissing {
                mode: opts.mode,
                version: opts.version,
            })?;

        let bucket_path = self.log_bucket_path(opts);
        let mode = opts.mode.lower();
        let suffix = if opts.after_recording {
            "_after_recording"
        } else {
            ""
        };

        let mut args = text_upload_args(false);
        args.push(path_arg(&paths.cumulative_log(opts.mode)));
        args.push(format!("{}build-log/{}_test{}.log", bucket_path, mode, suffix));
        info!("Uploading build log:\n gsutil {}", args.join(" "));
        match self.gsutil(&args).await {
            Ok(out) => info!("gsutil output: {}", out),
            Err(e) => self.notifier.transfer_failed("upload build log", &e),
        }

        if opts.parallel {
            let mut args = text_upload_args(true);
            args.push(path_arg(&paths.build_log_dir(opts.mode).join("*")));
            args.push(format!("{}build-log/{}_build{}/", bucket_path, mode, suffix));
            info!("Uploading build logs:\n gsutil {}", args.join(" "));
            if let Err(e) = self.gsutil(&args).await {
                self.notifier.transfer_failed("upload build logs", &e);
            }
        }

        let mut args = text_upload_args(true);
        args.push(path_arg(&log_dir.join("*")));
        args.push(format!("{}{}{}/", bucket_path, mode, suffix));
        info!("Uploading logs:\n gsutil {}", args.join(" "));
        match self.gsutil(&args).await {
            Ok(out) => info!("gsutil output: {}", out),
            Err(e) => {
                self.notifier.transfer_failed("upload logs", &e);
                self.print_logs(log_dir).await;
            }
        }
        Ok(())
    }

    /// Publish freshly recorded fixtures under the head ref.
    ///
    /// Uploads always land under the version directory, GA included
    /// (`gs://<bucket>/ga/refs/heads/<head>/fixtures/`).
    pub async fn upload_cassettes(
        &self,
        paths: &ArtifactPaths,
        head: &str,
        version: Version,
    ) -> Result<()> {
        let cassette_path = paths
            .registered_fixture_dir(version)
            .ok_or(VcrError::CassettesMissing(version))?;
        let args = vec![
            "-m".to_string(),
            "-q".to_string(),
            "cp".to_string(),
            path_arg(&cassette_path.join("*")),
            format!(
                "gs://{}/{}/refs/heads/{}/fixtures/",
                self.cassette_bucket,
                version.as_str(),
                head
            ),
        ];
        info!("Uploading cassettes:\n gsutil {}", args.join(" "));
        if let Err(e) = self.gsutil(&args).await {
            self.notifier.transfer_failed("upload cassettes", &e);
        }
        Ok(())
    }

    /// Dump every log file under `log_dir` to the notifier.
    pub async fn print_logs(&self, log_dir: &Path) {
        let mut files = Vec::new();
        let walked = self
            .rnr
            .walk(log_dir, &mut |entry: &WalkEntry| {
                if !entry.is_dir && entry.name() != ALL_TESTS_LOG {
                    files.push(entry.clone());
                }
            })
            .await;
        if let Err(e) = walked {
            self.notifier.transfer_failed("list local logs", &e);
        }
        for file in files {
            if let Ok(content) = self.rnr.read_file(&file.path).await {
                self.notifier.diagnostic(&file.name(), &content);
            }
        }
    }

    fn log_bucket_path(&self, opts: &UploadLogsOptions) -> String {
        let mut bucket_path = format!("gs://{}/{}/", self.log_bucket, opts.version);
        if let Some(head) = opts.head.as_deref().filter(|h| !h.is_empty()) {
            bucket_path.push_str(&format!("refs/heads/{}/", head));
        }
        if let Some(build_id) = opts.build_id.as_deref().filter(|b| !b.is_empty()) {
            bucket_path.push_str(&format!("artifacts/{}/", build_id));
        }
        bucket_path
    }

    async fn gsutil(&self, args: &[String]) -> std::result::Result<String, ExecError> {
        self.rnr.run("gsutil", args, &BTreeMap::new()).await
    }
}

fn text_upload_args(multithreaded: bool) -> Vec<String> {
    let mut args = vec!["-h".to_string(), "Content-Type:text/plain".to_string()];
    if multithreaded {
        args.push("-m".to_string());
    }
    args.extend(["-q", "cp", "-r"].map(String::from));
    args
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
