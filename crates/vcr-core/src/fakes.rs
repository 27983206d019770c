//! In-memory test doubles for the orchestrator's seams.
//!
//! [`FakeRunner`] scripts command responses while still touching the real
//! filesystem for file operations, so tests run against a temp directory
//! without needing `go` or `gsutil` installed.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ExecError;
use crate::exec::{self, DirStack, ExecRunner, WalkEntry};
use crate::transfer::Notifier;

/// One command launched through a [`FakeRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Working directory the command would have run in.
    pub cwd: PathBuf,
}

impl RecordedCall {
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

type Responder = dyn Fn(&RecordedCall) -> Result<String, ExecError> + Send + Sync;

/// Scriptable [`ExecRunner`].
pub struct FakeRunner {
    dirs: DirStack,
    responder: Box<Responder>,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeRunner {
    /// A runner rooted at `base` whose commands all succeed with no output.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            dirs: DirStack::new(base),
            responder: Box::new(|_| Ok(String::new())),
            delay: None,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&RecordedCall) -> Result<String, ExecError> + Send + Sync + 'static,
    {
        self.responder = Box::new(responder);
        self
    }

    /// Hold every command open for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock_calls().clone()
    }

    pub fn calls_to(&self, command: &str) -> Vec<RecordedCall> {
        self.lock_calls()
            .iter()
            .filter(|c| c.command == command)
            .cloned()
            .collect()
    }

    /// Highest number of commands observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn dir_depth(&self) -> usize {
        self.dirs.depth()
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<RecordedCall>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ExecRunner for FakeRunner {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<String, ExecError> {
        let call = RecordedCall {
            command: command.to_string(),
            args: args.to_vec(),
            env: env.clone(),
            cwd: self.dirs.current(),
        };
        self.lock_calls().push(call.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = (self.responder)(&call);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }

    fn push_dir(&self, path: &Path) -> Result<(), ExecError> {
        self.dirs.push(path);
        Ok(())
    }

    fn pop_dir(&self) -> Result<(), ExecError> {
        self.dirs.pop()
    }

    fn cwd(&self) -> PathBuf {
        self.dirs.current()
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), ExecError> {
        exec::write_file(&self.dirs.resolve(path), contents).await
    }

    async fn read_file(&self, path: &Path) -> Result<String, ExecError> {
        exec::read_file(&self.dirs.resolve(path)).await
    }

    async fn mkdir(&self, path: &Path) -> Result<(), ExecError> {
        exec::mkdir(&self.dirs.resolve(path)).await
    }

    async fn remove_all(&self, path: &Path) -> Result<(), ExecError> {
        exec::remove_all(&self.dirs.resolve(path)).await
    }

    async fn walk(
        &self,
        root: &Path,
        visitor: &mut (dyn for<'w> FnMut(&'w WalkEntry) + Send + '_),
    ) -> Result<(), ExecError> {
        exec::walk(&self.dirs.resolve(root), visitor).await
    }
}

/// [`Notifier`] that keeps everything it is told.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    failures: Mutex<Vec<(String, String)>>,
    diagnostics: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `(operation, error message)` pairs, in arrival order.
    pub fn failures(&self) -> Vec<(String, String)> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// `(title, body)` pairs, in arrival order.
    pub fn diagnostics(&self) -> Vec<(String, String)> {
        self.diagnostics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn transfer_failed(&self, operation: &str, error: &ExecError) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((operation.to_string(), error.to_string()));
    }

    fn diagnostic(&self, title: &str, body: &str) {
        self.diagnostics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((title.to_string(), body.to_string()));
    }
}
