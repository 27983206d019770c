//! Process execution adapter.
//!
//! [`ExecRunner`] is the only place the orchestrator touches the operating
//! system: launching commands, the working-directory stack, and the handful of
//! file operations the scheduler and transfer facade need. [`ProcessRunner`]
//! is the production implementation; `fakes::FakeRunner` scripts command
//! responses for tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::ExecError;

/// A single entry visited by [`ExecRunner::walk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

impl WalkEntry {
    /// Final path component, or an empty string for `/`.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Capability surface for running commands and manipulating files.
///
/// Relative paths are resolved against the top of the directory stack.
#[async_trait]
pub trait ExecRunner: Send + Sync {
    /// Run `command` and return its combined stdout and stderr.
    ///
    /// An empty `env` inherits the orchestrator's environment; otherwise the
    /// child sees exactly `env`.
    async fn run(
        &self,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<String, ExecError>;

    /// Enter `path`. Must be paired with [`ExecRunner::pop_dir`].
    fn push_dir(&self, path: &Path) -> Result<(), ExecError>;

    /// Leave the most recently pushed directory.
    fn pop_dir(&self) -> Result<(), ExecError>;

    /// Current working directory (top of the stack).
    fn cwd(&self) -> PathBuf;

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), ExecError>;

    async fn read_file(&self, path: &Path) -> Result<String, ExecError>;

    /// Create `path` and all missing parents.
    async fn mkdir(&self, path: &Path) -> Result<(), ExecError>;

    /// Remove `path` recursively. A missing path is not an error.
    async fn remove_all(&self, path: &Path) -> Result<(), ExecError>;

    /// Visit `root` and everything below it, parents before children.
    async fn walk(
        &self,
        root: &Path,
        visitor: &mut (dyn for<'w> FnMut(&'w WalkEntry) + Send + '_),
    ) -> Result<(), ExecError>;
}

/// Logical working-directory stack.
///
/// Never calls `std::env::set_current_dir`; the top of the stack is handed to
/// each child as its working directory instead, so concurrent jobs cannot
/// observe a half-changed process state.
#[derive(Debug)]
pub struct DirStack {
    base: PathBuf,
    stack: Mutex<Vec<PathBuf>>,
}

impl DirStack {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            stack: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, path: &Path) {
        let resolved = self.resolve(path);
        self.lock().push(resolved);
    }

    pub fn pop(&self) -> Result<(), ExecError> {
        self.lock().pop().map(|_| ()).ok_or(ExecError::EmptyDirStack)
    }

    pub fn current(&self) -> PathBuf {
        self.lock().last().cloned().unwrap_or_else(|| self.base.clone())
    }

    pub fn depth(&self) -> usize {
        self.lock().len()
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.current().join(path)
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PathBuf>> {
        self.stack.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Runs real processes with `tokio::process`.
pub struct ProcessRunner {
    dirs: DirStack,
    timeout_secs: u64,
}

impl ProcessRunner {
    /// Create a runner rooted at `base`. A `timeout_secs` of 0 waits forever.
    pub fn new(base: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            dirs: DirStack::new(base),
            timeout_secs,
        }
    }

    /// Create a runner rooted at the process working directory.
    pub fn from_current_dir(timeout_secs: u64) -> Result<Self, ExecError> {
        let cwd = std::env::current_dir().map_err(|e| ExecError::io(".", e))?;
        Ok(Self::new(cwd, timeout_secs))
    }
}

#[async_trait]
impl ExecRunner for ProcessRunner {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<String, ExecError> {
        let cwd = self.dirs.current();
        debug!(command = %command, cwd = ?cwd, "launching command");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(&cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !env.is_empty() {
            cmd.env_clear().envs(env);
        }

        let child = cmd.spawn().map_err(|source| ExecError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let waited = if self.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(self.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| ExecError::Timeout {
                command: command.to_string(),
                secs: self.timeout_secs,
            })?
        } else {
            child.wait_with_output().await
        };
        let output = waited.map_err(|source| ExecError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(combined)
        } else {
            Err(ExecError::NonZeroExit {
                command: command.to_string(),
                code: output.status.code().unwrap_or(-1),
                output: combined,
            })
        }
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
        write_file(&self.dirs.resolve(path), contents).await
    }

    async fn read_file(&self, path: &Path) -> Result<String, ExecError> {
        read_file(&self.dirs.resolve(path)).await
    }

    async fn mkdir(&self, path: &Path) -> Result<(), ExecError> {
        mkdir(&self.dirs.resolve(path)).await
    }

    async fn remove_all(&self, path: &Path) -> Result<(), ExecError> {
        remove_all(&self.dirs.resolve(path)).await
    }

    async fn walk(
        &self,
        root: &Path,
        visitor: &mut (dyn for<'w> FnMut(&'w WalkEntry) + Send + '_),
    ) -> Result<(), ExecError> {
        walk(&self.dirs.resolve(root), visitor).await
    }
}

pub(crate) async fn write_file(path: &Path, contents: &str) -> Result<(), ExecError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| ExecError::io(path, e))
}

pub(crate) async fn read_file(path: &Path) -> Result<String, ExecError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ExecError::io(path, e))
}

pub(crate) async fn mkdir(path: &Path) -> Result<(), ExecError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| ExecError::io(path, e))
}

pub(crate) async fn remove_all(path: &Path) -> Result<(), ExecError> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(ExecError::io(path, e)),
    };
    let removed = if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    removed.map_err(|e| ExecError::io(path, e))
}

pub(crate) async fn walk(
    root: &Path,
    visitor: &mut (dyn for<'w> FnMut(&'w WalkEntry) + Send + '_),
) -> Result<(), ExecError> {
    let meta = tokio::fs::metadata(root)
        .await
        .map_err(|e| ExecError::io(root, e))?;
    let mut pending = vec![WalkEntry {
        path: root.to_path_buf(),
        is_dir: meta.is_dir(),
    }];

    while let Some(entry) = pending.pop() {
        visitor(&entry);
        if !entry.is_dir {
            continue;
        }
        let mut children = Vec::new();
        let mut dir = tokio::fs::read_dir(&entry.path)
            .await
            .map_err(|e| ExecError::io(&entry.path, e))?;
        while let Some(child) = dir
            .next_entry()
            .await
            .map_err(|e| ExecError::io(&entry.path, e))?
        {
            let is_dir = child
                .file_type()
                .await
                .map_err(|e| ExecError::io(child.path(), e))?
                .is_dir();
            children.push(WalkEntry {
                path: child.path(),
                is_dir,
            });
        }
        // Reverse-sorted so the stack pops in lexical order.
        children.sort_by(|a, b| b.path.cmp(&a.path));
        pending.extend(children);
    }
    Ok(())
}
