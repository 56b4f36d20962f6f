//! Checker process manager: owns one external type-checker process and turns its output into cycles.
//!
//! ## Notes
//! - Lifecycle: `prepare` writes the temp config, `start` spawns the checker, `stop` kills it and removes the config.
//! - Batch mode produces one cycle when stdout ends. Watch mode produces a cycle every time the completion line
//!   appears, and announces a new cycle when the rerun marker appears.
//! - Subscribers get [`CheckerEvent`]s on a broadcast channel; [`CheckerStatus`] is published on a watch channel so
//!   callers can wait on state changes without polling.

pub mod tsconfig;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use miette::Diagnostic;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{Mutex, broadcast, oneshot, watch};
use tokio::task::JoinHandle;

use super::attribution::{Attribution, attribute};
use super::collect::{Collector, FileInfo};
use super::diagnostics::{is_cycle_complete, is_rerun_triggered, parse_diagnostics};
use super::tasks::{TaskError, TaskNode, TaskPack, TaskState, packs};
use crate::config::TypecheckConfig;

/// Error name used when the checker itself failed.
pub const PROCESS_ERROR_NAME: &str = "CheckerProcessError";

const EVENT_CAPACITY: usize = 64;
const READ_CHUNK: usize = 8192;

/// Collected test files, by absolute path.
pub type TestFiles = BTreeMap<PathBuf, Arc<FileInfo>>;

// ============================================================================
// Errors and events
// ============================================================================

#[derive(Debug, Error, Diagnostic)]
pub enum CheckerError {
    #[error("could not find checker config {}", path.display())]
    #[diagnostic(
        code(typetest::checker::config_not_found),
        help("pass --tsconfig or add a tsconfig.json to the project")
    )]
    ConfigNotFound { path: PathBuf },

    #[error("failed to read checker config {}", path.display())]
    #[diagnostic(code(typetest::checker::config_read))]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse checker config {}: {source}", path.display())]
    #[diagnostic(code(typetest::checker::config_parse))]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("checker config {} must contain a JSON object", path.display())]
    #[diagnostic(code(typetest::checker::config_shape))]
    ConfigShape { path: PathBuf },

    #[error("failed to write temporary checker config {}", path.display())]
    #[diagnostic(code(typetest::checker::config_write))]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn checker `{checker}`")]
    #[diagnostic(code(typetest::checker::spawn), help("is `{checker}` installed and on PATH?"))]
    Spawn {
        checker: String,
        #[source]
        source: io::Error,
    },

    #[error("checker was started before it was prepared")]
    #[diagnostic(code(typetest::checker::not_prepared))]
    NotPrepared,

    #[error("test collection task failed")]
    #[diagnostic(code(typetest::checker::collect))]
    Collect(#[from] tokio::task::JoinError),
}

/// One finished checker cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckerCycle {
    pub files: Vec<TaskNode>,
    pub source_errors: Vec<TaskError>,
    /// Set when the checker exited unsuccessfully without reporting anything.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_error: Option<TaskError>,
    #[serde(rename = "elapsedMs", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(elapsed.as_millis() as u64)
}

impl CheckerCycle {
    pub fn has_failures(&self) -> bool {
        self.files.iter().any(TaskNode::has_failed)
    }

    /// Flattened `(id, result)` packs of every file.
    pub fn packs(&self) -> Vec<TaskPack> {
        self.files.iter().flat_map(packs).collect()
    }

    /// Number of tests in each final state.
    pub fn count(&self, state: TaskState) -> usize {
        let mut count = 0;
        for file in &self.files {
            file.walk(&mut |node| {
                if !node.is_suite() && node.state() == Some(state) {
                    count += 1;
                }
            });
        }
        count
    }
}

#[derive(Debug, Clone)]
pub enum CheckerEvent {
    /// The process was spawned and the first cycle is running.
    ParseStarted,
    /// The checker's own watcher started a new cycle.
    WatcherRerun,
    ParseEnded(Arc<CheckerCycle>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckerStatus {
    /// A cycle is in progress.
    pub running: bool,
    /// The watcher started a cycle that has not completed yet.
    pub rerun_triggered: bool,
    /// Completed cycles since creation.
    pub cycles: u64,
    pub stopped: bool,
}

// ============================================================================
// Typechecker
// ============================================================================

struct ProcessHandle {
    kill: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    files: Vec<PathBuf>,
    tests: Option<Arc<TestFiles>>,
    temp_config: Option<PathBuf>,
    allow_js: bool,
    last: Option<Arc<CheckerCycle>>,
    process: Option<ProcessHandle>,
}

struct Inner {
    root: PathBuf,
    config: TypecheckConfig,
    collector: Collector,
    state: Mutex<State>,
    events: broadcast::Sender<CheckerEvent>,
    status: watch::Sender<CheckerStatus>,
}

/// Handle to one project's checker. Clones share the same process.
#[derive(Clone)]
pub struct Typechecker {
    inner: Arc<Inner>,
}

/// How the process ended, for the exit-code policy.
struct Exit {
    code: Option<i32>,
    stderr: String,
}

impl Typechecker {
    pub fn new(root: impl Into<PathBuf>, config: TypecheckConfig, collector: Collector) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status, _) = watch::channel(CheckerStatus::default());
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                config,
                collector,
                state: Mutex::new(State::default()),
                events,
                status,
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn is_watch(&self) -> bool {
        self.inner.config.watch
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CheckerEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<CheckerStatus> {
        self.inner.status.subscribe()
    }

    pub fn status(&self) -> CheckerStatus {
        *self.inner.status.borrow()
    }

    /// Write the temporary checker config.
    ///
    /// ## Errors
    /// Fails when no tsconfig can be found, read, parsed or written next to.
    #[tracing::instrument(skip_all, fields(root = %self.inner.root.display()))]
    pub async fn prepare(&self) -> Result<(), CheckerError> {
        let config = &self.inner.config;
        let tsconfig = tsconfig::locate(&self.inner.root, config.tsconfig.as_deref())?;
        let temp = tsconfig::write_temp_config(&tsconfig, &config.include, &config.exclude, config.allow_js)?;

        let mut state = self.inner.state.lock().await;
        state.temp_config = Some(temp.path);
        state.allow_js = temp.allow_js;
        Ok(())
    }

    /// Replace the file set. Collected trees are dropped and rebuilt on demand.
    pub async fn set_files(&self, files: Vec<PathBuf>) {
        let mut state = self.inner.state.lock().await;
        state.files = files;
        state.tests = None;
    }

    /// The checked files; `.js` files are dropped unless `allowJs` is in effect.
    pub async fn get_files(&self) -> Vec<PathBuf> {
        let state = self.inner.state.lock().await;
        checked_files(&state)
    }

    pub async fn temp_config_path(&self) -> Option<PathBuf> {
        self.inner.state.lock().await.temp_config.clone()
    }

    /// Collect every file, reusing the cached trees until the file set changes or the watcher reruns.
    pub async fn collect_tests(&self) -> Result<Arc<TestFiles>, CheckerError> {
        let files = {
            let state = self.inner.state.lock().await;
            if let Some(tests) = &state.tests {
                return Ok(Arc::clone(tests));
            }
            checked_files(&state)
        };

        let collector = self.inner.collector.clone();
        let tests = tokio::task::spawn_blocking(move || {
            files
                .into_iter()
                .map(|path| {
                    let info = collector.collect_file(&path);
                    (path, Arc::new(info))
                })
                .collect::<TestFiles>()
        })
        .await?;

        let tests = Arc::new(tests);
        self.inner.state.lock().await.tests = Some(Arc::clone(&tests));
        Ok(tests)
    }

    /// Collected file trees, without results from any cycle.
    pub async fn test_files(&self) -> Result<Vec<TaskNode>, CheckerError> {
        let tests = self.collect_tests().await?;
        Ok(tests.values().map(|info| info.file.clone()).collect())
    }

    /// The last completed cycle, if it belongs to the current watcher iteration.
    pub async fn last_result(&self) -> Option<Arc<CheckerCycle>> {
        self.inner.state.lock().await.last.clone()
    }

    /// Spawn the checker. Does nothing while a previous process is still alive.
    ///
    /// ## Errors
    /// [`CheckerError::NotPrepared`] before [`Typechecker::prepare`]; [`CheckerError::Spawn`] when the binary cannot
    /// be started.
    pub async fn start(&self) -> Result<(), CheckerError> {
        let mut state = self.inner.state.lock().await;
        if let Some(process) = &state.process {
            if self.status().running && !process.task.is_finished() {
                return Ok(());
            }
        }
        // A batch process reports its cycle just before its task returns.
        if let Some(previous) = state.process.take() {
            if let Err(error) = previous.task.await {
                tracing::warn!(%error, "checker task ended abnormally");
            }
        }
        let Some(temp_config) = state.temp_config.clone() else {
            return Err(CheckerError::NotPrepared);
        };

        let config = &self.inner.config;
        let mut args = vec![
            "--noEmit".to_string(),
            "--pretty".to_string(),
            "false".to_string(),
            "-p".to_string(),
            temp_config.to_string_lossy().into_owned(),
        ];
        if config.watch {
            args.push("--watch".to_string());
        }
        if state.allow_js {
            args.push("--allowJs".to_string());
            args.push("--checkJs".to_string());
        }
        tracing::debug!(checker = %config.checker, ?args, "spawning checker");

        let mut child = Command::new(&config.checker)
            .args(&args)
            .current_dir(&self.inner.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CheckerError::Spawn {
                checker: config.checker.clone(),
                source,
            })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        state.last = None;
        self.inner.status.send_modify(|s| {
            s.running = true;
            s.rerun_triggered = false;
            s.stopped = false;
        });
        let _ = self.inner.events.send(CheckerEvent::ParseStarted);

        let (kill, kill_rx) = oneshot::channel();
        let this = self.clone();
        let task = tokio::spawn(async move { this.drive(child, stdout, stderr, kill_rx).await });
        state.process = Some(ProcessHandle { kill, task });
        Ok(())
    }

    /// Kill the process and remove the temp config. Safe to call repeatedly and after the process exited.
    pub async fn stop(&self) {
        let (process, temp_config) = {
            let mut state = self.inner.state.lock().await;
            (state.process.take(), state.temp_config.clone())
        };

        if let Some(path) = temp_config {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed temporary checker config"),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "failed to remove temporary checker config")
                }
            }
        }
        if let Some(ProcessHandle { kill, task }) = process {
            let _ = kill.send(());
            if let Err(error) = task.await {
                tracing::warn!(%error, "checker task ended abnormally");
            }
        }
        self.inner.status.send_modify(|s| {
            s.running = false;
            s.rerun_triggered = false;
            s.stopped = true;
        });
    }

    // ========================================================================
    // Output loop
    // ========================================================================

    async fn drive(
        self,
        mut child: Child,
        stdout: Option<ChildStdout>,
        stderr: Option<ChildStderr>,
        mut kill_rx: oneshot::Receiver<()>,
    ) {
        let stderr_task = tokio::spawn(async move {
            let mut bytes = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut bytes).await;
            }
            String::from_utf8_lossy(&bytes).into_owned()
        });

        let watch_mode = self.is_watch();
        let mut cycle_started = Instant::now();
        let mut buffer = String::new();
        let mut pending = Vec::new();
        let mut rerun_seen = false;
        let mut chunk = vec![0u8; READ_CHUNK];

        if let Some(mut stdout) = stdout {
            loop {
                tokio::select! {
                    _ = &mut kill_rx => {
                        kill(&mut child).await;
                        return;
                    }
                    read = stdout.read(&mut chunk) => match read {
                        Ok(0) => break,
                        Ok(n) => {
                            pending.extend_from_slice(&chunk[..n]);
                            decode_utf8_prefix(&mut pending, &mut buffer);
                            if !watch_mode {
                                continue;
                            }
                            if !rerun_seen && is_rerun_triggered(&buffer) {
                                rerun_seen = true;
                                cycle_started = Instant::now();
                                self.on_watcher_rerun().await;
                            }
                            if is_cycle_complete(&buffer) {
                                let output = std::mem::take(&mut buffer);
                                self.finish_cycle(&output, None, cycle_started.elapsed()).await;
                                rerun_seen = false;
                                cycle_started = Instant::now();
                            }
                        }
                        Err(error) => {
                            tracing::warn!(%error, "failed to read checker output");
                            break;
                        }
                    }
                }
            }
        }

        // A character cut short by the end of the stream.
        buffer.push_str(&String::from_utf8_lossy(&pending));

        let status = tokio::select! {
            _ = &mut kill_rx => {
                kill(&mut child).await;
                return;
            }
            status = child.wait() => status,
        };
        let code = match status {
            Ok(status) => status.code(),
            Err(error) => {
                tracing::warn!(%error, "failed to wait for checker");
                None
            }
        };
        let stderr = stderr_task.await.unwrap_or_default();
        tracing::debug!(?code, "checker exited");
        self.finish_cycle(&buffer, Some(Exit { code, stderr }), cycle_started.elapsed())
            .await;
    }

    async fn on_watcher_rerun(&self) {
        {
            let mut state = self.inner.state.lock().await;
            // Test structure may have changed along with the file that triggered the rerun.
            state.tests = None;
            state.last = None;
        }
        self.inner.status.send_modify(|s| {
            s.running = true;
            s.rerun_triggered = true;
        });
        let _ = self.inner.events.send(CheckerEvent::WatcherRerun);
    }

    async fn finish_cycle(&self, output: &str, exit: Option<Exit>, elapsed: Duration) {
        let tests = match self.collect_tests().await {
            Ok(tests) => tests,
            Err(error) => {
                tracing::warn!(%error, "failed to collect tests for the finished cycle");
                Arc::new(TestFiles::new())
            }
        };
        let diagnostics = parse_diagnostics(output, &self.inner.root);
        let Attribution { files, source_errors } = attribute(&tests, &diagnostics);

        let exited = exit.is_some();
        let process_error = exit.and_then(|exit| {
            let reported = files.iter().any(TaskNode::has_failed) || !source_errors.is_empty();
            exit_error(&self.inner.config.checker, exit, output, reported)
        });
        let cycle = Arc::new(CheckerCycle {
            files,
            source_errors,
            process_error,
            elapsed,
        });

        self.inner.state.lock().await.last = Some(Arc::clone(&cycle));
        self.inner.status.send_modify(|s| {
            s.cycles += 1;
            s.rerun_triggered = false;
            if exited || !self.inner.config.watch {
                s.running = false;
            }
        });
        let _ = self.inner.events.send(CheckerEvent::ParseEnded(Arc::clone(&cycle)));

        tracing::info!(
            files = cycle.files.len(),
            passed = cycle.count(TaskState::Pass),
            failed = cycle.count(TaskState::Fail),
            source_errors = cycle.source_errors.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "checker cycle complete"
        );
    }
}

fn checked_files(state: &State) -> Vec<PathBuf> {
    state
        .files
        .iter()
        .filter(|f| state.allow_js || f.extension().is_none_or(|ext| ext != "js"))
        .cloned()
        .collect()
}

/// Move the complete UTF-8 prefix of `pending` into `out`.
///
/// ## Notes
/// - A character split across reads stays in `pending` until the rest of its bytes arrive.
/// - Invalid sequences become U+FFFD, as with [`String::from_utf8_lossy`].
fn decode_utf8_prefix(pending: &mut Vec<u8>, out: &mut String) {
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                out.push_str(text);
                pending.clear();
                return;
            }
            Err(error) => {
                let valid = error.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match error.error_len() {
                    Some(invalid) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + invalid);
                    }
                    None => {
                        pending.drain(..valid);
                        return;
                    }
                }
            }
        }
    }
}

async fn kill(child: &mut Child) {
    if let Err(error) = child.kill().await {
        tracing::warn!(%error, "failed to kill checker");
    }
}

/// A non-zero exit with nothing reported means the checker itself failed.
fn exit_error(checker: &str, exit: Exit, stdout: &str, reported: bool) -> Option<TaskError> {
    if exit.code == Some(0) || reported {
        return None;
    }
    let message = [stdout.trim(), exit.stderr.trim()]
        .into_iter()
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| match exit.code {
            Some(code) => format!("`{checker}` exited with code {code}"),
            None => format!("`{checker}` was terminated by a signal"),
        });
    Some(TaskError::new(PROCESS_ERROR_NAME, message))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn exit(code: Option<i32>, stderr: &str) -> Exit {
        Exit {
            code,
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_clean_exit_is_not_an_error() {
        assert!(exit_error("tsc", exit(Some(0), ""), "", false).is_none());
    }

    #[test]
    fn test_reported_failures_suppress_the_process_error() {
        assert!(exit_error("tsc", exit(Some(2), ""), "a.ts(1,1): error TS1: x", true).is_none());
    }

    #[test]
    fn test_crash_uses_raw_output() {
        let error = exit_error("tsc", exit(Some(1), "boom"), "error TS5058: The specified path does not exist.\n", false)
            .unwrap();
        assert_eq!(error.name, PROCESS_ERROR_NAME);
        assert_eq!(error.message, "error TS5058: The specified path does not exist.");

        let error = exit_error("tsc", exit(Some(1), "boom\n"), "  ", false).unwrap();
        assert_eq!(error.message, "boom");

        let error = exit_error("tsc", exit(None, ""), "", false).unwrap();
        assert_eq!(error.message, "`tsc` was terminated by a signal");
    }

    #[test]
    fn test_split_characters_wait_for_their_remaining_bytes() {
        let text = "é/a.test-d.ts";
        let bytes = text.as_bytes();
        let mut pending = bytes[..1].to_vec();
        let mut out = String::new();

        decode_utf8_prefix(&mut pending, &mut out);
        assert_eq!(out, "");
        assert_eq!(pending, &bytes[..1]);

        pending.extend_from_slice(&bytes[1..]);
        decode_utf8_prefix(&mut pending, &mut out);
        assert_eq!(out, text);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut pending = b"a\xffb\xc3".to_vec();
        let mut out = String::new();
        decode_utf8_prefix(&mut pending, &mut out);
        assert_eq!(out, "a\u{FFFD}b");
        assert_eq!(pending, b"\xc3");
    }

    #[tokio::test]
    async fn test_js_files_need_allow_js() {
        let checker = Typechecker::new("/p", TypecheckConfig::default(), Collector::new("/p"));
        checker
            .set_files(vec![PathBuf::from("/p/a.test-d.ts"), PathBuf::from("/p/b.test-d.js")])
            .await;
        assert_eq!(checker.get_files().await, vec![PathBuf::from("/p/a.test-d.ts")]);
    }

    #[tokio::test]
    async fn test_start_before_prepare_fails() {
        let checker = Typechecker::new("/p", TypecheckConfig::default(), Collector::new("/p"));
        assert!(matches!(checker.start().await, Err(CheckerError::NotPrepared)));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_a_no_op() {
        let checker = Typechecker::new("/p", TypecheckConfig::default(), Collector::new("/p"));
        checker.stop().await;
        checker.stop().await;
        assert!(checker.status().stopped);
    }
}
