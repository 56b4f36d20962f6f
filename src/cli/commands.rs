//! CLI command implementations
//!
//! All command functions return `CliResult<ExitCode>` instead of calling
//! `process::exit`. Error handling and exits happen in the top-level `run()`.

use std::env;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::config::TypecheckConfig;
use crate::discovery::{TestGlobs, discover, filter_paths};
use crate::runner::coordinator::reporter::{EventReporter, HostEvent};
use crate::runner::coordinator::transport::{LocalTransport, Pool, TestSpec};
use crate::runner::coordinator::{Coordinator, CoordinatorError};

use super::reporter::{ConsoleReporter, JsonReporter, RunSummary, TestReporter};
use super::{Cli, CliError, CliResult, ExitCode, ReporterKind};

// ============================================================================
// Session setup
// ============================================================================

/// What the session does once the coordinator is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    List,
    Run,
    Watch,
}

/// Resolve the root, load and override the config, and discover test files.
pub fn load_config(cli: &Cli) -> CliResult<(PathBuf, TypecheckConfig)> {
    let root = match &cli.root {
        Some(root) => root.clone(),
        None => env::current_dir()
            .map_err(|e| CliError::failure(format!("Error: cannot read current directory: {e}")))?,
    };
    let root = fs::canonicalize(&root)
        .map_err(|e| CliError::failure(format!("Error: cannot open root {}: {e}", root.display())))?;

    let mut config = TypecheckConfig::load(&root).map_err(CliError::diagnostic)?;
    apply_overrides(&mut config, cli);
    Ok((root, config))
}

/// CLI flags win over `typetest.json`; boolean flags can only switch behavior on.
fn apply_overrides(config: &mut TypecheckConfig, cli: &Cli) {
    if let Some(checker) = &cli.checker {
        config.checker = checker.clone();
    }
    if let Some(tsconfig) = &cli.tsconfig {
        config.tsconfig = Some(tsconfig.clone());
    }
    if let Some(pattern) = &cli.test_name_pattern {
        config.test_name_pattern = Some(pattern.clone());
    }
    config.allow_js |= cli.allow_js;
    config.watch |= cli.watch;
    config.ignore_source_errors |= cli.ignore_source_errors;
    config.allow_only |= cli.allow_only;
}

/// Test files under `root` matching the config globs and the path filters.
pub fn find_test_files(root: &Path, config: &TypecheckConfig, filters: &[String]) -> CliResult<Vec<PathBuf>> {
    let globs = TestGlobs::new(&config.include, &config.exclude).map_err(CliError::diagnostic)?;
    Ok(filter_paths(root, discover(root, &globs), filters))
}

/// Run one CLI session: list, run once, or watch.
pub fn run_session(cli: Cli) -> CliResult<ExitCode> {
    let (root, config) = load_config(&cli)?;
    let files = find_test_files(&root, &config, &cli.paths)?;
    if files.is_empty() {
        eprintln!("No test files found");
        // "no tests collected" is not a failure
        return Ok(ExitCode::SUCCESS);
    }

    let mode = if cli.list {
        Mode::List
    } else if config.watch {
        Mode::Watch
    } else {
        Mode::Run
    };
    let reporter: Box<dyn TestReporter> = match cli.reporter {
        ReporterKind::Console => Box::new(ConsoleReporter::new()),
        ReporterKind::Json => Box::new(JsonReporter),
    };
    let specs = files
        .into_iter()
        .map(|file| TestSpec::new(cli.project.clone(), file))
        .collect();

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::failure(format!("Error: failed to start async runtime: {e}")))?;
    runtime.block_on(session(root, config, specs, mode, reporter))
}

// ============================================================================
// Session flows
// ============================================================================

async fn session(
    root: PathBuf,
    config: TypecheckConfig,
    specs: Vec<TestSpec>,
    mode: Mode,
    mut reporter: Box<dyn TestReporter>,
) -> CliResult<ExitCode> {
    let started = Instant::now();
    let events = EventReporter::new();
    let coordinator = Coordinator::builder(root, config, Arc::new(events.clone()))
        .build()
        .map_err(CliError::diagnostic)?;
    let pool = Pool::new(LocalTransport::new(coordinator, events));
    let mut stream = pool.events();
    let mut summary = RunSummary::default();

    let outcome: Result<(), CoordinatorError> = match mode {
        Mode::List => {
            let collected = pump(pool.collect(specs), &mut stream, reporter.as_mut(), &mut summary).await;
            collected.map(|files| reporter.on_list(&files))
        }
        Mode::Run => pump(pool.run(specs), &mut stream, reporter.as_mut(), &mut summary)
            .await
            .map(|_| ()),
        Mode::Watch => {
            let first = pump(pool.run(specs), &mut stream, reporter.as_mut(), &mut summary).await;
            match first {
                Ok(_) => {
                    reporter.on_watcher_start();
                    let interrupted = pump(tokio::signal::ctrl_c(), &mut stream, reporter.as_mut(), &mut summary).await;
                    if let Err(error) = interrupted {
                        tracing::warn!(%error, "failed to listen for Ctrl-C");
                    }
                    Ok(())
                }
                Err(error) => Err(error),
            }
        }
    };

    if let Err(error) = pool.stop().await {
        tracing::warn!(%error, "failed to stop the coordinator");
    }
    drain(&mut stream, reporter.as_mut(), &mut summary);

    outcome.map_err(CliError::diagnostic)?;
    summary.duration = started.elapsed();
    reporter.on_run_complete(&summary);
    if summary.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Drive `work` to completion while forwarding host events to the reporter.
async fn pump<F: Future>(
    work: F,
    stream: &mut broadcast::Receiver<HostEvent>,
    reporter: &mut dyn TestReporter,
    summary: &mut RunSummary,
) -> F::Output {
    tokio::pin!(work);
    loop {
        tokio::select! {
            output = &mut work => {
                drain(stream, reporter, summary);
                return output;
            }
            event = stream.recv() => match event {
                Ok(event) => deliver(&event, reporter, summary),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "reporter fell behind host events");
                }
                Err(RecvError::Closed) => return work.await,
            },
        }
    }
}

fn drain(stream: &mut broadcast::Receiver<HostEvent>, reporter: &mut dyn TestReporter, summary: &mut RunSummary) {
    loop {
        match stream.try_recv() {
            Ok(event) => deliver(&event, reporter, summary),
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "reporter fell behind host events");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}

fn deliver(event: &HostEvent, reporter: &mut dyn TestReporter, summary: &mut RunSummary) {
    summary.observe(event);
    reporter.on_event(event);
}
