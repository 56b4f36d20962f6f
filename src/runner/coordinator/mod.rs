//! Run coordinator: the single `collect`/`run`/`stop` state machine over per-project checkers.
//!
//! ## Notes
//! - One [`ProjectSlot`] per project holds that project's checker, an operation lock and a progress channel. Calls for
//!   the same project never overlap; calls for different projects run concurrently.
//! - A forwarder task per checker turns [`CheckerEvent`]s into host reporter calls and bumps the slot's progress once
//!   per finished cycle. `run` waits on that progress instead of on the checker directly.
//! - `run` races the checker's own watcher: when the watcher already started a cycle, `run` waits for it; when the
//!   checker sits idle past the race ceiling, the last completed cycle answers the request.

pub mod reporter;
pub mod transport;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};

use self::reporter::{ErrorOrigin, HostReporter, RERUN_TRIGGER};
use self::transport::{Request, Response, TestSpec, group_by_project};
use super::checker::{CheckerCycle, CheckerError, CheckerEvent, TestFiles, Typechecker};
use super::collect::Collector;
use super::tasks::{TaskError, TaskNode, packs};
use crate::config::{ConfigError, TypecheckConfig};

/// Default race ceiling between a run request and the checker's watcher.
pub const DEFAULT_RACE_CEILING: Duration = Duration::from_millis(500);

#[derive(Debug, Error, Diagnostic)]
pub enum CoordinatorError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Checker(#[from] CheckerError),

    #[error("the run was stopped before the checker finished")]
    #[diagnostic(code(typetest::coordinator::stopped))]
    Stopped,

    #[error("the coordinator transport is closed")]
    #[diagnostic(code(typetest::coordinator::transport_closed))]
    TransportClosed,

    #[error("unknown project `{0}`")]
    #[diagnostic(code(typetest::coordinator::unknown_project))]
    UnknownProject(String),
}

/// Timing of the run-versus-watcher race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaceConfig {
    pub ceiling: Duration,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            ceiling: DEFAULT_RACE_CEILING,
        }
    }
}

// ============================================================================
// Per-project state
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Progress {
    /// Cycles forwarded to the host so far.
    reported: u64,
    last: Option<Arc<CheckerCycle>>,
    stopped: bool,
}

struct ProjectSlot {
    name: Option<String>,
    /// Serializes `collect` and `run` for this project.
    op_lock: Mutex<()>,
    checker: Mutex<Option<Typechecker>>,
    progress: watch::Sender<Progress>,
    /// A `run` is waiting on this project; watcher cycles are then reported as its answer.
    in_flight: AtomicBool,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl ProjectSlot {
    fn new(name: Option<String>) -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self {
            name,
            op_lock: Mutex::new(()),
            checker: Mutex::new(None),
            progress,
            in_flight: AtomicBool::new(false),
            forwarder: Mutex::new(None),
        }
    }

    fn is_stopped(&self) -> bool {
        self.progress.borrow().stopped
    }

    fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Clears the in-flight flag when a `run` finishes or is cancelled.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// Coordinator
// ============================================================================

struct Inner {
    root: PathBuf,
    config: TypecheckConfig,
    race: RaceConfig,
    collector: Collector,
    reporter: Arc<dyn HostReporter>,
    known_projects: Option<HashSet<String>>,
    slots: Mutex<HashMap<Option<String>, Arc<ProjectSlot>>>,
}

/// Builds a [`Coordinator`].
pub struct CoordinatorBuilder {
    root: PathBuf,
    config: TypecheckConfig,
    reporter: Arc<dyn HostReporter>,
    collector: Option<Collector>,
    race: RaceConfig,
    known_projects: Option<HashSet<String>>,
}

impl CoordinatorBuilder {
    /// Collector used for every project; its project name is replaced per slot.
    pub fn collector(mut self, collector: Collector) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn race(mut self, race: RaceConfig) -> Self {
        self.race = race;
        self
    }

    /// Reject specifications naming any other project.
    pub fn projects(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.known_projects = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// ## Errors
    /// Fails when no collector was given and the configured test-name pattern is not a valid regex.
    pub fn build(self) -> Result<Coordinator, ConfigError> {
        let collector = match self.collector {
            Some(collector) => collector,
            None => Collector::new(&self.root)
                .with_allow_only(self.config.allow_only)
                .with_name_pattern(self.config.name_pattern()?),
        };
        Ok(Coordinator {
            inner: Arc::new(Inner {
                root: self.root,
                config: self.config,
                race: self.race,
                collector,
                reporter: self.reporter,
                known_projects: self.known_projects,
                slots: Mutex::new(HashMap::new()),
            }),
        })
    }
}

/// The `collect`/`run`/`stop` state machine. Clones share all state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn builder(
        root: impl Into<PathBuf>,
        config: TypecheckConfig,
        reporter: Arc<dyn HostReporter>,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder {
            root: root.into(),
            config,
            reporter,
            collector: None,
            race: RaceConfig::default(),
            known_projects: None,
        }
    }

    pub fn config(&self) -> &TypecheckConfig {
        &self.inner.config
    }

    /// Handle one transport request.
    pub async fn handle(&self, request: Request) -> Result<Response, CoordinatorError> {
        match request {
            Request::Collect(specs) => {
                let mut files = Vec::new();
                for (project, paths) in self.validate(specs)? {
                    files.extend(self.collect(project, paths).await?);
                }
                Ok(Response::Collected(files))
            }
            Request::Run(specs) => {
                let mut set = JoinSet::new();
                for (index, (project, paths)) in self.validate(specs)?.into_iter().enumerate() {
                    let this = self.clone();
                    set.spawn(async move { (index, this.run(project, paths).await) });
                }
                let mut cycles = Vec::with_capacity(set.len());
                while let Some(joined) = set.join_next().await {
                    let (index, cycle) = joined.map_err(CheckerError::from)?;
                    cycles.push((index, cycle?));
                }
                cycles.sort_by_key(|(index, _)| *index);
                Ok(Response::Finished(cycles.into_iter().map(|(_, cycle)| cycle).collect()))
            }
            Request::Stop => {
                self.stop().await;
                Ok(Response::Stopped)
            }
        }
    }

    fn validate(&self, specs: Vec<TestSpec>) -> Result<Vec<(Option<String>, Vec<PathBuf>)>, CoordinatorError> {
        let groups = group_by_project(specs);
        if let Some(known) = &self.inner.known_projects {
            if let Some(unknown) = groups.keys().flatten().find(|name| !known.contains(*name)) {
                return Err(CoordinatorError::UnknownProject(unknown.clone()));
            }
        }
        Ok(groups.into_iter().collect())
    }

    /// Collect `files` for `project` and report the trees. Never starts the checker.
    #[tracing::instrument(skip_all, fields(project = ?project, files = files.len()))]
    pub async fn collect(
        &self,
        project: Option<String>,
        files: Vec<PathBuf>,
    ) -> Result<Vec<TaskNode>, CoordinatorError> {
        let slot = self.slot(project).await;
        let _op = slot.op_lock.lock().await;

        if slot.is_stopped() {
            return Err(CoordinatorError::Stopped);
        }
        let (checker, prepare_error) = self.ensure_checker(&slot).await;
        self.release_if_stopped(&slot, &checker).await?;
        if let Some(error) = prepare_error {
            self.report_error(ErrorOrigin::TypecheckError, "TypecheckError", &error);
        }
        checker.set_files(files).await;
        let tests = match checker.collect_tests().await {
            Ok(tests) => tests,
            Err(error) => {
                self.report_error(ErrorOrigin::CollectionError, "CollectionError", &error);
                return Err(error.into());
            }
        };

        let trees: Vec<TaskNode> = tests.values().map(|info| info.file.clone()).collect();
        self.report_syntax_errors(&tests);
        let reporter = &self.inner.reporter;
        reporter.on_collected(&trees);
        reporter.on_updated(&trees.iter().flat_map(packs).collect::<Vec<_>>());
        Ok(trees)
    }

    /// Check `files` for `project` and return the cycle that answers this request.
    ///
    /// ## Errors
    /// Fails when the checker cannot be prepared or spawned, or when [`Coordinator::stop`] interrupts the wait.
    #[tracing::instrument(skip_all, fields(project = ?project, files = files.len()))]
    pub async fn run(
        &self,
        project: Option<String>,
        files: Vec<PathBuf>,
    ) -> Result<Arc<CheckerCycle>, CoordinatorError> {
        let slot = self.slot(project).await;
        let _op = slot.op_lock.lock().await;
        let _in_flight = InFlight::enter(&slot.in_flight);
        let baseline = slot.progress.borrow().reported;

        let existing = slot.checker.lock().await.clone();
        if let Some(checker) = existing {
            let mut status = checker.subscribe_status();
            let raced = tokio::time::timeout(
                self.inner.race.ceiling,
                status.wait_for(|s| s.rerun_triggered || !s.running),
            )
            .await
            .map(|waited| waited.map(|current| *current));
            match raced {
                Ok(Ok(current)) if current.rerun_triggered => {
                    tracing::debug!("watcher already started this cycle");
                    return self.await_cycle(&slot, baseline).await;
                }
                Ok(_) if slot.is_stopped() => return Err(CoordinatorError::Stopped),
                Ok(_) => {}
                Err(_) => {
                    if let Some(last) = checker.last_result().await {
                        tracing::debug!("checker idle past the race ceiling, answering with the last cycle");
                        self.publish_stale(&checker, &last).await;
                        return Ok(last);
                    }
                    return self.await_cycle(&slot, baseline).await;
                }
            }
        }

        if slot.is_stopped() {
            return Err(CoordinatorError::Stopped);
        }
        let (checker, _) = self.ensure_checker(&slot).await;
        if checker.temp_config_path().await.is_none() {
            checker.prepare().await?;
        }
        checker.set_files(files).await;
        checker.start().await?;
        // `stop` may have drained this slot while the checker was starting.
        self.release_if_stopped(&slot, &checker).await?;
        self.await_cycle(&slot, baseline).await
    }

    /// Stop every checker and release waiting `run` calls.
    pub async fn stop(&self) {
        let slots: Vec<Arc<ProjectSlot>> = self.inner.slots.lock().await.drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            // Flag first: a `run` that sees it unset has already put its checker where this loop takes it.
            slot.progress.send_modify(|p| p.stopped = true);
            let checker = slot.checker.lock().await.take();
            if let Some(checker) = checker {
                checker.stop().await;
            }
            if let Some(forwarder) = slot.forwarder.lock().await.take() {
                forwarder.abort();
            }
        }
        tracing::debug!("coordinator stopped");
    }

    // ========================================================================
    // Slots and checkers
    // ========================================================================

    async fn slot(&self, project: Option<String>) -> Arc<ProjectSlot> {
        let mut slots = self.inner.slots.lock().await;
        Arc::clone(
            slots
                .entry(project.clone())
                .or_insert_with(|| Arc::new(ProjectSlot::new(project))),
        )
    }

    /// The slot's checker, creating and preparing it on first use.
    ///
    /// ## Returns
    /// The checker, plus the preparation error when it was just created and could not be prepared.
    async fn ensure_checker(&self, slot: &Arc<ProjectSlot>) -> (Typechecker, Option<CheckerError>) {
        let mut guard = slot.checker.lock().await;
        if let Some(checker) = guard.as_ref() {
            return (checker.clone(), None);
        }

        let collector = self.inner.collector.clone().with_project(slot.name.clone());
        let checker = Typechecker::new(&self.inner.root, self.inner.config.clone(), collector);
        let forwarder = self.spawn_forwarder(Arc::clone(slot), checker.clone());
        *slot.forwarder.lock().await = Some(forwarder);
        let prepare_error = checker.prepare().await.err();
        *guard = Some(checker.clone());
        (checker, prepare_error)
    }

    /// Stop a checker created on a slot that [`Coordinator::stop`] already drained.
    async fn release_if_stopped(&self, slot: &ProjectSlot, checker: &Typechecker) -> Result<(), CoordinatorError> {
        if !slot.is_stopped() {
            return Ok(());
        }
        checker.stop().await;
        Err(CoordinatorError::Stopped)
    }

    async fn await_cycle(&self, slot: &ProjectSlot, baseline: u64) -> Result<Arc<CheckerCycle>, CoordinatorError> {
        let mut progress = slot.progress.subscribe();
        let reached = progress
            .wait_for(|p| p.reported > baseline || p.stopped)
            .await
            .map_err(|_| CoordinatorError::Stopped)?
            .clone();
        match reached.last {
            Some(cycle) if reached.reported > baseline => Ok(cycle),
            _ => Err(CoordinatorError::Stopped),
        }
    }

    // ========================================================================
    // Forwarding
    // ========================================================================

    fn spawn_forwarder(&self, slot: Arc<ProjectSlot>, checker: Typechecker) -> JoinHandle<()> {
        let mut events = checker.subscribe();
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(CheckerEvent::ParseStarted) => this.on_parse_start(&checker).await,
                    Ok(CheckerEvent::WatcherRerun) => this.on_watcher_rerun(&slot, &checker).await,
                    Ok(CheckerEvent::ParseEnded(cycle)) => this.on_parse_end(&slot, &checker, cycle),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "host forwarding fell behind checker events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn on_parse_start(&self, checker: &Typechecker) {
        let reporter = &self.inner.reporter;
        reporter.on_parse_start();
        match checker.test_files().await {
            Ok(trees) => {
                reporter.on_enqueued(&trees);
                reporter.on_collected(&trees);
            }
            Err(error) => self.report_error(ErrorOrigin::CollectionError, "CollectionError", &error),
        }
    }

    async fn on_watcher_rerun(&self, slot: &ProjectSlot, checker: &Typechecker) {
        let reporter = &self.inner.reporter;
        if !slot.is_in_flight() {
            reporter.on_watcher_rerun(&checker.get_files().await, RERUN_TRIGGER);
        }
        reporter.on_parse_start();
        match checker.collect_tests().await {
            Ok(tests) => {
                let trees: Vec<TaskNode> = tests.values().map(|info| info.file.clone()).collect();
                reporter.on_enqueued(&trees);
                reporter.on_collected(&trees);
            }
            Err(error) => self.report_error(ErrorOrigin::CollectionError, "CollectionError", &error),
        }
    }

    fn on_parse_end(&self, slot: &ProjectSlot, checker: &Typechecker, cycle: Arc<CheckerCycle>) {
        // Read before the bump wakes the waiting run and clears the flag.
        let requested = slot.is_in_flight();
        self.publish_cycle(&cycle);
        let files = cycle.files.clone();
        slot.progress.send_modify(|p| {
            p.reported += 1;
            p.last = Some(cycle);
        });
        if checker.is_watch() && !requested {
            let reporter = &self.inner.reporter;
            reporter.on_finished(&files);
            reporter.on_watcher_start();
        }
    }

    /// Report a cycle that completed before the request arrived, without counting it as progress.
    async fn publish_stale(&self, checker: &Typechecker, cycle: &CheckerCycle) {
        let reporter = &self.inner.reporter;
        match checker.test_files().await {
            Ok(trees) => {
                reporter.on_enqueued(&trees);
                reporter.on_collected(&trees);
            }
            Err(error) => self.report_error(ErrorOrigin::CollectionError, "CollectionError", &error),
        }
        self.publish_cycle(cycle);
    }

    fn publish_cycle(&self, cycle: &CheckerCycle) {
        let reporter = &self.inner.reporter;
        reporter.on_parse_end(cycle);
        reporter.on_updated(&cycle.packs());
        if !self.inner.config.ignore_source_errors {
            for error in &cycle.source_errors {
                reporter.on_error(ErrorOrigin::UnhandledSourceError, error);
            }
        }
        if let Some(error) = &cycle.process_error {
            reporter.on_error(ErrorOrigin::TypecheckError, error);
        }
    }

    fn report_syntax_errors(&self, tests: &TestFiles) {
        if self.inner.config.ignore_source_errors {
            return;
        }
        for error in tests.values().flat_map(|info| &info.syntax_errors) {
            self.inner.reporter.on_error(ErrorOrigin::UnhandledSourceError, error);
        }
    }

    fn report_error(&self, origin: ErrorOrigin, name: &str, error: &CheckerError) {
        self.inner
            .reporter
            .on_error(origin, &TaskError::new(name, error.to_string()));
    }
}
