//! Test reporters (pytest-style console output and JSON lines)
//!
//! ## TestReporter Trait
//!
//! The session pumps every [`HostEvent`] into a `TestReporter`. The default [`TestReporter::on_event`] dispatches to
//! the typed callbacks; reporters that want the raw stream (JSON) override it instead.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::runner::checker::CheckerCycle;
use crate::runner::coordinator::reporter::{ErrorOrigin, HostEvent};
use crate::runner::tasks::{RunMode, TaskError, TaskKind, TaskNode, TaskState};

// ============================================================================
// Test Reporter Trait
// ============================================================================

/// Trait for reporting a session.
pub trait TestReporter {
    /// Route one host event to the typed callbacks.
    fn on_event(&mut self, event: &HostEvent) {
        match event {
            HostEvent::Collected { files } => self.on_collected(files),
            HostEvent::ParseEnd { cycle } => self.on_cycle(cycle),
            HostEvent::Error { origin, error } => self.on_error(*origin, error),
            HostEvent::WatcherRerun { files, trigger } => self.on_watcher_rerun(files, trigger),
            HostEvent::WatcherStart => self.on_watcher_start(),
            HostEvent::Enqueued { .. }
            | HostEvent::Updated { .. }
            | HostEvent::ParseStart
            | HostEvent::Finished { .. } => {}
        }
    }

    /// Called when test trees have been collected
    fn on_collected(&mut self, files: &[TaskNode]);

    /// Called when a checker cycle completes
    fn on_cycle(&mut self, cycle: &CheckerCycle);

    /// Called for errors not attached to any test
    fn on_error(&mut self, origin: ErrorOrigin, error: &TaskError);

    /// Called when the checker's watcher starts a new cycle
    fn on_watcher_rerun(&mut self, _files: &[PathBuf], _trigger: &str) {}

    /// Called when watch mode is idle
    fn on_watcher_start(&mut self) {}

    /// Called with the trees of a `--list` session
    fn on_list(&mut self, _files: &[TaskNode]) {}

    /// Called once when the session ends
    fn on_run_complete(&mut self, summary: &RunSummary);
}

// ============================================================================
// Summary
// ============================================================================

/// Counts for the session, rebuilt from host events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub collected: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub todo: usize,
    pub errors: usize,
    pub cycles: usize,
    pub duration: Duration,
    collected_by_file: BTreeMap<String, usize>,
}

impl RunSummary {
    /// Fold one event into the counts. A watcher rerun starts the counts over.
    pub fn observe(&mut self, event: &HostEvent) {
        match event {
            HostEvent::Collected { files } => {
                for file in files {
                    self.collected_by_file.insert(file.id.clone(), count_tests(file));
                }
                self.collected = self.collected_by_file.values().sum();
            }
            HostEvent::ParseEnd { cycle } => {
                self.cycles += 1;
                self.passed += cycle.count(TaskState::Pass);
                self.failed += cycle.count(TaskState::Fail);
                self.skipped += cycle.count(TaskState::Skip);
                self.todo += cycle.count(TaskState::Todo);
                // Collection errors fail the file task, which is not a test.
                self.failed += cycle
                    .files
                    .iter()
                    .filter(|f| f.state() == Some(TaskState::Fail) && count_tests(f) == 0)
                    .count();
            }
            HostEvent::Error { .. } => self.errors += 1,
            HostEvent::WatcherRerun { .. } => {
                self.passed = 0;
                self.failed = 0;
                self.skipped = 0;
                self.todo = 0;
                self.errors = 0;
            }
            _ => {}
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }
}

fn count_tests(file: &TaskNode) -> usize {
    let mut count = 0;
    file.walk(&mut |node| {
        if node.kind == TaskKind::Test {
            count += 1;
        }
    });
    count
}

/// Every test of a file with its full name (enclosing suite names and its own, space-joined).
pub fn named_tests(file: &TaskNode) -> Vec<(String, &TaskNode)> {
    fn visit<'a>(node: &'a TaskNode, names: &mut Vec<&'a str>, out: &mut Vec<(String, &'a TaskNode)>) {
        for child in &node.children {
            names.push(&child.name);
            if child.is_suite() {
                visit(child, names, out);
            } else {
                out.push((names.join(" "), child));
            }
            names.pop();
        }
    }
    let mut out = Vec::new();
    visit(file, &mut Vec::new(), &mut out);
    out
}

/// Indented outline of a collected file.
pub fn render_tree(file: &TaskNode) -> String {
    fn visit(node: &TaskNode, depth: usize, out: &mut String) {
        for child in &node.children {
            out.push_str(&"  ".repeat(depth));
            out.push_str(if child.is_suite() { "> " } else { "- " });
            out.push_str(&child.name);
            match child.mode {
                RunMode::Run => {}
                RunMode::Skip => out.push_str(" [skip]"),
                RunMode::Only => out.push_str(" [only]"),
                RunMode::Todo => out.push_str(" [todo]"),
            }
            out.push('\n');
            visit(child, depth + 1, out);
        }
    }
    let mut out = format!("{}\n", file.name);
    visit(file, 1, &mut out);
    out
}

// ============================================================================
// Console
// ============================================================================

/// Default console reporter (pytest-style)
#[derive(Default)]
pub struct ConsoleReporter {
    header_printed: bool,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

fn status_label(state: Option<TaskState>) -> &'static str {
    match state {
        Some(TaskState::Pass) => "\x1b[32mPASSED\x1b[0m",
        Some(TaskState::Fail) => "\x1b[31mFAILED\x1b[0m",
        Some(TaskState::Skip) => "\x1b[33mSKIPPED\x1b[0m",
        Some(TaskState::Todo) => "\x1b[36mTODO\x1b[0m",
        None => "\x1b[2mPENDING\x1b[0m",
    }
}

impl TestReporter for ConsoleReporter {
    fn on_collected(&mut self, files: &[TaskNode]) {
        if !self.header_printed {
            println!("\x1b[1m=================== test session starts ===================\x1b[0m");
            self.header_printed = true;
        }
        let tests: usize = files.iter().map(count_tests).sum();
        println!("collected {} item(s) in {} file(s)", tests, files.len());
        println!();
    }

    fn on_cycle(&mut self, cycle: &CheckerCycle) {
        let mut failures: Vec<(String, &[TaskError])> = Vec::new();
        for file in &cycle.files {
            if let Some(result) = file.result.as_ref().filter(|r| !r.errors.is_empty()) {
                failures.push((file.name.clone(), &result.errors));
            }
            for (name, test) in named_tests(file) {
                println!("{}::{} {}", file.name, name, status_label(test.state()));
                if let Some(result) = test.result.as_ref().filter(|r| !r.errors.is_empty()) {
                    failures.push((format!("{}::{}", file.name, name), &result.errors));
                }
            }
        }

        if !failures.is_empty() {
            println!();
            println!("\x1b[1;31m=================== FAILURES ===================\x1b[0m");
            for (name, errors) in failures {
                println!();
                println!("\x1b[1m___________ {} ___________\x1b[0m", name);
                for error in errors {
                    println!();
                    for line in error.to_string().lines() {
                        println!("    {}", line);
                    }
                }
            }
        }

        let failed = cycle.count(TaskState::Fail);
        let summary_color = if failed > 0 { "\x1b[1;31m" } else { "\x1b[1;32m" };
        let mut parts = Vec::new();
        for (state, label) in [
            (TaskState::Pass, "passed"),
            (TaskState::Fail, "failed"),
            (TaskState::Skip, "skipped"),
            (TaskState::Todo, "todo"),
        ] {
            let count = cycle.count(state);
            if count > 0 {
                parts.push(format!("{} {}", count, label));
            }
        }
        if parts.is_empty() {
            parts.push("no tests ran".to_string());
        }
        println!();
        println!(
            "{}=================== {} in {:.2}s ===================\x1b[0m",
            summary_color,
            parts.join(", "),
            cycle.elapsed.as_secs_f64()
        );
    }

    fn on_error(&mut self, origin: ErrorOrigin, error: &TaskError) {
        eprintln!("\x1b[1;31m{}\x1b[0m {}", origin, error);
    }

    fn on_watcher_rerun(&mut self, files: &[PathBuf], trigger: &str) {
        println!();
        println!("\x1b[1;34m{}\x1b[0m ({} file(s))", trigger, files.len());
    }

    fn on_watcher_start(&mut self) {
        println!();
        println!("\x1b[2mWaiting for file changes... Press Ctrl-C to exit.\x1b[0m");
    }

    fn on_list(&mut self, files: &[TaskNode]) {
        for file in files {
            print!("{}", render_tree(file));
        }
    }

    fn on_run_complete(&mut self, summary: &RunSummary) {
        if summary.cycles == 0 {
            println!(
                "\x1b[1m=================== {} test(s) collected in {:.2}s ===================\x1b[0m",
                summary.collected,
                summary.duration.as_secs_f64()
            );
        }
        if summary.errors > 0 {
            eprintln!("\x1b[1;31m{} error(s) reported outside tests\x1b[0m", summary.errors);
        }
    }
}

// ============================================================================
// JSON
// ============================================================================

/// One JSON object per host event on stdout.
#[derive(Default)]
pub struct JsonReporter;

impl TestReporter for JsonReporter {
    fn on_event(&mut self, event: &HostEvent) {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(error) => tracing::warn!(%error, "failed to serialize host event"),
        }
    }

    fn on_collected(&mut self, _files: &[TaskNode]) {}

    fn on_cycle(&mut self, _cycle: &CheckerCycle) {}

    fn on_error(&mut self, _origin: ErrorOrigin, _error: &TaskError) {}

    fn on_run_complete(&mut self, summary: &RunSummary) {
        let line = serde_json::json!({
            "event": "summary",
            "collected": summary.collected,
            "passed": summary.passed,
            "failed": summary.failed,
            "skipped": summary.skipped,
            "todo": summary.todo,
            "errors": summary.errors,
            "success": summary.is_success(),
        });
        println!("{line}");
    }
}
