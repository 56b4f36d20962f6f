//! Task tree model: files, suites and tests with run modes and results.
//!
//! A collected file is a [`TaskNode`] of kind [`TaskKind::File`] whose children are the suites and tests declared in
//! it. Each checker cycle works on a clone of the collected tree, so results never leak from one cycle into the next.

use std::fmt;
use std::path::PathBuf;

use regex::Regex;
use serde::Serialize;

/// Error name used for diagnostics attached to tasks.
pub const TYPECHECK_ERROR_NAME: &str = "TypeCheckError";

/// Message attached to `.only` tasks when `.only` is not allowed.
pub const UNEXPECTED_ONLY_MESSAGE: &str =
    "Unexpected .only modifier. Remove it or pass --allow-only argument to bypass this error";

// ============================================================================
// Modes, states and errors
// ============================================================================

/// Static run mode of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Run,
    Skip,
    Only,
    Todo,
}

impl RunMode {
    /// `run` and `only` tasks take part in the run; `skip` and `todo` tasks do not.
    pub fn is_active(self) -> bool {
        matches!(self, RunMode::Run | RunMode::Only)
    }

    /// State a task with this mode ends up in when nothing fails it.
    pub fn settled_state(self) -> TaskState {
        match self {
            RunMode::Run | RunMode::Only => TaskState::Pass,
            RunMode::Skip => TaskState::Skip,
            RunMode::Todo => TaskState::Todo,
        }
    }
}

/// Result state of a task after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pass,
    Fail,
    Skip,
    Todo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    File,
    Suite,
    Test,
}

/// Where an error was reported, 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

/// An error attached to a task or reported on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskError {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl TaskError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)?;
        if let Some(location) = &self.location {
            write!(
                f,
                "\n    at {}:{}:{}",
                location.file.display(),
                location.line,
                location.column
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub state: TaskState,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<TaskError>,
}

impl TaskResult {
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            errors: Vec::new(),
        }
    }
}

// ============================================================================
// Task tree
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskNode {
    pub id: String,
    pub name: String,
    pub kind: TaskKind,
    pub mode: RunMode,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TaskNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

impl TaskNode {
    /// Create a file root.
    pub fn file(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: TaskKind::File,
            mode: RunMode::Run,
            children: Vec::new(),
            result: None,
        }
    }

    /// Create a suite or test. Its id is assigned by [`assign_ids`] once the tree is complete.
    pub fn new(kind: TaskKind, name: impl Into<String>, mode: RunMode) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            kind,
            mode,
            children: Vec::new(),
            result: None,
        }
    }

    /// Files and suites can hold children.
    pub fn is_suite(&self) -> bool {
        self.kind != TaskKind::Test
    }

    pub fn state(&self) -> Option<TaskState> {
        self.result.as_ref().map(|r| r.state)
    }

    /// Follow child indices from this node.
    pub fn get(&self, path: &[usize]) -> Option<&TaskNode> {
        path.iter().try_fold(self, |node, &i| node.children.get(i))
    }

    pub fn get_mut(&mut self, path: &[usize]) -> Option<&mut TaskNode> {
        path.iter().try_fold(self, |node, &i| node.children.get_mut(i))
    }

    /// Visit this node and every descendant in pre-order.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a TaskNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    pub fn find(&self, id: &str) -> Option<&TaskNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Whether any task in this tree failed.
    pub fn has_failed(&self) -> bool {
        self.state() == Some(TaskState::Fail) || self.children.iter().any(TaskNode::has_failed)
    }

    /// Record `error` on this task.
    ///
    /// ## Returns
    /// `true` when the task is now failing. Inactive (`skip`/`todo`) tasks keep their mode-derived state; the error is
    /// still recorded.
    pub fn record_error(&mut self, error: TaskError) -> bool {
        let state = if self.mode.is_active() {
            TaskState::Fail
        } else {
            self.mode.settled_state()
        };
        let result = self.result.get_or_insert_with(|| TaskResult::new(state));
        result.state = state;
        result.errors.push(error);
        state == TaskState::Fail
    }

    /// Mark this task failed without adding an error, keeping the errors it already has.
    pub fn mark_failed(&mut self) {
        if !self.mode.is_active() {
            return;
        }
        match &mut self.result {
            Some(result) => result.state = TaskState::Fail,
            None => self.result = Some(TaskResult::new(TaskState::Fail)),
        }
    }
}

/// One `(id, result)` entry of an `updated` batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskPack {
    pub id: String,
    pub result: Option<TaskResult>,
}

/// Give every descendant of `node` the id `<parent id>_<index>`.
pub fn assign_ids(node: &mut TaskNode) {
    let parent = node.id.clone();
    for (index, child) in node.children.iter_mut().enumerate() {
        child.id = format!("{parent}_{index}");
        assign_ids(child);
    }
}

/// Flatten a tree into the packs sent in `updated` batches, root first.
pub fn packs(root: &TaskNode) -> Vec<TaskPack> {
    let mut out = Vec::new();
    root.walk(&mut |node| {
        out.push(TaskPack {
            id: node.id.clone(),
            result: node.result.clone(),
        })
    });
    out
}

/// Settle every task that has no result yet: active tasks pass, inactive tasks take their mode's state.
pub fn mark_passed(node: &mut TaskNode) {
    if node.result.is_none() {
        node.result = Some(TaskResult::new(node.mode.settled_state()));
    }
    for child in &mut node.children {
        mark_passed(child);
    }
}

// ============================================================================
// Mode interpretation
// ============================================================================

/// Whether any task below `node` is marked `only`.
pub fn some_tasks_are_only(node: &TaskNode) -> bool {
    node.children
        .iter()
        .any(|t| t.mode == RunMode::Only || (t.is_suite() && some_tasks_are_only(t)))
}

/// Apply `only` dominance, the name pattern and suite-level skips to a freshly collected file.
///
/// ## Notes
/// - When any task is `only`, `run` tasks outside an `only` subtree become `skip` and `only` tasks become `run`.
/// - Without `allow_only`, every `only` task gets a failing result explaining the problem.
/// - The name pattern is matched against the space-joined names of the enclosing suites and the test.
/// - A `run` suite whose children are all inactive becomes `skip`.
pub fn interpret_task_modes(file: &mut TaskNode, name_pattern: Option<&Regex>, allow_only: bool) {
    let only_mode = some_tasks_are_only(file);
    let mut names = Vec::new();
    traverse_suite(file, false, only_mode, name_pattern, allow_only, &mut names);
}

fn traverse_suite(
    suite: &mut TaskNode,
    parent_is_only: bool,
    only_mode: bool,
    name_pattern: Option<&Regex>,
    allow_only: bool,
    names: &mut Vec<String>,
) {
    let suite_is_only = parent_is_only || suite.mode == RunMode::Only;

    for task in &mut suite.children {
        let include = suite_is_only || task.mode == RunMode::Only;

        if only_mode {
            if task.is_suite() && (include || some_tasks_are_only(task)) {
                if task.mode == RunMode::Only {
                    check_allow_only(task, allow_only);
                    task.mode = RunMode::Run;
                }
            } else if task.mode == RunMode::Run && !include {
                task.mode = RunMode::Skip;
            } else if task.mode == RunMode::Only {
                check_allow_only(task, allow_only);
                task.mode = RunMode::Run;
            }
        }

        if !task.is_suite() {
            if let Some(pattern) = name_pattern {
                names.push(task.name.clone());
                let full_name = names.join(" ");
                names.pop();
                if !pattern.is_match(&full_name) {
                    task.mode = RunMode::Skip;
                }
            }
        } else if !task.mode.is_active() {
            let mode = task.mode;
            settle_descendants(task, mode);
        } else {
            names.push(task.name.clone());
            traverse_suite(task, include, only_mode, name_pattern, allow_only, names);
            names.pop();
        }
    }

    if suite.mode == RunMode::Run
        && !suite.children.is_empty()
        && suite.children.iter().all(|t| t.mode != RunMode::Run)
    {
        suite.mode = RunMode::Skip;
    }
}

fn settle_descendants(suite: &mut TaskNode, mode: RunMode) {
    for task in &mut suite.children {
        if task.mode.is_active() {
            task.mode = mode;
            if task.is_suite() {
                settle_descendants(task, mode);
            }
        }
    }
}

fn check_allow_only(task: &mut TaskNode, allow_only: bool) {
    if allow_only {
        return;
    }
    task.result = Some(TaskResult {
        state: TaskState::Fail,
        errors: vec![TaskError::new("Error", UNEXPECTED_ONLY_MESSAGE)],
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test(name: &str, mode: RunMode) -> TaskNode {
        TaskNode::new(TaskKind::Test, name, mode)
    }

    fn suite(name: &str, mode: RunMode, children: Vec<TaskNode>) -> TaskNode {
        let mut node = TaskNode::new(TaskKind::Suite, name, mode);
        node.children = children;
        node
    }

    fn file(children: Vec<TaskNode>) -> TaskNode {
        let mut node = TaskNode::file("f", "a.test-d.ts");
        node.children = children;
        assign_ids(&mut node);
        node
    }

    #[test]
    fn test_ids_follow_child_indices() {
        let root = file(vec![suite("s", RunMode::Run, vec![test("a", RunMode::Run)]), test("b", RunMode::Run)]);
        assert_eq!(root.children[0].id, "f_0");
        assert_eq!(root.children[0].children[0].id, "f_0_0");
        assert_eq!(root.children[1].id, "f_1");
    }

    #[test]
    fn test_only_dominance_skips_the_rest() {
        let mut root = file(vec![test("a", RunMode::Only), test("b", RunMode::Run)]);
        interpret_task_modes(&mut root, None, true);
        assert_eq!(root.children[0].mode, RunMode::Run);
        assert_eq!(root.children[1].mode, RunMode::Skip);
        assert!(root.children[0].result.is_none());
    }

    #[test]
    fn test_only_without_allow_only_fails_the_task() {
        let mut root = file(vec![test("a", RunMode::Only)]);
        interpret_task_modes(&mut root, None, false);
        let result = root.children[0].result.as_ref().unwrap();
        assert_eq!(result.state, TaskState::Fail);
        assert_eq!(result.errors[0].message, UNEXPECTED_ONLY_MESSAGE);
    }

    #[test]
    fn test_children_of_only_suite_stay_included() {
        let mut root = file(vec![
            suite("s", RunMode::Only, vec![test("a", RunMode::Run)]),
            test("b", RunMode::Run),
        ]);
        interpret_task_modes(&mut root, None, true);
        assert_eq!(root.children[0].children[0].mode, RunMode::Run);
        assert_eq!(root.children[1].mode, RunMode::Skip);
    }

    #[test]
    fn test_name_pattern_uses_full_name() {
        let mut root = file(vec![suite(
            "math",
            RunMode::Run,
            vec![test("adds", RunMode::Run), test("subtracts", RunMode::Run)],
        )]);
        let pattern = Regex::new("math adds").unwrap();
        interpret_task_modes(&mut root, Some(&pattern), false);
        assert_eq!(root.children[0].children[0].mode, RunMode::Run);
        assert_eq!(root.children[0].children[1].mode, RunMode::Skip);
    }

    #[test]
    fn test_suite_with_only_inactive_children_is_skipped() {
        let mut root = file(vec![suite("s", RunMode::Run, vec![test("a", RunMode::Todo)])]);
        interpret_task_modes(&mut root, None, false);
        assert_eq!(root.children[0].mode, RunMode::Skip);
        assert_eq!(root.mode, RunMode::Skip);
    }

    #[test]
    fn test_todo_suite_marks_descendants_todo() {
        let mut root = file(vec![suite(
            "s",
            RunMode::Todo,
            vec![test("a", RunMode::Run), test("b", RunMode::Skip)],
        )]);
        interpret_task_modes(&mut root, None, false);
        assert_eq!(root.children[0].children[0].mode, RunMode::Todo);
        assert_eq!(root.children[0].children[1].mode, RunMode::Skip);
    }

    #[test]
    fn test_record_error_respects_inactive_modes() {
        let mut skipped = test("a", RunMode::Skip);
        assert!(!skipped.record_error(TaskError::new(TYPECHECK_ERROR_NAME, "boom")));
        let result = skipped.result.unwrap();
        assert_eq!(result.state, TaskState::Skip);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_mark_passed_keeps_existing_results() {
        let mut root = file(vec![test("a", RunMode::Run), test("b", RunMode::Skip)]);
        root.children[0].record_error(TaskError::new(TYPECHECK_ERROR_NAME, "boom"));
        mark_passed(&mut root);
        assert_eq!(root.children[0].state(), Some(TaskState::Fail));
        assert_eq!(root.children[1].state(), Some(TaskState::Skip));
        assert_eq!(root.state(), Some(TaskState::Pass));
    }

    #[test]
    fn test_packs_are_pre_order() {
        let root = file(vec![suite("s", RunMode::Run, vec![test("a", RunMode::Run)])]);
        let ids: Vec<String> = packs(&root).into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["f", "f_0", "f_0_0"]);
    }
}
