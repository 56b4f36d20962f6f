//! Task-range collection: find `test`/`describe` calls statically and build the file's task tree.
//!
//! ## Notes
//! - Nothing here executes the test file. A declaration is recognized from its callee chain alone (`describe.skip`,
//!   `__vi_import_0__.test`, `(0, ns.it)`), and its name must be a string literal.
//! - Collection errors fail the whole file (the file task gets a failing result); parse errors become source errors
//!   for the file instead.
//! - Definitions keep the byte range of their call so diagnostics can be attributed later without re-parsing.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use miette::Diagnostic;
use regex::Regex;
use thiserror::Error;
use typetest_core::generate_hash;
use typetest_core::lang::modifiers::{self, ModeModifier, StaticSupport};
use typetest_core::lang::test_api::{self, DeclKind};
use typetest_syntax::SyntaxError;
use typetest_syntax::ast::{CallExpr, Expr, MemberProp, Program, Span, Spanned, TemplateLit};

use super::index_map::IndexMap;
use super::source_map::{NoSourceMaps, SourceMap, SourceMapResolver};
use super::tasks::{
    Location, RunMode, TaskError, TaskKind, TaskNode, assign_ids, interpret_task_modes, some_tasks_are_only,
};

/// Module-transform namespaces stripped from callee chains by default.
pub const DEFAULT_WRAPPER_PREFIXES: &[&str] = &["__vite_ssr_", "__vi_import_", "__vi_esm_"];

// ============================================================================
// Errors
// ============================================================================

/// A declaration that cannot be collected without running the file.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum CollectionError {
    #[error("`{callee}` cannot be collected statically: `.{modifier}` needs the test file to run")]
    #[diagnostic(
        code(typetest::collect::unsupported_modifier),
        help("declare each case with its own `test(...)` call")
    )]
    UnsupportedModifier {
        callee: String,
        modifier: String,
        offset: usize,
    },

    #[error("`{callee}` combines modifiers that cannot be evaluated statically")]
    #[diagnostic(code(typetest::collect::modifier_combination))]
    UnsupportedCombination { callee: String, offset: usize },

    #[error("`{callee}` is called without a name")]
    #[diagnostic(code(typetest::collect::missing_name))]
    MissingName { callee: String, offset: usize },

    #[error("`{callee}` must be named with a string literal to be collected statically")]
    #[diagnostic(
        code(typetest::collect::non_literal_name),
        help("template literals with `${{...}}` and computed names are only known at runtime")
    )]
    NonLiteralName { callee: String, offset: usize },
}

impl CollectionError {
    pub fn offset(&self) -> usize {
        match self {
            CollectionError::UnsupportedModifier { offset, .. }
            | CollectionError::UnsupportedCombination { offset, .. }
            | CollectionError::MissingName { offset, .. }
            | CollectionError::NonLiteralName { offset, .. } => *offset,
        }
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// Turns source text into a byte-ranged syntax tree.
pub trait SyntaxParser: Send + Sync {
    fn parse(&self, source: &str) -> Result<Program, Vec<SyntaxError>>;
}

/// Parses with `typetest_syntax`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSyntaxParser;

impl SyntaxParser for DefaultSyntaxParser {
    fn parse(&self, source: &str) -> Result<Program, Vec<SyntaxError>> {
        typetest_syntax::parse_source(source)
    }
}

/// Supplies the text of a test file.
pub trait SourceLoader: Send + Sync {
    fn load(&self, path: &Path) -> io::Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsSourceLoader;

impl SourceLoader for FsSourceLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

/// Strips module-transform wrapper segments from a callee chain so `__vi_import_0__.describe.skip` reads as
/// `describe.skip`.
pub trait CallTargetNormalizer: Send + Sync {
    fn normalize<'c>(&self, chain: &'c [String]) -> &'c [String];
}

/// Drops a leading segment that starts with a known wrapper prefix or equals a namespace alias.
#[derive(Debug, Clone)]
pub struct PrefixNormalizer {
    prefixes: Vec<String>,
    aliases: Vec<String>,
}

impl PrefixNormalizer {
    pub fn new(prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            aliases: Vec::new(),
        }
    }

    /// Also strip `alias` when it leads a chain (e.g. `import * as vt from 'vitest'`).
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }
}

impl Default for PrefixNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_WRAPPER_PREFIXES.iter().copied())
    }
}

impl CallTargetNormalizer for PrefixNormalizer {
    fn normalize<'c>(&self, chain: &'c [String]) -> &'c [String] {
        match chain.split_first() {
            Some((head, rest))
                if !rest.is_empty()
                    && (self.prefixes.iter().any(|p| head.starts_with(p.as_str())) || self.aliases.contains(head)) =>
            {
                rest
            }
            _ => chain,
        }
    }
}

// ============================================================================
// Collected data
// ============================================================================

/// One statically found `test`/`describe` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    /// Byte range `[start, end)` in the collected source.
    pub start: usize,
    pub end: usize,
    pub name: String,
    pub kind: DeclKind,
    pub mode: RunMode,
    /// Child indices from the file task to this definition's task.
    pub path: Vec<usize>,
}

impl TaskDefinition {
    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything collected from one file.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub filepath: PathBuf,
    pub source: String,
    pub source_map: Option<SourceMap>,
    pub definitions: Vec<TaskDefinition>,
    /// The file task, with modes already interpreted.
    pub file: TaskNode,
    pub index_map: IndexMap,
    /// Hash of the collected source, for cache invalidation.
    pub content_hash: String,
    pub has_only: bool,
    /// Parse errors. Reported as source errors, never attached to tasks.
    pub syntax_errors: Vec<TaskError>,
}

impl FileInfo {
    /// Whether the file parsed; diagnostics for unparsable files are reported as source errors.
    pub fn is_parsed(&self) -> bool {
        self.syntax_errors.is_empty()
    }
}

/// A declaration before it has been placed in the tree.
#[derive(Debug, Clone)]
struct FoundDeclaration {
    start: usize,
    end: usize,
    name: String,
    kind: DeclKind,
    mode: RunMode,
}

// ============================================================================
// Collector
// ============================================================================

/// Builds [`FileInfo`]s for one project.
#[derive(Clone)]
pub struct Collector {
    root: PathBuf,
    project: Option<String>,
    name_pattern: Option<Regex>,
    allow_only: bool,
    parser: Arc<dyn SyntaxParser>,
    loader: Arc<dyn SourceLoader>,
    source_maps: Arc<dyn SourceMapResolver>,
    normalizer: Arc<dyn CallTargetNormalizer>,
}

impl Collector {
    /// Create a collector for files under `root` with the default collaborators and no source maps.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            project: None,
            name_pattern: None,
            allow_only: false,
            parser: Arc::new(DefaultSyntaxParser),
            loader: Arc::new(FsSourceLoader),
            source_maps: Arc::new(NoSourceMaps),
            normalizer: Arc::new(PrefixNormalizer::default()),
        }
    }

    pub fn with_project(mut self, project: Option<String>) -> Self {
        self.project = project;
        self
    }

    pub fn with_name_pattern(mut self, pattern: Option<Regex>) -> Self {
        self.name_pattern = pattern;
        self
    }

    pub fn with_allow_only(mut self, allow_only: bool) -> Self {
        self.allow_only = allow_only;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn SyntaxParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn SourceLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_source_maps(mut self, resolver: Arc<dyn SourceMapResolver>) -> Self {
        self.source_maps = resolver;
        self
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn CallTargetNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    /// Path of `path` relative to the root, with `/` separators.
    pub fn relative_name(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative.to_string_lossy().replace('\\', "/")
    }

    /// Stable id of the file task for `path`.
    pub fn file_id(&self, path: &Path) -> String {
        let relative = self.relative_name(path);
        match &self.project {
            Some(project) => generate_hash(&format!("{relative}{project}:__typecheck__")),
            None => generate_hash(&format!("{relative}__typecheck__")),
        }
    }

    /// Load and collect one file.
    ///
    /// A file that cannot be read yields a failing file task; it never aborts the batch.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn collect_file(&self, path: &Path) -> FileInfo {
        match self.loader.load(path) {
            Ok(source) => self.collect_source(path, source),
            Err(error) => {
                tracing::warn!(%error, "failed to read test file");
                let mut info = self.empty_file(path, String::new());
                info.file.record_error(TaskError::new(
                    "CollectionError",
                    format!("Failed to read {}: {error}", path.display()),
                ));
                info
            }
        }
    }

    /// Collect `source` as the contents of `path`.
    pub fn collect_source(&self, path: &Path, source: String) -> FileInfo {
        let mut info = self.empty_file(path, source);

        let program = match self.parser.parse(&info.source) {
            Ok(program) => program,
            Err(errors) => {
                tracing::debug!(errors = errors.len(), "test file failed to parse");
                info.syntax_errors = errors
                    .iter()
                    .map(|e| located_error("SyntaxError", &e.message, path, &info.index_map, e.span.start))
                    .collect();
                return info;
            }
        };

        let (found, errors) = self.find_declarations(&program);
        if !errors.is_empty() {
            for error in &errors {
                let task_error =
                    located_error("CollectionError", &error.to_string(), path, &info.index_map, error.offset());
                info.file.record_error(task_error);
            }
            return info;
        }

        info.definitions = build_tree(&mut info.file, found);
        assign_ids(&mut info.file);
        info.has_only = some_tasks_are_only(&info.file);
        interpret_task_modes(&mut info.file, self.name_pattern.as_ref(), self.allow_only);
        info.source_map = self.source_maps.resolve(path, &info.source);

        tracing::debug!(
            definitions = info.definitions.len(),
            has_only = info.has_only,
            source_map = info.source_map.is_some(),
            "collected test file"
        );
        info
    }

    fn empty_file(&self, path: &Path, source: String) -> FileInfo {
        let file = TaskNode::file(self.file_id(path), self.relative_name(path));
        FileInfo {
            filepath: path.to_path_buf(),
            index_map: IndexMap::build(&source),
            content_hash: generate_hash(&source),
            source,
            source_map: None,
            definitions: Vec::new(),
            file,
            has_only: false,
            syntax_errors: Vec::new(),
        }
    }

    // ========================================================================
    // Declaration matching
    // ========================================================================

    fn find_declarations(&self, program: &Program) -> (Vec<FoundDeclaration>, Vec<CollectionError>) {
        let calls = program.calls();

        // `test.skipIf(cond)` in `test.skipIf(cond)('name', fn)` is a curry step, not a declaration.
        let curry_steps: HashSet<Span> = calls
            .iter()
            .filter_map(|(_, call)| match &call.callee.node {
                Expr::Call(_) => Some(call.callee.span),
                _ => None,
            })
            .collect();

        let mut found = Vec::new();
        let mut errors = Vec::new();
        for (node, call) in calls {
            if curry_steps.contains(&node.span) {
                continue;
            }
            match self.classify(node, call) {
                Ok(Some(declaration)) => found.push(declaration),
                Ok(None) => {}
                Err(error) => errors.push(error),
            }
        }
        (found, errors)
    }

    fn classify(&self, node: &Spanned<Expr>, call: &CallExpr) -> Result<Option<FoundDeclaration>, CollectionError> {
        let (target, curried, start) = match &call.callee.node {
            Expr::Call(inner) => (inner.callee.as_ref(), true, call.callee.span.end),
            Expr::TaggedTemplate { tag, .. } => (tag.as_ref(), true, call.callee.span.end),
            _ => (call.callee.as_ref(), false, node.span.start),
        };

        let Some(chain) = callee_chain(target) else {
            return Ok(None);
        };
        let chain = self.normalizer.normalize(&chain);
        let Some((head, rest)) = chain.split_first() else {
            return Ok(None);
        };
        let Some(api) = test_api::from_str(head) else {
            return Ok(None);
        };
        let mut applied = Vec::with_capacity(rest.len());
        for segment in rest {
            match modifiers::from_str(segment) {
                Some(id) => applied.push(id),
                // `test.name`, `describe.prototype`, ...
                None => return Ok(None),
            }
        }

        let callee = chain.join(".");
        if applied
            .iter()
            .any(|id| modifiers::support(*id) == StaticSupport::NotADeclaration)
        {
            return Ok(None);
        }
        if let Some(id) = applied
            .iter()
            .find(|id| modifiers::support(**id) == StaticSupport::Unsupported)
        {
            return Err(CollectionError::UnsupportedModifier {
                callee,
                modifier: modifiers::as_str(*id).to_string(),
                offset: start,
            });
        }
        if applied.len() > 1 {
            return Err(CollectionError::UnsupportedCombination { callee, offset: start });
        }

        let mode = match (applied.first().map(|id| modifiers::support(*id)), curried) {
            (None, false) => RunMode::Run,
            (Some(StaticSupport::Mode(modifier)), false) => mode_for(modifier),
            // The predicate cannot be evaluated, so the declaration is always skipped.
            (Some(StaticSupport::Conditional), true) => RunMode::Skip,
            _ => return Ok(None),
        };

        let name = match call.args.first().map(|arg| &arg.node) {
            Some(Expr::Str(name)) => name.clone(),
            Some(Expr::Template(TemplateLit { cooked: Some(name), .. })) => name.clone(),
            Some(_) => return Err(CollectionError::NonLiteralName { callee, offset: start }),
            None => return Err(CollectionError::MissingName { callee, offset: start }),
        };

        Ok(Some(FoundDeclaration {
            start,
            end: node.span.end,
            name,
            kind: test_api::kind(api),
            mode,
        }))
    }
}

fn mode_for(modifier: ModeModifier) -> RunMode {
    match modifier {
        ModeModifier::Skip => RunMode::Skip,
        ModeModifier::Only => RunMode::Only,
        ModeModifier::Todo => RunMode::Todo,
    }
}

/// Flatten a callee into its dotted segments, unwrapping `(0, target)` sequences.
fn callee_chain(expr: &Spanned<Expr>) -> Option<Vec<String>> {
    match &expr.node {
        Expr::Ident(name) => Some(vec![name.clone()]),
        Expr::Member { object, property } => {
            let mut chain = callee_chain(object)?;
            match property {
                MemberProp::Name(name) => chain.push(name.clone()),
                MemberProp::Computed(inner) => match &inner.node {
                    Expr::Str(name) => chain.push(name.clone()),
                    _ => return None,
                },
            }
            Some(chain)
        }
        Expr::Paren(items) => callee_chain(items.last()?),
        _ => None,
    }
}

// ============================================================================
// Tree construction
// ============================================================================

struct SuiteFrame {
    path: Vec<usize>,
    end: usize,
    mode: RunMode,
    last_child_end: usize,
}

/// Place declarations under their nearest enclosing suite.
///
/// Declarations are visited by ascending start. A declaration nests in the current suite while the suite's end is at
/// or after the declaration's end; otherwise suites are popped until one encloses it.
fn build_tree(file: &mut TaskNode, mut found: Vec<FoundDeclaration>) -> Vec<TaskDefinition> {
    found.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut stack = vec![SuiteFrame {
        path: Vec::new(),
        end: usize::MAX,
        mode: RunMode::Run,
        last_child_end: 0,
    }];
    let mut definitions = Vec::with_capacity(found.len());

    for declaration in found {
        while stack.len() > 1 && stack.last().is_some_and(|frame| frame.end < declaration.end) {
            stack.pop();
        }
        let Some(parent) = stack.last_mut() else {
            break;
        };
        if declaration.start < parent.last_child_end {
            tracing::warn!(
                name = %declaration.name,
                start = declaration.start,
                "declaration overlaps its previous sibling; attribution uses the smallest enclosing range"
            );
        }
        parent.last_child_end = parent.last_child_end.max(declaration.end);

        let mode = match parent.mode {
            RunMode::Skip | RunMode::Todo => parent.mode,
            RunMode::Run | RunMode::Only => declaration.mode,
        };
        let kind = match declaration.kind {
            DeclKind::Suite => TaskKind::Suite,
            DeclKind::Test => TaskKind::Test,
        };
        let Some(parent_node) = file.get_mut(&parent.path) else {
            continue;
        };
        parent_node.children.push(TaskNode::new(kind, declaration.name.clone(), mode));
        let mut path = parent.path.clone();
        path.push(parent_node.children.len() - 1);

        if declaration.kind == DeclKind::Suite {
            stack.push(SuiteFrame {
                path: path.clone(),
                end: declaration.end,
                mode,
                last_child_end: declaration.start,
            });
        }
        definitions.push(TaskDefinition {
            start: declaration.start,
            end: declaration.end,
            name: declaration.name,
            kind: declaration.kind,
            mode,
            path,
        });
    }
    definitions
}

fn located_error(name: &str, message: &str, path: &Path, index_map: &IndexMap, offset: usize) -> TaskError {
    let error = TaskError::new(name, message);
    match index_map.position(offset) {
        Some((line, column)) => error.with_location(Location {
            file: path.to_path_buf(),
            line,
            column,
        }),
        None => error,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::runner::tasks::TaskState;

    fn collect(source: &str) -> FileInfo {
        Collector::new("/project").collect_source(Path::new("/project/src/a.test-d.ts"), source.to_string())
    }

    fn names(node: &TaskNode) -> Vec<String> {
        node.children.iter().map(|c| c.name.clone()).collect()
    }

    #[test]
    fn test_nested_suites_and_tests() {
        let info = collect(
            "describe('math', () => {\n  test('adds', () => {})\n  describe('inner', () => {\n    it('deep', () => {})\n  })\n})\ntest('top', () => {})\n",
        );
        assert_eq!(names(&info.file), vec!["math", "top"]);
        assert_eq!(names(&info.file.children[0]), vec!["adds", "inner"]);
        assert_eq!(names(&info.file.children[0].children[1]), vec!["deep"]);
        assert_eq!(info.definitions.len(), 5);
        assert_eq!(info.definitions[3].path, vec![0, 1, 0]);
    }

    #[test]
    fn test_definition_range_is_the_call() {
        let source = "  test('a', () => {})\n";
        let info = collect(source);
        let def = &info.definitions[0];
        assert_eq!(&source[def.start..def.end], "test('a', () => {})");
    }

    #[test]
    fn test_file_id_and_child_ids() {
        let info = collect("test('a', () => {})");
        assert_eq!(info.file.id, generate_hash("src/a.test-d.ts__typecheck__"));
        assert_eq!(info.file.name, "src/a.test-d.ts");
        assert_eq!(info.file.children[0].id, format!("{}_0", info.file.id));
    }

    #[test]
    fn test_project_changes_file_id() {
        let collector = Collector::new("/project").with_project(Some("web".to_string()));
        let info = collector.collect_source(Path::new("/project/a.test-d.ts"), "test('a', fn)".to_string());
        assert_eq!(info.file.id, generate_hash("a.test-d.tsweb:__typecheck__"));
    }

    #[test]
    fn test_modes_inherit_from_skipped_suite() {
        let info = collect("describe.skip('s', () => { test('a', () => {}) })");
        assert_eq!(info.file.children[0].mode, RunMode::Skip);
        assert_eq!(info.file.children[0].children[0].mode, RunMode::Skip);
    }

    #[test]
    fn test_skip_if_is_always_skipped() {
        let source = "test.skipIf(process.env.CI)('flaky', () => {})";
        let info = collect(source);
        assert_eq!(info.definitions.len(), 1);
        let def = &info.definitions[0];
        assert_eq!(def.mode, RunMode::Skip);
        assert_eq!(&source[def.start..def.end], "('flaky', () => {})");
    }

    #[test]
    fn test_wrapped_namespace_and_sequence_callee() {
        let info = collect("__vi_import_0__.describe('s', () => { (0, __vi_import_0__.it)('a', () => {}) })");
        assert_eq!(names(&info.file), vec!["s"]);
        assert_eq!(names(&info.file.children[0]), vec!["a"]);
    }

    #[test]
    fn test_alias_normalizer() {
        let collector =
            Collector::new("/p").with_normalizer(Arc::new(PrefixNormalizer::default().with_alias("vitest")));
        let info = collector.collect_source(Path::new("/p/a.ts"), "vitest.test('a', fn)".to_string());
        assert_eq!(names(&info.file), vec!["a"]);
    }

    #[test]
    fn test_unrelated_calls_are_ignored() {
        let info = collect("test.extend({})\nexpect(test.name).toBe('x')\nfoo('bar', () => {})");
        assert!(info.definitions.is_empty());
        assert!(info.file.result.is_none());
    }

    #[test]
    fn test_each_fails_collection() {
        let info = collect("test.each([1, 2])('case %i', (n) => {})");
        let result = info.file.result.as_ref().unwrap();
        assert_eq!(result.state, TaskState::Fail);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains(".each"));
        assert!(info.definitions.is_empty());
    }

    #[test]
    fn test_tagged_each_fails_collection() {
        let info = collect("test.each`\n a | b\n`('row', () => {})");
        assert_eq!(info.file.state(), Some(TaskState::Fail));
    }

    #[test]
    fn test_modifier_combination_fails_collection() {
        let info = collect("test.skip.only('x', () => {})");
        let errors = &info.file.result.as_ref().unwrap().errors;
        assert!(errors[0].message.contains("combines modifiers"));
    }

    #[test]
    fn test_non_literal_name_fails_collection() {
        let info = collect("const n = 'x'\ntest(`case ${n}`, () => {})");
        let errors = &info.file.result.as_ref().unwrap().errors;
        assert_eq!(errors[0].name, "CollectionError");
        let location = errors[0].location.as_ref().unwrap();
        assert_eq!((location.line, location.column), (2, 0));
    }

    #[test]
    fn test_plain_template_name_is_literal() {
        let info = collect("test(`plain`, () => {})");
        assert_eq!(names(&info.file), vec!["plain"]);
    }

    #[test]
    fn test_parse_errors_become_syntax_errors() {
        let info = collect("test('a', () => {");
        assert!(!info.is_parsed());
        assert!(info.file.result.is_none());
        assert_eq!(info.syntax_errors[0].name, "SyntaxError");
    }

    #[test]
    fn test_only_is_detected() {
        let info = Collector::new("/project")
            .with_allow_only(true)
            .collect_source(Path::new("/project/a.ts"), "test.only('a', fn)\ntest('b', fn)".to_string());
        assert!(info.has_only);
        assert_eq!(info.file.children[1].mode, RunMode::Skip);
    }
}
