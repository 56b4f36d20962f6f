//! Test-file discovery: walk the project root and keep files matching the include globs.
//!
//! ## Notes
//! - Globs match paths relative to the root with `/` separators.
//! - Supported syntax: `**` (any number of directories), `*`, `?`, and `{a,b}` alternatives.

use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use miette::Diagnostic;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error, Diagnostic)]
#[error("invalid glob `{pattern}`")]
#[diagnostic(code(typetest::discovery::glob))]
pub struct GlobError {
    pub pattern: String,
    #[source]
    pub source: globset::Error,
}

/// Compiled include/exclude globs.
#[derive(Debug, Clone)]
pub struct TestGlobs {
    include: GlobSet,
    exclude: GlobSet,
}

impl TestGlobs {
    /// ## Errors
    /// Fails on the first pattern `globset` rejects.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, GlobError> {
        Ok(Self {
            include: build_set(include)?,
            exclude: build_set(exclude)?,
        })
    }

    pub fn is_match(&self, relative: &str) -> bool {
        self.include.is_match(relative) && !self.is_excluded(relative)
    }

    fn is_excluded(&self, relative: &str) -> bool {
        self.exclude.is_match(relative)
    }
}

/// `*` and `?` stop at `/`; only `**` crosses directories.
fn build_set(patterns: &[String]) -> Result<GlobSet, GlobError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|source| GlobError {
                pattern: pattern.clone(),
                source,
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| GlobError {
        pattern: patterns.join(", "),
        source,
    })
}

/// Expand `{a,b}` alternatives into separate globs, for consumers that do not understand braces.
///
/// ## Examples
/// ```rust
/// use typetest::discovery::expand_braces;
///
/// assert_eq!(expand_braces("*.{ts,js}"), vec!["*.ts", "*.js"]);
/// ```
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };

    let mut depth = 0usize;
    let mut close = None;
    let mut splits = Vec::new();
    for (i, c) in pattern[open..].char_indices() {
        let i = open + i;
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(i),
            _ => {}
        }
    }
    let Some(close) = close else {
        return vec![pattern.to_string()];
    };

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let mut bounds = vec![open];
    bounds.extend(splits);
    bounds.push(close);

    bounds
        .windows(2)
        .flat_map(|w| {
            let alternative = &pattern[w[0] + 1..w[1]];
            expand_braces(&format!("{prefix}{alternative}{suffix}"))
        })
        .collect()
}

/// Find every test file below `root`, sorted.
#[tracing::instrument(skip_all, fields(root = %root.display()))]
pub fn discover(root: &Path, globs: &TestGlobs) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let relative = relative_name(root, entry.path());
        !globs.is_excluded(&format!("{relative}/"))
    });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(%error, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if globs.is_match(&relative_name(root, entry.path())) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    tracing::debug!(files = files.len(), "discovered test files");
    files
}

/// Keep files whose relative path contains any of `filters`; no filters keeps everything.
pub fn filter_paths(root: &Path, files: Vec<PathBuf>, filters: &[String]) -> Vec<PathBuf> {
    if filters.is_empty() {
        return files;
    }
    files
        .into_iter()
        .filter(|file| {
            let relative = relative_name(root, file);
            filters.iter().any(|f| relative.contains(f.trim_start_matches("./")))
        })
        .collect()
}

fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
