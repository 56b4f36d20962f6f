//! Attribute checker diagnostics to the tasks whose source ranges contain them.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::collect::FileInfo;
use super::diagnostics::Diagnostic;
use super::tasks::{Location, TYPECHECK_ERROR_NAME, TaskError, TaskNode, mark_passed};

/// Finished trees and source errors for one checker cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attribution {
    /// One tree per requested file, in path order.
    pub files: Vec<TaskNode>,
    /// Diagnostics that could not be attached to a task.
    pub source_errors: Vec<TaskError>,
}

/// Attach every diagnostic to a task of the requested files, or report it as a source error.
///
/// ## Notes
/// - Each call works on clones of the collected trees; the collected [`FileInfo`]s are never mutated.
/// - Positions go through the file's source map first (generated to original). A position the map does not cover is
///   used as reported.
/// - The smallest definition whose `[start, end)` range holds the offset wins; with none, the file task takes it.
/// - Tasks left without a result afterwards pass (or take their `skip`/`todo` state).
/// - Files that failed to parse keep no task results; their parse errors and diagnostics become source errors.
#[tracing::instrument(skip_all, fields(files = files.len(), diagnostic_files = diagnostics.len()))]
pub fn attribute(
    files: &BTreeMap<PathBuf, Arc<FileInfo>>,
    diagnostics: &BTreeMap<PathBuf, Vec<Diagnostic>>,
) -> Attribution {
    let mut out = Attribution::default();

    for (path, info) in files {
        let found = diagnostics.get(path).map(Vec::as_slice).unwrap_or_default();
        let mut tree = info.file.clone();

        if !info.is_parsed() {
            out.source_errors.extend(info.syntax_errors.iter().cloned());
            out.source_errors.extend(found.iter().map(raw_error));
            out.files.push(tree);
            continue;
        }

        for diagnostic in found {
            attribute_one(info, &mut tree, diagnostic);
        }
        mark_passed(&mut tree);
        out.files.push(tree);
    }

    for (path, found) in diagnostics {
        if !files.contains_key(path) {
            out.source_errors.extend(found.iter().map(raw_error));
        }
    }

    tracing::debug!(
        files = out.files.len(),
        source_errors = out.source_errors.len(),
        "attributed diagnostics"
    );
    out
}

fn attribute_one(info: &FileInfo, tree: &mut TaskNode, diagnostic: &Diagnostic) {
    let (line, column) = match &info.source_map {
        Some(map) => match map.original_position_for(diagnostic.line, diagnostic.column) {
            Some(position) => (position.line, position.column),
            None => (diagnostic.line, diagnostic.column),
        },
        None => (diagnostic.line, diagnostic.column),
    };

    let path: &[usize] = info
        .index_map
        .offset(line, column)
        .and_then(|offset| {
            info.definitions
                .iter()
                .filter(|definition| definition.contains(offset))
                .min_by_key(|definition| definition.len())
        })
        .map(|definition| definition.path.as_slice())
        .unwrap_or_default();

    let error = TaskError::new(TYPECHECK_ERROR_NAME, diagnostic.message.clone()).with_location(Location {
        file: info.filepath.clone(),
        line,
        column,
    });
    let Some(task) = tree.get_mut(path) else {
        tracing::warn!(?path, "definition path is not in the task tree");
        return;
    };
    if !task.record_error(error) {
        return;
    }
    for depth in (0..path.len()).rev() {
        if let Some(ancestor) = tree.get_mut(&path[..depth]) {
            ancestor.mark_failed();
        }
    }
}

fn raw_error(diagnostic: &Diagnostic) -> TaskError {
    TaskError::new(TYPECHECK_ERROR_NAME, diagnostic.message.clone()).with_location(Location {
        file: diagnostic.file.clone(),
        line: diagnostic.line,
        column: diagnostic.column,
    })
}
