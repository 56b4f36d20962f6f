//! Parse checker output (`--pretty false`) into per-file diagnostics.
//!
//! ## Notes
//! - A diagnostic starts with `<file>(<line>,<col>): <severity> TS<code>: <message>`. Lines that begin with whitespace
//!   continue the previous diagnostic's message.
//! - Every other line (timestamps, watch banners, the completion line) is ignored, so a clean cycle parses to an empty
//!   map.
//! - Positions are kept exactly as reported: 1-based, in the checked file's coordinates.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Watch-mode marker printed when the checker starts a new cycle.
pub const RERUN_MARKER: &str = "File change detected";

static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^([^\n]+?)\((\d+),(\d+)\):\s*(error|warning|message)\s+TS(\d+):\s*(.*)$")
        .expect("INVARIANT: diagnostic header regex is valid")
});

static NO_CALL_SIGNATURES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\r?\n\s*(Type .* has no call signatures)")
        .expect("INVARIANT: call-signature regex is valid")
});

static CYCLE_COMPLETE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Found \w+ errors*\. Watching for").expect("INVARIANT: completion regex is valid")
});

static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n").expect("INVARIANT: line-break regex is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Message,
}

impl Severity {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "error" => Some(Severity::Error),
            "warning" => Some(Severity::Warning),
            "message" => Some(Severity::Message),
            _ => None,
        }
    }
}

/// One located checker finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
    pub severity: Severity,
    pub code: u32,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{} TS{}: {}",
            self.file.display(),
            self.line,
            self.column,
            self.code,
            self.message
        )
    }
}

/// Whether `buffer` holds a complete watch-mode cycle.
pub fn is_cycle_complete(buffer: &str) -> bool {
    CYCLE_COMPLETE.is_match(buffer)
}

/// Whether `buffer` shows the checker's watcher starting a new cycle.
pub fn is_rerun_triggered(buffer: &str) -> bool {
    buffer.contains(RERUN_MARKER)
}

/// Parse one cycle of checker output.
///
/// ## Parameters
/// - `output`: the accumulated stdout of the cycle.
/// - `root`: directory relative file paths are resolved against.
///
/// ## Returns
/// Diagnostics grouped by absolute file path, in the order the checker printed them.
#[tracing::instrument(skip_all, fields(output_len = output.len()))]
pub fn parse_diagnostics(output: &str, root: &Path) -> BTreeMap<PathBuf, Vec<Diagnostic>> {
    let mut entries: Vec<String> = Vec::new();
    for line in LINE_BREAK.split(output) {
        let continues = line.starts_with(char::is_whitespace) && !line.trim().is_empty();
        match entries.last_mut() {
            Some(previous) if continues => {
                previous.push('\n');
                previous.push_str(line);
            }
            _ => entries.push(line.to_string()),
        }
    }

    let mut out: BTreeMap<PathBuf, Vec<Diagnostic>> = BTreeMap::new();
    for entry in &entries {
        let Some(diagnostic) = parse_entry(entry, root) else {
            continue;
        };
        out.entry(diagnostic.file.clone()).or_default().push(diagnostic);
    }
    tracing::debug!(files = out.len(), "parsed checker output");
    out
}

fn parse_entry(entry: &str, root: &Path) -> Option<Diagnostic> {
    let folded = NO_CALL_SIGNATURES.replace(entry, " $1");
    let captures = HEADER.captures(&folded)?;

    let file = Path::new(captures.get(1)?.as_str().trim());
    let file = if file.is_absolute() {
        file.to_path_buf()
    } else {
        root.join(file)
    };
    Some(Diagnostic {
        file,
        line: captures.get(2)?.as_str().parse().ok()?,
        column: captures.get(3)?.as_str().parse().ok()?,
        severity: Severity::parse(captures.get(4)?.as_str())?,
        code: captures.get(5)?.as_str().parse().ok()?,
        message: captures.get(6)?.as_str().trim_end().to_string(),
    })
}
