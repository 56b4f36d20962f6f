//! CLI module for typetest
//!
//! ## Usage
//!
//! - `typetest [PATHS]...` - Type-check every test file (optionally filtered by path substrings) once
//! - `typetest --watch` - Keep the checker running and report every cycle until Ctrl-C
//! - `typetest --list` - Collect and print the test trees without running the checker
//!
//! ## Modules
//!
//! - `commands` - Session setup and the collect/run/watch flows
//! - `reporter` - Console and JSON reporters
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros.
//! Command functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;
pub mod reporter;

use std::fmt;
use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    /// Create a new CLI error with a message and exit code.
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }

    /// Render a diagnostic error with its code and help text.
    pub fn diagnostic<E>(error: E) -> Self
    where
        E: miette::Diagnostic + Send + Sync + 'static,
    {
        Self::failure(format!("{:?}", miette::Report::new(error)))
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Run a project's type checker as a test runner
#[derive(Parser, Debug)]
#[command(name = "typetest")]
#[command(version = VERSION)]
#[command(about = "Run a project's type checker as a test runner", long_about = None)]
pub struct Cli {
    /// Only run test files whose path contains one of these substrings
    #[arg(value_name = "PATHS")]
    pub paths: Vec<String>,

    /// Project root (default: current directory)
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Type checker binary
    #[arg(long, value_name = "BIN")]
    pub checker: Option<String>,

    /// Checker config to derive from, relative to the root
    #[arg(long, value_name = "PATH")]
    pub tsconfig: Option<PathBuf>,

    /// Also check `.js` test files
    #[arg(long)]
    pub allow_js: bool,

    /// Keep the checker running and report every change
    #[arg(short, long)]
    pub watch: bool,

    /// Do not report diagnostics outside test files
    #[arg(long)]
    pub ignore_source_errors: bool,

    /// Allow `.only` without failing
    #[arg(long)]
    pub allow_only: bool,

    /// Only run tests whose full name matches this regex
    #[arg(short = 't', long = "test-name-pattern", value_name = "PATTERN")]
    pub test_name_pattern: Option<String>,

    /// Scope every test file to this project
    #[arg(long, value_name = "NAME")]
    pub project: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = ReporterKind::Console)]
    pub reporter: ReporterKind,

    /// Collect and print the tests without running the checker
    #[arg(long, conflicts_with = "watch")]
    pub list: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterKind {
    /// pytest-style lines and a summary
    Console,
    /// One JSON object per host event
    Json,
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. All command
/// implementations return `CliResult` and errors are handled here.
pub fn run() {
    let cli = Cli::parse();

    match execute(cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Execute the CLI command and return result.
fn execute(cli: Cli) -> CliResult<ExitCode> {
    commands::run_session(cli)
}

// ============================================================================
// Tests
// ============================================================================
