#![forbid(unsafe_code)]
//! typetest: run a project's type checker as a test runner.
//!
//! Test files declare `test`/`describe` blocks whose bodies are only ever type-checked. This crate collects those
//! declarations statically, runs the checker (`tsc` by default) over the files, and attributes every reported
//! diagnostic to the innermost test containing it.
//!
//! ## Panic Policy
//!
//! This codebase follows explicit error handling:
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli` module enforces
//!   `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.
//!
//! - **True invariants**: If a panic represents a logic error, use `.expect("INVARIANT: reason")` with a clear
//!   explanation.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod runner;

pub use config::TypecheckConfig;
pub use runner::collect::{Collector, FileInfo};
pub use runner::coordinator::{Coordinator, CoordinatorError};
pub use runner::tasks::{RunMode, TaskNode, TaskState};
