//! The test engine.
//!
//! ## Pipeline
//!
//! - [`collect`] finds test declarations statically and builds each file's task tree.
//! - [`checker`] runs the external type checker over the collected files, once or in watch mode.
//! - [`diagnostics`] parses the checker's output into per-file diagnostics.
//! - [`attribution`] maps every diagnostic to the smallest task whose range contains it.
//! - [`coordinator`] serves `collect`/`run`/`stop` requests per project and reports to the host.

pub mod attribution;
pub mod checker;
pub mod collect;
pub mod coordinator;
pub mod diagnostics;
pub mod index_map;
pub mod source_map;
pub mod tasks;
