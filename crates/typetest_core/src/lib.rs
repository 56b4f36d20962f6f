//! Provide the canonical test-API vocabulary and pure helpers shared by the typetest collector and runner.
//!
//! This crate is intentionally small and dependency-light. It contains deterministic helpers that both:
//! - the static collector can use to recognize `test`/`describe` call targets and their modifiers, and
//! - the runner/reporters can use to derive stable task identifiers.
//!
//! ## Notes
//!
//! - This is a “vocabulary core” crate: **no IO**, no global state, and no AST types.
//! - Current scope: test API identifiers, modifier identifiers with their static-analysis support class, and the
//!   task-id string hash.

pub mod hash;
pub mod lang;

pub use hash::generate_hash;
