//! Test-API vocabulary registries.
//!
//! This module is the “front door” for the call targets the collector recognizes: the base test functions
//! (`test`, `it`, `describe`, `suite`) and the chained modifiers (`.skip`, `.only`, `.each`, ...).
//!
//! The design goal is to avoid stringly-typed checks scattered across the collector. Instead, callers work with
//! **stable IDs** ([`test_api::TestApiId`], [`modifiers::ModifierId`]) and look up spellings/metadata via registry
//! tables.
//!
//! ## Notes
//! - Registries are intentionally **pure**: no AST types, no IO, no side effects.
//!
//! ## Examples
//! ```rust
//! use typetest_core::lang::test_api::{self, TestApiId};
//!
//! assert_eq!(test_api::from_str("it"), Some(TestApiId::It));
//! assert_eq!(test_api::as_str(TestApiId::Describe), "describe");
//! ```

pub mod modifiers;
pub mod test_api;
