//! Define the base test functions recognized by the static collector.
//!
//! ## Notes
//! - Lookup via [`from_str`] is **case-sensitive**.
//! - `it` is a synonym of `test`, `suite` a synonym of `describe`; they keep distinct ids so diagnostics can echo the
//!   spelling the user wrote.

/// Stable identifier for every recognized test function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestApiId {
    Test,
    It,
    Describe,
    Suite,
}

/// Whether a call declares a leaf test or a grouping suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclKind {
    Test,
    Suite,
}

/// Metadata for a test function.
#[derive(Debug, Clone, Copy)]
pub struct TestApiInfo {
    pub id: TestApiId,
    pub canonical: &'static str,
    pub kind: DeclKind,
}

/// Registry of all test functions.
pub const TEST_APIS: &[TestApiInfo] = &[
    info(TestApiId::Test, "test", DeclKind::Test),
    info(TestApiId::It, "it", DeclKind::Test),
    info(TestApiId::Describe, "describe", DeclKind::Suite),
    info(TestApiId::Suite, "suite", DeclKind::Suite),
];

/// Return the canonical spelling for a test function.
pub fn as_str(id: TestApiId) -> &'static str {
    info_for(id).canonical
}

/// Return whether the function declares a test or a suite.
pub fn kind(id: TestApiId) -> DeclKind {
    info_for(id).kind
}

/// Return the full metadata entry for a test function.
pub fn info_for(id: TestApiId) -> &'static TestApiInfo {
    // Every id has exactly one registry row; the fallback is unreachable but keeps this total.
    TEST_APIS.iter().find(|t| t.id == id).unwrap_or(&TEST_APIS[0])
}

/// Lookup by spelling.
///
/// ## Returns
/// - `Some(TestApiId)` if the spelling is a recognized test function.
/// - `None` otherwise.
pub fn from_str(s: &str) -> Option<TestApiId> {
    TEST_APIS.iter().find(|t| t.canonical == s).map(|t| t.id)
}

// --- helpers -----------------------------------------------------------------

const fn info(id: TestApiId, canonical: &'static str, kind: DeclKind) -> TestApiInfo {
    TestApiInfo { id, canonical, kind }
}
