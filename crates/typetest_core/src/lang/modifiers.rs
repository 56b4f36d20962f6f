//! Define the chained modifiers that may follow a test function (`test.skip`, `describe.only`, ...).
//!
//! Each modifier carries a [`StaticSupport`] class describing what the collector can do with it without executing
//! the file.
//!
//! ## Notes
//! - Spellings are camelCase exactly as written in source (`skipIf`, not `skip_if`).
//! - Unknown properties (e.g. `test.name`) are not modifiers; [`from_str`] returns `None` for them and the collector
//!   treats the call as unrelated code.
//!
//! ## Examples
//! ```rust
//! use typetest_core::lang::modifiers::{self, ModifierId, StaticSupport};
//!
//! assert_eq!(modifiers::from_str("skipIf"), Some(ModifierId::SkipIf));
//! assert_eq!(modifiers::support(ModifierId::Each), StaticSupport::Unsupported);
//! ```

/// Stable identifier for every known modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModifierId {
    Skip,
    Only,
    Todo,
    SkipIf,
    RunIf,
    Each,
    For,
    Concurrent,
    Sequential,
    Fails,
    Shuffle,
    Extend,
}

/// The run mode a statically-evaluable modifier sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeModifier {
    Skip,
    Only,
    Todo,
}

/// What static analysis can do with a modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaticSupport {
    /// Sets the declaration's run mode directly (`.skip`, `.only`, `.todo`).
    Mode(ModeModifier),
    /// Curried predicate (`.skipIf(cond)(name, fn)`); the predicate cannot be evaluated so the declaration is
    /// always skipped.
    Conditional,
    /// Cannot be evaluated without running code (`.each`, `.concurrent`, ...); collection fails.
    Unsupported,
    /// Produces a new test function rather than declaring a task (`.extend`).
    NotADeclaration,
}

/// Metadata for a modifier.
#[derive(Debug, Clone, Copy)]
pub struct ModifierInfo {
    pub id: ModifierId,
    pub canonical: &'static str,
    pub support: StaticSupport,
}

/// Registry of all modifiers.
pub const MODIFIERS: &[ModifierInfo] = &[
    info(ModifierId::Skip, "skip", StaticSupport::Mode(ModeModifier::Skip)),
    info(ModifierId::Only, "only", StaticSupport::Mode(ModeModifier::Only)),
    info(ModifierId::Todo, "todo", StaticSupport::Mode(ModeModifier::Todo)),
    info(ModifierId::SkipIf, "skipIf", StaticSupport::Conditional),
    info(ModifierId::RunIf, "runIf", StaticSupport::Conditional),
    info(ModifierId::Each, "each", StaticSupport::Unsupported),
    info(ModifierId::For, "for", StaticSupport::Unsupported),
    info(ModifierId::Concurrent, "concurrent", StaticSupport::Unsupported),
    info(ModifierId::Sequential, "sequential", StaticSupport::Unsupported),
    info(ModifierId::Fails, "fails", StaticSupport::Unsupported),
    info(ModifierId::Shuffle, "shuffle", StaticSupport::Unsupported),
    info(ModifierId::Extend, "extend", StaticSupport::NotADeclaration),
];

/// Return the canonical spelling for a modifier.
pub fn as_str(id: ModifierId) -> &'static str {
    info_for(id).canonical
}

/// Return the static-analysis support class of a modifier.
pub fn support(id: ModifierId) -> StaticSupport {
    info_for(id).support
}

/// Return the full metadata entry for a modifier.
pub fn info_for(id: ModifierId) -> &'static ModifierInfo {
    MODIFIERS.iter().find(|m| m.id == id).unwrap_or(&MODIFIERS[0])
}

/// Lookup by spelling (case-sensitive).
pub fn from_str(s: &str) -> Option<ModifierId> {
    MODIFIERS.iter().find(|m| m.canonical == s).map(|m| m.id)
}

// --- helpers -----------------------------------------------------------------

const fn info(id: ModifierId, canonical: &'static str, support: StaticSupport) -> ModifierInfo {
    ModifierInfo { id, canonical, support }
}
