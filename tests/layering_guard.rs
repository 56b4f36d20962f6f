//! Layering guardrails to keep the syntax and vocabulary crates free of runtime concerns.
//!
//! `typetest_syntax` and `typetest_core` are pure: no async runtime, no process or filesystem crates. This test scans
//! their `Cargo.toml` files and fails if one of those crates appears in `[dependencies]`.

const FORBIDDEN: &[&str] = &["tokio", "walkdir", "serde_json", "tempfile"];

fn dependencies(manifest: &str) -> Vec<String> {
    let mut in_dependencies = false;
    let mut names = Vec::new();

    for raw_line in manifest.lines() {
        let line = raw_line.trim();
        // Track when we enter/exit the `[dependencies]` table.
        if line.starts_with('[') {
            in_dependencies = line == "[dependencies]";
            continue;
        }
        if !in_dependencies || line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Strip inline comments for robustness.
        let line_no_comment = line.split('#').next().unwrap_or("").trim();
        if let Some((name, _)) = line_no_comment.split_once('=') {
            names.push(name.trim().to_string());
        }
    }
    names
}

#[test]
fn syntax_crate_has_no_runtime_dependencies() {
    let deps = dependencies(include_str!("../crates/typetest_syntax/Cargo.toml"));
    for forbidden in FORBIDDEN {
        assert!(
            !deps.iter().any(|d| d == forbidden),
            "`{forbidden}` must not appear in typetest_syntax [dependencies]"
        );
    }
}

#[test]
fn core_crate_has_no_dependencies() {
    let deps = dependencies(include_str!("../crates/typetest_core/Cargo.toml"));
    assert!(deps.is_empty(), "typetest_core must stay dependency-free, found {deps:?}");
}
