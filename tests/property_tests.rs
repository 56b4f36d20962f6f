//! Property-based tests for typetest
//!
//! These tests use proptest to verify invariants across many randomly
//! generated inputs, catching edge cases that hand-written tests might miss.

use std::path::Path;

use proptest::prelude::*;
use typetest::runner::collect::Collector;
use typetest::runner::index_map::IndexMap;
use typetest::runner::tasks::TaskNode;

// =============================================================================
// Strategies
// =============================================================================

fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z ]{0,10}"
}

/// Suites, each holding some test names, plus loose top-level tests.
fn file_strategy() -> impl Strategy<Value = (Vec<(String, Vec<String>)>, Vec<String>)> {
    (
        prop::collection::vec((name_strategy(), prop::collection::vec(name_strategy(), 0..4)), 0..4),
        prop::collection::vec(name_strategy(), 0..3),
    )
}

fn render((suites, tests): &(Vec<(String, Vec<String>)>, Vec<String>)) -> String {
    let mut out = String::from("import { describe, test } from 'vitest'\n\n");
    for (suite, children) in suites {
        out.push_str(&format!("describe('{suite}', () => {{\n"));
        for child in children {
            out.push_str(&format!("  test('{child}', () => {{\n    expectTypeOf(1).toBeNumber()\n  }})\n"));
        }
        out.push_str("})\n\n");
    }
    for test in tests {
        out.push_str(&format!("test('{test}', () => {{}})\n"));
    }
    out
}

fn all_ids(node: &TaskNode, out: &mut Vec<String>) {
    out.push(node.id.clone());
    for child in &node.children {
        all_ids(child, out);
    }
}

// =============================================================================
// Index map
// =============================================================================

proptest! {
    /// Property: offsets grow along the text, and every recorded offset maps back to its position
    #[test]
    fn index_map_offsets_are_monotonic(source in "[a-z \n]{0,80}") {
        let map = IndexMap::build(&source);
        prop_assert_eq!(map.len(), source.chars().count());

        let mut line = 1u32;
        let mut column = 1u32;
        let mut previous = None;
        for (offset, ch) in source.char_indices() {
            prop_assert_eq!(map.offset(line, column), Some(offset));
            prop_assert_eq!(map.position(offset), Some((line, column)));
            if let Some(previous) = previous {
                prop_assert!(offset > previous);
            }
            previous = Some(offset);
            if ch == '\n' {
                line += 1;
                column = 0;
            } else {
                column += 1;
            }
        }
    }

    /// Property: the parser never panics, whatever the input
    #[test]
    fn parser_never_panics(source in "[ -~\n]{0,120}") {
        let _ = typetest_syntax::parse_source(&source);
    }
}

// =============================================================================
// Collection
// =============================================================================

proptest! {
    /// Property: every definition sits inside the definition of its parent, and ids are unique
    #[test]
    fn collected_ranges_nest(file in file_strategy()) {
        let source = render(&file);
        let info = Collector::new("/p").collect_source(Path::new("/p/a.test-d.ts"), source.clone());
        prop_assert!(info.is_parsed());

        let (suites, tests) = &file;
        let expected = suites.len() + suites.iter().map(|(_, c)| c.len()).sum::<usize>() + tests.len();
        prop_assert_eq!(info.definitions.len(), expected);

        for definition in &info.definitions {
            prop_assert!(definition.start < definition.end);
            prop_assert!(definition.end <= source.len());
            if definition.path.len() > 1 {
                let parent_path = &definition.path[..definition.path.len() - 1];
                let parent = info.definitions.iter().find(|d| d.path == parent_path);
                prop_assert!(parent.is_some());
                let parent = parent.unwrap();
                prop_assert!(parent.start <= definition.start && definition.end <= parent.end);
            }
            prop_assert_eq!(&info.file.get(&definition.path).unwrap().name, &definition.name);
        }

        let mut ids = Vec::new();
        all_ids(&info.file, &mut ids);
        let count = ids.len();
        ids.sort();
        ids.dedup();
        prop_assert_eq!(ids.len(), count);
    }

    /// Property: the smallest definition containing an offset is the deepest one
    #[test]
    fn smallest_containing_range_is_deepest(file in file_strategy(), fraction in 0.0f64..1.0) {
        let source = render(&file);
        let info = Collector::new("/p").collect_source(Path::new("/p/a.test-d.ts"), source.clone());
        let offset = ((source.len() as f64) * fraction) as usize;

        let containing: Vec<_> = info.definitions.iter().filter(|d| d.contains(offset)).collect();
        if let Some(smallest) = containing.iter().min_by_key(|d| d.len()) {
            for other in &containing {
                prop_assert!(other.path.len() <= smallest.path.len());
            }
        }
    }
}
