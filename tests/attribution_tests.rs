//! Collection, diagnostic parsing and attribution working together, without a checker process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use typetest::runner::attribution::attribute;
use typetest::runner::collect::{Collector, FileInfo, TaskDefinition};
use typetest::runner::diagnostics::parse_diagnostics;
use typetest::runner::index_map::IndexMap;
use typetest::runner::tasks::{RunMode, TaskKind, TaskNode, TaskState, assign_ids};
use typetest_core::lang::test_api::DeclKind;

fn definition(start: usize, end: usize, name: &str, kind: DeclKind, path: Vec<usize>) -> TaskDefinition {
    TaskDefinition {
        start,
        end,
        name: name.to_string(),
        kind,
        mode: RunMode::Run,
        path,
    }
}

/// suite `[0,120)` holding `ok` `[20,50)` and `bad` `[60,110)`, over a single-line source.
fn ranged_file(path: &Path) -> FileInfo {
    let source = " ".repeat(130);
    let mut file = TaskNode::file("f", "a.test-d.ts");
    let mut suite = TaskNode::new(TaskKind::Suite, "suite", RunMode::Run);
    suite.children.push(TaskNode::new(TaskKind::Test, "ok", RunMode::Run));
    suite.children.push(TaskNode::new(TaskKind::Test, "bad", RunMode::Run));
    file.children.push(suite);
    assign_ids(&mut file);

    FileInfo {
        filepath: path.to_path_buf(),
        index_map: IndexMap::build(&source),
        content_hash: typetest_core::generate_hash(&source),
        source,
        source_map: None,
        definitions: vec![
            definition(0, 120, "suite", DeclKind::Suite, vec![0]),
            definition(20, 50, "ok", DeclKind::Test, vec![0, 0]),
            definition(60, 110, "bad", DeclKind::Test, vec![0, 1]),
        ],
        file,
        has_only: false,
        syntax_errors: Vec::new(),
    }
}

#[test]
fn test_innermost_range_fails_and_propagates() {
    let path = PathBuf::from("/p/a.test-d.ts");
    let files = BTreeMap::from([(path.clone(), Arc::new(ranged_file(&path)))]);
    // Byte 75 sits on line 1, column 76.
    let diagnostics = parse_diagnostics("a.test-d.ts(1,76): error TS2322: Type 'string' is not assignable to type 'number'.", Path::new("/p"));

    let result = attribute(&files, &diagnostics);
    let suite = &result.files[0].children[0];
    assert_eq!(suite.state(), Some(TaskState::Fail));
    assert_eq!(suite.children[0].state(), Some(TaskState::Pass));
    assert_eq!(suite.children[1].state(), Some(TaskState::Fail));
    assert_eq!(result.files[0].state(), Some(TaskState::Fail));
    assert!(result.source_errors.is_empty());

    let errors = &suite.children[1].result.as_ref().unwrap().errors;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "Type 'string' is not assignable to type 'number'.");
    // The suite fails through its child; the error itself stays on the test.
    assert!(suite.result.as_ref().unwrap().errors.is_empty());
}

#[test]
fn test_boundary_offsets_use_half_open_ranges() {
    let path = PathBuf::from("/p/a.test-d.ts");
    let files = BTreeMap::from([(path.clone(), Arc::new(ranged_file(&path)))]);
    // Byte 50 is just past `ok`, still inside the suite.
    let diagnostics = parse_diagnostics("/p/a.test-d.ts(1,51): error TS1: at end of ok", Path::new("/p"));

    let result = attribute(&files, &diagnostics);
    let suite = &result.files[0].children[0];
    assert_eq!(suite.children[0].state(), Some(TaskState::Pass));
    assert_eq!(suite.children[1].state(), Some(TaskState::Pass));
    assert_eq!(suite.state(), Some(TaskState::Fail));
    assert_eq!(suite.result.as_ref().unwrap().errors.len(), 1);
}

#[test]
fn test_collected_file_end_to_end() {
    let source = "\
import { expectTypeOf } from 'vitest'

describe('math', () => {
  test('adds numbers', () => {
    expectTypeOf(add(1, 2)).toEqualTypeOf<number>()
  })
  test('rejects strings', () => {
    expectTypeOf(add('1', 2)).toEqualTypeOf<number>()
  })
  test.todo('handles bigints')
})
";
    let root = Path::new("/project");
    let path = root.join("src/math.test-d.ts");
    let info = Collector::new(root).collect_source(&path, source.to_string());
    let files = BTreeMap::from([(path, Arc::new(info))]);

    let output = "\
src/math.test-d.ts(8,17): error TS2345: Argument of type 'string' is not assignable to parameter of type 'number'.
src/helpers.ts(3,1): error TS2304: Cannot find name 'missing'.

Found 2 errors in 2 files.
";
    let result = attribute(&files, &parse_diagnostics(output, root));

    let suite = &result.files[0].children[0];
    let states: Vec<_> = suite.children.iter().map(|t| (t.name.as_str(), t.state())).collect();
    assert_eq!(
        states,
        vec![
            ("adds numbers", Some(TaskState::Pass)),
            ("rejects strings", Some(TaskState::Fail)),
            ("handles bigints", Some(TaskState::Todo)),
        ]
    );
    assert_eq!(result.source_errors.len(), 1);
    insta::assert_snapshot!(result.source_errors[0].to_string(), @r"
    TypeCheckError: Cannot find name 'missing'.
        at /project/src/helpers.ts:3:1
    ");
}
