//! Run coordinator tests: transports, host events and the run/watcher race.
//!
//! Fake checkers are `sh` scripts, so these tests are unix-only.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use typetest::TypecheckConfig;
use typetest::runner::coordinator::reporter::{EventReporter, HostEvent};
use typetest::runner::coordinator::transport::{LocalTransport, Pool, TestSpec, WorkerTransport};
use typetest::runner::coordinator::{Coordinator, CoordinatorError, RaceConfig};
use typetest::runner::tasks::TaskState;

const TEST_FILE: &str = "describe('s', () => {\n  test('ok', () => {})\n  test('bad', () => {\n    bad()\n  })\n})\n";
const FAILING_OUTPUT: &str = "echo \"src/a.test-d.ts(4,5): error TS2304: Cannot find name 'bad'.\"\n";
const TIMEOUT: Duration = Duration::from_secs(10);

fn project(script_body: &str) -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("tsconfig.json"), "{}").unwrap();
    fs::write(dir.path().join("src/a.test-d.ts"), TEST_FILE).unwrap();
    let script = dir.path().join("fake-tsc.sh");
    fs::write(&script, format!("#!/bin/sh\n{script_body}")).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    let script = script.to_string_lossy().into_owned();
    (dir, script)
}

fn test_file(root: &Path) -> PathBuf {
    root.join("src/a.test-d.ts")
}

fn coordinator(root: &Path, config: TypecheckConfig, events: &EventReporter, race: RaceConfig) -> Coordinator {
    Coordinator::builder(root, config, Arc::new(events.clone()))
        .race(race)
        .build()
        .unwrap()
}

fn drain(events: &mut broadcast::Receiver<HostEvent>) -> Vec<HostEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn event_names(events: &[HostEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|event| match event {
            HostEvent::Enqueued { .. } => "enqueued",
            HostEvent::Collected { .. } => "collected",
            HostEvent::Updated { .. } => "updated",
            HostEvent::ParseStart => "parse_start",
            HostEvent::ParseEnd { .. } => "parse_end",
            HostEvent::Error { .. } => "error",
            HostEvent::WatcherRerun { .. } => "watcher_rerun",
            HostEvent::Finished { .. } => "finished",
            HostEvent::WatcherStart => "watcher_start",
        })
        .collect()
}

// ============================================================================
// Batch runs through transports
// ============================================================================

#[tokio::test]
async fn test_local_pool_run_reports_the_cycle() {
    let (dir, script) = project(&format!("{FAILING_OUTPUT}exit 2\n"));
    let events = EventReporter::new();
    let config = TypecheckConfig::default().with_checker(script);
    let pool = Pool::new(LocalTransport::new(
        coordinator(dir.path(), config, &events, RaceConfig::default()),
        events.clone(),
    ));
    let mut stream = pool.events();

    let cycles = tokio::time::timeout(TIMEOUT, pool.run(vec![TestSpec::new(None, test_file(dir.path()))]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].count(TaskState::Fail), 1);
    assert_eq!(cycles[0].count(TaskState::Pass), 1);

    pool.stop().await.unwrap();
    let seen = drain(&mut stream);
    let names = event_names(&seen);
    let start = names.iter().position(|n| *n == "parse_start").unwrap();
    let end = names.iter().position(|n| *n == "parse_end").unwrap();
    assert!(start < end);
    assert!(names[start..end].contains(&"collected"));
    assert_eq!(names[end + 1], "updated");
    assert!(!names.contains(&"watcher_start"));
}

#[tokio::test]
async fn test_worker_pool_splits_projects() {
    let (dir, script) = project("exit 0\n");
    let events = EventReporter::new();
    let config = TypecheckConfig::default().with_checker(script);
    let coordinator = Coordinator::builder(dir.path(), config, Arc::new(events.clone()))
        .projects(["web", "node"])
        .build()
        .unwrap();
    let pool = Pool::new(WorkerTransport::spawn(coordinator, events));

    let file = test_file(dir.path());
    let cycles = tokio::time::timeout(
        TIMEOUT,
        pool.run(vec![
            TestSpec::new(Some("web".into()), &file),
            TestSpec::new(Some("node".into()), &file),
        ]),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(cycles.len(), 2);
    // Same file, different projects: the file task ids differ.
    assert_ne!(cycles[0].files[0].id, cycles[1].files[0].id);
    assert!(cycles.iter().all(|cycle| !cycle.has_failures()));

    let err = pool
        .collect(vec![TestSpec::new(Some("docs".into()), &file)])
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::UnknownProject(name) if name == "docs"));
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_collect_does_not_run_the_checker() {
    // A checker that would fail loudly if it ever ran.
    let (dir, script) = project("echo 'should not run' >&2\nexit 3\n");
    let events = EventReporter::new();
    let config = TypecheckConfig::default().with_checker(script);
    let pool = Pool::new(LocalTransport::new(
        coordinator(dir.path(), config, &events, RaceConfig::default()),
        events.clone(),
    ));
    let mut stream = pool.events();

    let files = pool.collect(vec![TestSpec::new(None, test_file(dir.path()))]).await.unwrap();
    assert_eq!(files[0].children[0].children.len(), 2);
    assert!(files[0].children[0].result.is_none());

    let names = event_names(&drain(&mut stream));
    assert_eq!(names, vec!["collected", "updated"]);
    pool.stop().await.unwrap();
}

// ============================================================================
// Watch mode race
// ============================================================================

#[tokio::test]
async fn test_idle_watcher_answers_with_the_last_cycle() {
    let (dir, script) = project(&format!(
        "{FAILING_OUTPUT}echo 'Found 1 error. Watching for file changes.'\nexec sleep 30\n"
    ));
    let events = EventReporter::new();
    let config = TypecheckConfig::default().with_checker(script).with_watch(true);
    let race = RaceConfig {
        ceiling: Duration::from_millis(100),
    };
    let coordinator = coordinator(dir.path(), config, &events, race);
    let files = vec![test_file(dir.path())];

    let first = tokio::time::timeout(TIMEOUT, coordinator.run(None, files.clone()))
        .await
        .unwrap()
        .unwrap();
    assert!(first.has_failures());

    let mut stream = events.subscribe();
    let started = Instant::now();
    let second = tokio::time::timeout(TIMEOUT, coordinator.run(None, files))
        .await
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(started.elapsed() < Duration::from_secs(5));

    let names = event_names(&drain(&mut stream));
    assert!(names.contains(&"parse_end"));
    assert!(!names.contains(&"parse_start"));

    tokio::time::timeout(TIMEOUT, coordinator.stop()).await.unwrap();
}

#[tokio::test]
async fn test_run_waits_for_a_rerun_already_in_progress() {
    let (dir, script) = project(&format!(
        "{FAILING_OUTPUT}echo 'Found 1 error. Watching for file changes.'\n\
         sleep 1\n\
         echo 'File change detected. Starting incremental compilation...'\n\
         sleep 1\n\
         echo 'Found 0 errors. Watching for file changes.'\n\
         exec sleep 30\n"
    ));
    let events = EventReporter::new();
    let config = TypecheckConfig::default().with_checker(script).with_watch(true);
    let race = RaceConfig {
        ceiling: Duration::from_secs(5),
    };
    let coordinator = coordinator(dir.path(), config, &events, race);
    let files = vec![test_file(dir.path())];

    let first = tokio::time::timeout(TIMEOUT, coordinator.run(None, files.clone()))
        .await
        .unwrap()
        .unwrap();
    assert!(first.has_failures());

    let second = tokio::time::timeout(TIMEOUT, coordinator.run(None, files))
        .await
        .unwrap()
        .unwrap();
    assert!(!second.has_failures());

    tokio::time::timeout(TIMEOUT, coordinator.stop()).await.unwrap();
}

#[tokio::test]
async fn test_stop_releases_a_waiting_run() {
    let (dir, script) = project("exec sleep 30\n");
    let events = EventReporter::new();
    let config = TypecheckConfig::default().with_checker(script).with_watch(true);
    let coordinator = coordinator(dir.path(), config, &events, RaceConfig::default());

    let waiting = tokio::spawn({
        let coordinator = coordinator.clone();
        let files = vec![test_file(dir.path())];
        async move { coordinator.run(None, files).await }
    });
    tokio::time::sleep(Duration::from_millis(300)).await;
    tokio::time::timeout(TIMEOUT, coordinator.stop()).await.unwrap();

    let result = tokio::time::timeout(TIMEOUT, waiting).await.unwrap().unwrap();
    assert!(matches!(result, Err(CoordinatorError::Stopped)));
    assert!(!dir.path().join("tsconfig.typetest-temp.json").exists());
}

#[tokio::test]
async fn test_stop_during_the_race_leaves_no_checker_behind() {
    let (dir, script) = project(
        "echo $$ >> \"$(dirname \"$0\")/pids.txt\"\n\
         echo 'Found 0 errors. Watching for file changes.'\n\
         exec sleep 30\n",
    );
    let events = EventReporter::new();
    let config = TypecheckConfig::default().with_checker(script).with_watch(true);
    let race = RaceConfig {
        ceiling: Duration::from_secs(5),
    };
    let coordinator = coordinator(dir.path(), config, &events, race);
    let files = vec![test_file(dir.path())];

    tokio::time::timeout(TIMEOUT, coordinator.run(None, files.clone()))
        .await
        .unwrap()
        .unwrap();

    // The second run sits in the race wait: the watcher is idle and the ceiling is long.
    let waiting = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.run(None, files).await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    tokio::time::timeout(TIMEOUT, coordinator.stop()).await.unwrap();

    let result = tokio::time::timeout(TIMEOUT, waiting).await.unwrap().unwrap();
    assert!(matches!(result, Err(CoordinatorError::Stopped)));

    let pids = fs::read_to_string(dir.path().join("pids.txt")).unwrap();
    let pids: Vec<&str> = pids.lines().collect();
    assert_eq!(pids.len(), 1, "spawned {pids:?}");
    let alive = std::process::Command::new("kill")
        .args(["-0", pids[0]])
        .status()
        .unwrap()
        .success();
    assert!(!alive);
    assert!(!dir.path().join("tsconfig.typetest-temp.json").exists());
}
