//! End-to-end orchestrator scenarios against the scripted transport.

use std::sync::Arc;
use std::time::Duration;

use conductor::core::task::RetryPolicy;
use conductor::core::{Task, TaskList, TaskStatus};
use conductor::error::Error;
use conductor::orchestration::{ExecutorConfig, Orchestrator, OrchestratorConfig};
use conductor::session::SessionManager;

use crate::support::{CollectingNotifier, Script, ScriptedConnector};

fn fast_retry_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: 1.0,
        backoff_factor: 2.0,
        max_delay: 10.0,
        jitter: 0.0,
    }
}

fn test_task(id: &str, deps: &[&str]) -> Task {
    let mut task = Task::new(id, &format!("{} task", id), "do the thing", "a deliverable");
    task.dependencies = deps.iter().map(|d| d.to_string()).collect();
    task.retry_policy = fast_retry_policy(3);
    task
}

fn test_config(max_parallel: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        max_parallel,
        headless: true,
        auth_timeout: Duration::from_secs(5),
        auth_check_interval: Duration::from_millis(100),
        connect_max_retries: 2,
        executor: ExecutorConfig {
            poll_interval: Duration::from_millis(50),
            default_poll_timeout: Duration::from_secs(2),
            ..ExecutorConfig::default()
        },
    }
}

struct Harness {
    orchestrator: Orchestrator,
    connector: Arc<ScriptedConnector>,
    notifier: Arc<CollectingNotifier>,
    _dir: tempfile::TempDir,
    sessions_path: std::path::PathBuf,
}

fn harness(tasks: Vec<Task>, script: Script, ok_connects: usize, max_parallel: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let sessions_path = dir.path().join("sessions.jsonl");
    let connector = Arc::new(ScriptedConnector::new(script, ok_connects));
    let notifier = Arc::new(CollectingNotifier::new());

    let orchestrator = Orchestrator::new(
        TaskList::new(tasks).unwrap(),
        connector.clone(),
        SessionManager::with_log_file(sessions_path.clone()),
        notifier.clone(),
        test_config(max_parallel),
    );

    Harness {
        orchestrator,
        connector,
        notifier,
        _dir: dir,
        sessions_path,
    }
}

#[tokio::test(start_paused = true)]
async fn test_dependent_task_waits_for_dependency() {
    let mut h = harness(
        vec![test_task("a", &[]), test_task("b", &["a"])],
        Script::default(),
        2,
        2,
    );

    let summary = h.orchestrator.run().await.unwrap();

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 0);

    // b must not be submitted until a's completion was observed
    let complete_a = h.connector.event_position("complete:a").unwrap();
    let submit_b = h.connector.event_position("submit:b").unwrap();
    assert!(
        complete_a < submit_b,
        "b was submitted before a completed: {:?}",
        h.connector.events()
    );

    // Both branches were recorded in the summary and on disk
    assert!(summary.branches.contains(&"claude/a".to_string()));
    assert!(summary.branches.contains(&"claude/b".to_string()));
    let log = std::fs::read_to_string(&h.sessions_path).unwrap();
    assert_eq!(log.lines().count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_independent_tasks_share_a_wave() {
    let mut h = harness(
        vec![test_task("a", &[]), test_task("b", &[]), test_task("c", &[])],
        Script::default(),
        2,
        2,
    );

    let summary = h.orchestrator.run().await.unwrap();
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.failed, 0);

    // The first wave contains all three; concurrency is capped by the
    // semaphore, not the wave size
    let events = h.notifier.events.lock().unwrap();
    let wave = events
        .iter()
        .find_map(|e| match e {
            conductor::notify::Event::WaveStarted { task_ids, .. } => Some(task_ids.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(wave.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_does_not_block_siblings() {
    let mut script = Script::always_failing("x");
    script.fail_submit_attempts.insert("y".to_string(), 0);
    let mut h = harness(
        vec![test_task("x", &[]), test_task("y", &[])],
        script,
        2,
        2,
    );

    let summary = h.orchestrator.run().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    assert!(!summary.is_success());

    let tasks = h.orchestrator.tasks_snapshot().await;
    let x = tasks.iter().find(|t| t.id == "x").unwrap();
    assert_eq!(x.status, TaskStatus::Failed);
    // Zero-indexed final attempt: 3 attempts leave retry_count at 2
    assert_eq!(x.retry_count, 2);
    assert!(x.error_message.as_deref().unwrap_or("").contains("Element not found"));

    let y = tasks.iter().find(|t| t.id == "y").unwrap();
    assert_eq!(y.status, TaskStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_recovers_on_retry() {
    let mut script = Script::default();
    script.fail_submit_attempts.insert("z".to_string(), 1);
    let mut h = harness(vec![test_task("z", &[])], script, 1, 1);

    let summary = h.orchestrator.run().await.unwrap();
    assert_eq!(summary.completed, 1);

    let tasks = h.orchestrator.tasks_snapshot().await;
    assert_eq!(tasks[0].retry_count, 1);
    assert_eq!(tasks[0].status, TaskStatus::Completed);
    assert_eq!(tasks[0].session_id.as_deref(), Some("sess-z"));
    assert_eq!(tasks[0].branch_name.as_deref(), Some("claude/z"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_dependency_skips_dependents() {
    let mut h = harness(
        vec![test_task("x", &[]), test_task("child", &["x"])],
        Script::always_failing("x"),
        1,
        2,
    );

    let summary = h.orchestrator.run().await.unwrap();
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);

    let tasks = h.orchestrator.tasks_snapshot().await;
    let child = tasks.iter().find(|t| t.id == "child").unwrap();
    assert_eq!(child.status, TaskStatus::Skipped);
}

#[tokio::test(start_paused = true)]
async fn test_zero_connections_is_fatal() {
    let mut h = harness(vec![test_task("a", &[])], Script::default(), 0, 2);

    let err = h.orchestrator.run().await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)));

    // Nothing ran
    let tasks = h.orchestrator.tasks_snapshot().await;
    assert_eq!(tasks[0].status, TaskStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn test_partial_pool_degrades_gracefully() {
    // Three slots requested, one connection available: everything still
    // runs, just with less parallelism
    let mut h = harness(
        vec![test_task("a", &[]), test_task("b", &[])],
        Script::default(),
        1,
        3,
    );

    let summary = h.orchestrator.run().await.unwrap();
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_is_fatal() {
    let mut script = Script::default();
    script.never_authenticate = true;
    let mut h = harness(vec![test_task("a", &[])], script, 1, 1);

    let err = h.orchestrator.run().await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_skips_pending_tasks() {
    let mut h = harness(
        vec![test_task("a", &[]), test_task("b", &["a"])],
        Script::default(),
        1,
        1,
    );

    h.orchestrator.cancellation_token().cancel();
    let summary = h.orchestrator.run().await.unwrap();

    assert_eq!(summary.completed, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 2);

    let events = h.notifier.events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, conductor::notify::Event::RunCancelled)));
}

#[tokio::test(start_paused = true)]
async fn test_indeterminate_completion_exhausts_retries() {
    let mut script = Script::default();
    script.never_complete.insert("slow".to_string());

    let mut task = test_task("slow", &[]);
    task.retry_policy = fast_retry_policy(2);
    task.completion_timeout_secs = Some(1);

    let mut h = harness(vec![task], script, 1, 1);
    let summary = h.orchestrator.run().await.unwrap();

    assert_eq!(summary.failed, 1);
    let tasks = h.orchestrator.tasks_snapshot().await;
    assert_eq!(tasks[0].status, TaskStatus::Failed);
    assert!(tasks[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("completion not detected"));
}

#[tokio::test(start_paused = true)]
async fn test_repository_selection_failure_is_nonfatal() {
    let mut script = Script::default();
    script.fail_repository_clicks = true;

    let mut task = test_task("a", &[]);
    task.repository = Some("acme/widgets".to_string());

    let mut h = harness(vec![task], script, 1, 1);
    let summary = h.orchestrator.run().await.unwrap();

    // Selection was attempted, failed, and the task still completed
    assert_eq!(summary.completed, 1);
    assert!(h
        .connector
        .events()
        .iter()
        .any(|e| e.starts_with("repo-click:")));
}

#[tokio::test(start_paused = true)]
async fn test_task_file_to_summary_roundtrip() {
    let yaml = r#"
config:
  default_repository: "acme/widgets"
tasks:
  - id: "setup"
    name: "Set up"
    prompt: "set things up"
    expected_deliverable: "a setup"
  - id: "build"
    name: "Build on it"
    prompt: "build the thing"
    expected_deliverable: "the thing"
    dependencies: ["setup"]
"#;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.yaml");
    std::fs::write(&path, yaml).unwrap();

    let task_list = conductor::loader::load_from_path(&path).unwrap();
    assert_eq!(
        task_list.get_task("build").unwrap().repository.as_deref(),
        Some("acme/widgets")
    );

    let connector = Arc::new(ScriptedConnector::new(Script::default(), 2));
    let mut orchestrator = Orchestrator::new(
        task_list,
        connector.clone(),
        SessionManager::with_log_file(dir.path().join("sessions.jsonl")),
        Arc::new(CollectingNotifier::new()),
        test_config(2),
    );

    let summary = orchestrator.run().await.unwrap();
    assert_eq!(summary.completed, 2);
    assert!(summary.is_success());

    let complete_setup = connector.event_position("complete:setup").unwrap();
    let submit_build = connector.event_position("submit:build").unwrap();
    assert!(complete_setup < submit_build);
}
