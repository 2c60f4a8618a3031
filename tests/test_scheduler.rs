mod common;

use std::sync::Arc;
use std::time::Duration;

use rnaseq_orchestrator::domain::backend::mock_backend::{MockBackend, MockOutcome};
use rnaseq_orchestrator::domain::job_graph::task::TaskState;
use rnaseq_orchestrator::domain::scheduler::dispatcher::Dispatcher;
use rnaseq_orchestrator::domain::scheduler::scheduler_config::SchedulerConfig;
use rnaseq_orchestrator::domain::utils::id::TaskId;

use common::{fast_config, graph, job};

fn dispatcher(backend: &Arc<MockBackend>, config: SchedulerConfig) -> Dispatcher {
    Dispatcher::new(backend.clone(), config)
}

#[tokio::test]
async fn test_chain_runs_in_dependency_order() {
    let backend = Arc::new(MockBackend::new().with_running_polls(1));
    let graph = graph(vec![job("c", &["b"]), job("b", &["a"]), job("a", &[])]);

    let report = dispatcher(&backend, fast_config()).run(graph).await.unwrap();

    assert!(report.is_complete());
    assert!(!report.cancelled);
    assert_eq!(report.counts.success, 3);
    assert_eq!(backend.submissions(), vec![TaskId::new("a"), TaskId::new("b"), TaskId::new("c")]);
    assert_eq!(report.task("a").unwrap().attempt_count, 1);
    assert!(report.task("a").unwrap().backend_job_id.is_some());
}

#[tokio::test]
async fn test_failure_blocks_only_descendants() {
    let backend = Arc::new(MockBackend::new().with_outcomes("a", vec![MockOutcome::permanent("segfault")]));
    let graph = graph(vec![job("a", &[]), job("b", &["a"]), job("c", &["b"]), job("d", &[])]);

    let report = dispatcher(&backend, fast_config()).run(graph).await.unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.task("a").unwrap().state, TaskState::FailedPermanent);
    assert_eq!(report.task("a").unwrap().last_error.as_deref(), Some("Task 'a' failed permanently: segfault"));
    assert_eq!(report.task("b").unwrap().state, TaskState::Blocked);
    assert_eq!(report.task("c").unwrap().state, TaskState::Blocked);
    assert_eq!(report.task("d").unwrap().state, TaskState::Success);

    // Blocked tasks name the failed task and carry its message, also transitively.
    let root = "blocked by a: Task 'a' failed permanently: segfault";
    assert_eq!(report.task("b").unwrap().last_error.as_deref(), Some(root));
    assert_eq!(report.task("c").unwrap().last_error.as_deref(), Some(root));
    assert!(report.task("d").unwrap().last_error.is_none());

    // Non-retriable: a single attempt, blocked tasks never reach the backend.
    assert_eq!(backend.submission_count("a"), 1);
    assert_eq!(backend.submission_count("b"), 0);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let failures = vec![MockOutcome::retriable("node lost"); 5];
    let backend = Arc::new(MockBackend::new().with_outcomes("a", failures));
    let graph = graph(vec![job("a", &[])]);

    let report = dispatcher(&backend, fast_config()).run(graph).await.unwrap();

    // max_retries = 2: the first attempt plus two retries.
    assert_eq!(backend.submission_count("a"), 3);
    assert_eq!(report.task("a").unwrap().state, TaskState::FailedPermanent);
    assert_eq!(report.task("a").unwrap().attempt_count, 3);
    assert_eq!(report.task("a").unwrap().last_error.as_deref(), Some("Task 'a' failed permanently: node lost"));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let backend = Arc::new(
        MockBackend::new()
            .with_outcomes("a", vec![MockOutcome::retriable("preempted")])
            .with_outcomes("b", vec![MockOutcome::Vanish])
            .with_outcomes("c", vec![MockOutcome::RejectSubmit("queue full".to_string()), MockOutcome::RejectSubmit("queue full".to_string())]),
    );
    let graph = graph(vec![job("a", &[]), job("b", &[]), job("c", &[])]);

    let report = dispatcher(&backend, fast_config()).run(graph).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.task("a").unwrap().attempt_count, 2);
    assert_eq!(report.task("b").unwrap().attempt_count, 2);
    assert_eq!(report.task("c").unwrap().attempt_count, 3);
    assert!(report.task("a").unwrap().last_error.is_none());
}

#[tokio::test]
async fn test_concurrency_cap_is_respected() {
    let backend = Arc::new(MockBackend::new().with_running_polls(2));
    let tasks = (0..12).map(|i| job(&format!("t{}", i), &[])).collect();
    let config = SchedulerConfig { max_concurrent: 3, ..fast_config() };

    let report = dispatcher(&backend, config).run(graph(tasks)).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(backend.peak_in_flight(), 3);
    assert_eq!(backend.submissions().len(), 12);
}

#[tokio::test]
async fn test_tasks_with_more_dependents_go_first() {
    let backend = Arc::new(MockBackend::new());
    let graph = graph(vec![
        job("leaf", &[]),
        job("hub", &[]),
        job("hub-child-1", &["hub"]),
        job("hub-child-2", &["hub"]),
        job("other", &[]),
    ]);
    let config = SchedulerConfig { max_concurrent: 1, io_workers: 1, ..fast_config() };

    let report = dispatcher(&backend, config).run(graph).await.unwrap();

    assert!(report.is_complete());
    let order: Vec<String> = backend.submissions().iter().map(|t| t.to_string()).collect();
    // `hub` has two descendants. Ties keep graph order, so `leaf` precedes the
    // children that became ready after `hub` finished.
    assert_eq!(order, vec!["hub", "leaf", "hub-child-1", "hub-child-2", "other"]);
}

#[tokio::test]
async fn test_cancellation_stops_the_run() {
    let backend = Arc::new(MockBackend::new().with_running_polls(u32::MAX));
    let graph = graph(vec![job("a", &[]), job("b", &[]), job("c", &["a"])]);
    let config = SchedulerConfig { poll_interval: Duration::from_millis(10), ..fast_config() };

    let dispatcher = dispatcher(&backend, config);
    let token = dispatcher.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let report = dispatcher.run(graph).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.counts.cancelled, 3);
    assert_eq!(backend.cancellations().len(), 2);
    assert_eq!(backend.submission_count("c"), 0);
}

#[tokio::test]
async fn test_status_updates_are_published() {
    let backend = Arc::new(MockBackend::new().with_running_polls(1));
    let graph = graph(vec![job("a", &[]), job("b", &["a"])]);

    let dispatcher = dispatcher(&backend, fast_config());
    let status = dispatcher.subscribe();
    assert!(status.borrow().run_id.is_none());

    let report = dispatcher.run(graph).await.unwrap();

    let last = status.borrow().clone();
    assert!(last.finished);
    assert_eq!(last.run_id, Some(report.run_id.clone()));
    assert_eq!(last.counts.success, 2);
    assert!(last.iteration >= 3);
}

#[tokio::test]
async fn test_snapshot_is_written_during_run() {
    let dir = common::scratch_dir("scheduler-snapshot");
    let snapshot = dir.join("run_state.json");
    let backend = Arc::new(MockBackend::new());
    let config = SchedulerConfig { snapshot_path: Some(snapshot.clone()), ..fast_config() };

    let report = dispatcher(&backend, config).run(graph(vec![job("a", &[])])).await.unwrap();

    let contents = std::fs::read_to_string(&snapshot).unwrap();
    assert!(contents.contains(report.run_id.as_str()));
    assert!(contents.contains("\"success\""));

    std::fs::remove_dir_all(dir).unwrap();
}
