mod common;

use rnaseq_orchestrator::api::settings_dto::BackendDto;
use rnaseq_orchestrator::domain::job_graph::graph_builder::AGGREGATE_TASK_ID;
use rnaseq_orchestrator::domain::job_graph::operation_plan::QuantifyScope;
use rnaseq_orchestrator::domain::pipeline::Pipeline;
use rnaseq_orchestrator::domain::utils::id::TaskId;
use rnaseq_orchestrator::error::Error;
use rnaseq_orchestrator::load_settings;

use common::{fixture, scratch_dir};

#[test]
fn test_load_settings() {
    let settings = load_settings(fixture("settings_mock.json")).unwrap();

    assert_eq!(settings.max_concurrent, 4);
    assert_eq!(settings.max_retries, 1);
    assert_eq!(settings.samples.len(), 2);
    assert_eq!(settings.samples[0].condition.as_deref(), Some("control"));
    assert!(matches!(settings.backend, BackendDto::Mock(ref mock) if mock.materialize_outputs));
    assert!(settings.plan.aggregate);
    assert_eq!(settings.aggregation.mode, "strict");
}

#[test]
fn test_missing_settings_file() {
    assert!(matches!(load_settings(fixture("no-such-settings.json")), Err(Error::IoError(_))));
}

#[test]
fn test_invalid_settings_are_configuration_errors() {
    let mut settings = load_settings(fixture("settings_mock.json")).unwrap();
    settings.annotation_source = fixture("annotation");
    settings.max_concurrent = 0;
    assert!(matches!(Pipeline::from_settings(settings), Err(Error::ConfigurationError(_))));

    let mut settings = load_settings(fixture("settings_mock.json")).unwrap();
    settings.annotation_source = fixture("annotation");
    settings.aggregation.mode = "lenient".to_string();
    assert!(matches!(Pipeline::from_settings(settings), Err(Error::ConfigurationError(_))));
}

#[tokio::test]
async fn test_run_pipeline_from_settings() {
    let out = scratch_dir("pipeline-settings");
    let mut settings = load_settings(fixture("settings_mock.json")).unwrap();
    settings.annotation_source = fixture("annotation");
    settings.output_dir = out.clone();

    let pipeline = Pipeline::from_settings(settings).unwrap();
    assert_eq!(pipeline.plan().quantify.scope, QuantifyScope::PerEventType);
    assert_eq!(pipeline.snapshot_path().unwrap(), out.join("logs").join("run_state.json"));

    let graph = pipeline.build_graph().unwrap();
    assert_eq!(graph.len(), 5);
    let quantify = graph.get(&TaskId::new("quantify:S1:SE")).unwrap();
    assert_eq!(quantify.resources.cores, 2);
    assert!(quantify.command.starts_with("quantify-events --events SE.1,SE.2 --bam tests/data/alignments/S1.bam"));

    let outcome = pipeline.run(&pipeline.dispatcher()).await.unwrap();
    assert!(outcome.report.is_complete());
    assert!(outcome.report.task(AGGREGATE_TASK_ID).is_some());

    let summary = std::fs::read_to_string(out.join("analysis").join("summary.tsv")).unwrap();
    // Header plus 2 samples x 3 events.
    assert_eq!(summary.lines().count(), 7);

    std::fs::remove_dir_all(out).unwrap();
}
