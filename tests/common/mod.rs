#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use rnaseq_orchestrator::domain::annotation::sample::Sample;
use rnaseq_orchestrator::domain::job_graph::graph::JobGraph;
use rnaseq_orchestrator::domain::job_graph::operation_plan::{OperationPlan, StagePolicy};
use rnaseq_orchestrator::domain::job_graph::task::{Operation, TaskDescriptor};
use rnaseq_orchestrator::domain::scheduler::scheduler_config::SchedulerConfig;

pub fn fixture(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("data").join(relative)
}

/// Fresh directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rnaseq-{}-{}", name, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig { max_concurrent: 50, max_retries: 2, poll_interval: Duration::from_millis(1), io_workers: 4, snapshot_path: None }
}

/// Backend task without artifacts.
pub fn job(id: &str, dependencies: &[&str]) -> TaskDescriptor {
    TaskDescriptor::new(id, Operation::Download { url: format!("http://example.org/{}", id) }, format!("run {}", id)).with_dependencies(dependencies)
}

pub fn graph(tasks: Vec<TaskDescriptor>) -> JobGraph {
    JobGraph::from_tasks(tasks, vec![]).unwrap()
}

/// Samples with existing alignments, so no mapping is planned.
pub fn aligned_samples(ids: &[&str]) -> Vec<Sample> {
    ids.iter().map(|id| Sample::new(*id, vec![]).with_alignment(format!("/data/{}.bam", id))).collect()
}

pub fn quantify_only_plan(output_dir: &Path) -> OperationPlan {
    let mut plan = OperationPlan::new(output_dir, fixture("annotation"));
    plan.map.policy = StagePolicy::Never;
    plan
}
