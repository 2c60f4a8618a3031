use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::job_graph::operation_plan::{QuantifyScope, StagePolicy};
use crate::domain::job_graph::task::ResourceRequest;

/// Top-level settings file of a pipeline run.
#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSettingsDto {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_io_workers")]
    pub io_workers: usize,

    /// GFF3 file or directory of per-event-type GFF3 files.
    pub annotation_source: PathBuf,
    pub output_dir: PathBuf,
    pub samples: Vec<SampleDto>,
    pub plan: PlanDto,
    pub backend: BackendDto,
    #[serde(default)]
    pub aggregation: AggregationDto,

    /// Where the run state is persisted. Defaults to `<outputDir>/logs/run_state.json`.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

fn default_max_concurrent() -> usize {
    50
}

fn default_max_retries() -> u32 {
    2
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

fn default_io_workers() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleDto {
    pub id: String,
    #[serde(default)]
    pub reads: Vec<PathBuf>,
    #[serde(default)]
    pub alignment: Option<PathBuf>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub replicate: Option<u32>,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDto {
    /// Reference genome or index. Required unless it is downloaded.
    #[serde(default)]
    pub reference: Option<PathBuf>,
    #[serde(default)]
    pub download: DownloadStageDto,
    #[serde(default)]
    pub map: MapStageDto,
    #[serde(default)]
    pub quantify: QuantifyStageDto,
    #[serde(default)]
    pub aggregate: bool,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStageDto {
    #[serde(default = "default_download_policy")]
    pub policy: StagePolicy,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourceRequest>,
}

fn default_download_policy() -> StagePolicy {
    StagePolicy::IfMissing
}

impl Default for DownloadStageDto {
    fn default() -> Self {
        DownloadStageDto { policy: default_download_policy(), url: None, command: None, resources: None }
    }
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapStageDto {
    #[serde(default = "default_map_policy")]
    pub policy: StagePolicy,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourceRequest>,
}

fn default_map_policy() -> StagePolicy {
    StagePolicy::IfMissing
}

impl Default for MapStageDto {
    fn default() -> Self {
        MapStageDto { policy: default_map_policy(), command: None, resources: None }
    }
}

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuantifyStageDto {
    #[serde(default)]
    pub scope: QuantifyScope,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourceRequest>,

    /// Event type labels to quantify, e.g. `["SE", "RI"]`. All types when absent.
    #[serde(default)]
    pub event_types: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationDto {
    /// `strict` or `partial`.
    #[serde(default = "default_aggregation_mode")]
    pub mode: String,
    #[serde(default)]
    pub samples: Option<Vec<String>>,
    #[serde(default)]
    pub events: Option<Vec<String>>,

    /// Summary table path. Defaults to `<outputDir>/analysis/summary.tsv`.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

fn default_aggregation_mode() -> String {
    "strict".to_string()
}

impl Default for AggregationDto {
    fn default() -> Self {
        AggregationDto { mode: default_aggregation_mode(), samples: None, events: None, output: None }
    }
}

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MockBackendDto {
    /// Write declared outputs of succeeding tasks to disk.
    #[serde(default)]
    pub materialize_outputs: bool,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SgeBackendDto {
    #[serde(default)]
    pub queue: Option<String>,

    /// Parallel environment used for multi-core jobs.
    #[serde(default = "default_parallel_env")]
    pub parallel_env: String,

    /// Directory for generated job scripts and their output files.
    #[serde(default)]
    pub script_dir: Option<PathBuf>,

    /// Status polls a finished job may go without an accounting record
    /// before it is reported missing.
    #[serde(default = "default_accounting_grace_polls")]
    pub accounting_grace_polls: u32,
}

fn default_parallel_env() -> String {
    "smp".to_string()
}

fn default_accounting_grace_polls() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlurmBackendDto {
    pub slurm_url: String,
    pub user_name: String,
    pub jwt_token: String,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// Cluster backend selection, discriminated by `typ`.
#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(tag = "typ", rename_all = "camelCase")]
pub enum BackendDto {
    Mock(MockBackendDto),
    Sge(SgeBackendDto),
    Slurm(SlurmBackendDto),
}

impl BackendDto {
    pub fn typ(&self) -> &'static str {
        match self {
            BackendDto::Mock(_) => "mock",
            BackendDto::Sge(_) => "sge",
            BackendDto::Slurm(_) => "slurm",
        }
    }
}
