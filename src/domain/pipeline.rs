use std::path::PathBuf;
use std::sync::Arc;

use crate::api::settings_dto::PipelineSettingsDto;
use crate::domain::annotation::gene_set::GeneSet;
use crate::domain::annotation::sample::Sample;
use crate::domain::backend::backend_trait::SharedBackend;
use crate::domain::backend::backend_type::BackendType;
use crate::domain::job_graph::graph::JobGraph;
use crate::domain::job_graph::graph_builder::build_graph;
use crate::domain::job_graph::operation_plan::OperationPlan;
use crate::domain::results::aggregator::{Aggregator, OutputSpec};
use crate::domain::results::summary_table::SummaryTable;
use crate::domain::scheduler::dispatcher::Dispatcher;
use crate::domain::scheduler::run_report::RunReport;
use crate::domain::scheduler::run_state::RunState;
use crate::domain::scheduler::scheduler_config::{ResumeOptions, SchedulerConfig};
use crate::domain::utils::id::TaskId;
use crate::error::{Error, Result};

pub const RUN_REPORT_FILE: &str = "run_report.json";
pub const TASK_STATISTICS_FILE: &str = "task_statistics.csv";

/// Result of a pipeline run: the scheduler report plus the summary table
/// when one could be produced.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub report: RunReport,
    pub summary: Option<SummaryTable>,
    pub summary_path: PathBuf,

    /// Quantify tasks without usable output when strict aggregation was refused.
    pub incomplete: Vec<TaskId>,
}

/// Everything needed to run the splicing-event pipeline for one settings file.
#[derive(Debug)]
pub struct Pipeline {
    samples: Vec<Sample>,
    genes: Arc<GeneSet>,
    plan: OperationPlan,
    config: SchedulerConfig,
    output_spec: OutputSpec,
    backend: SharedBackend,
}

impl Pipeline {
    /// **Annotation:** loads the event annotation.
    /// **Samples and plan:** converts and validates the DTOs.
    /// **Backend:** instantiates the configured cluster backend.
    pub fn from_settings(dto: PipelineSettingsDto) -> Result<Self> {
        let genes = Arc::new(GeneSet::load(&dto.annotation_source)?);
        log::info!("Loaded {} gene(s) with {} event(s) from '{}'.", genes.genes().len(), genes.events().len(), dto.annotation_source.display());

        let samples = dto.samples.clone().into_iter().map(Sample::try_from).collect::<Result<Vec<_>>>()?;
        let config = SchedulerConfig::try_from(&dto)?;
        let plan = OperationPlan::from_dto(dto.plan, dto.output_dir.clone(), dto.annotation_source)?;
        let output_spec = OutputSpec::try_from(dto.aggregation)?;
        let backend = BackendType::get_instance(dto.backend, &plan.logs_dir())?;

        Ok(Pipeline { samples, genes, plan, config, output_spec, backend })
    }

    pub fn new(samples: Vec<Sample>, genes: Arc<GeneSet>, plan: OperationPlan, config: SchedulerConfig, backend: SharedBackend) -> Self {
        Pipeline { samples, genes, plan, config, output_spec: OutputSpec::strict(), backend }
    }

    pub fn with_output_spec(mut self, output_spec: OutputSpec) -> Self {
        self.output_spec = output_spec;
        self
    }

    pub fn with_backend(mut self, backend: SharedBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn genes(&self) -> &Arc<GeneSet> {
        &self.genes
    }

    pub fn plan(&self) -> &OperationPlan {
        &self.plan
    }

    pub fn output_spec(&self) -> &OutputSpec {
        &self.output_spec
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn build_graph(&self) -> Result<JobGraph> {
        build_graph(&self.samples, &self.genes, &self.plan)
    }

    /// Dispatcher for this pipeline. Take its cancellation token or status
    /// receiver before handing it to `run` or `resume`.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.backend.clone(), self.config.clone()).with_output_spec(self.output_spec.clone())
    }

    pub async fn run(&self, dispatcher: &Dispatcher) -> Result<PipelineOutcome> {
        let graph = self.build_graph()?;
        let report = dispatcher.run(graph).await?;
        self.finish(report)
    }

    pub async fn resume(&self, dispatcher: &Dispatcher, options: ResumeOptions) -> Result<PipelineOutcome> {
        let snapshot_path = self.snapshot_path()?;
        let report = dispatcher.resume_with(&snapshot_path, options).await?;
        self.finish(report)
    }

    /// Aggregates the persisted run with the configured output spec and
    /// writes the summary table.
    pub fn aggregate(&self) -> Result<SummaryTable> {
        let graph = RunState::load_graph(&self.snapshot_path()?)?;
        let summary = Aggregator::aggregate(&graph, &self.output_spec)?;
        summary.write_tsv(&self.summary_path())?;
        Ok(summary)
    }

    pub fn snapshot_path(&self) -> Result<PathBuf> {
        self.config.snapshot_path.clone().ok_or_else(|| Error::ConfigurationError("no snapshot path configured".to_string()))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.output_spec.output.clone().unwrap_or_else(|| self.plan.summary_path())
    }

    /// Persists the report and, unless the graph aggregated itself, merges
    /// whatever results the run produced.
    fn finish(&self, report: RunReport) -> Result<PipelineOutcome> {
        let logs_dir = self.plan.logs_dir();
        report.write_json(&logs_dir.join(RUN_REPORT_FILE))?;
        report.write_statistics(&logs_dir.join(TASK_STATISTICS_FILE))?;

        let summary_path = self.summary_path();
        if self.plan.aggregate || report.cancelled {
            return Ok(PipelineOutcome { report, summary: None, summary_path, incomplete: Vec::new() });
        }

        match self.aggregate() {
            Ok(summary) => Ok(PipelineOutcome { report, summary: Some(summary), summary_path, incomplete: Vec::new() }),
            Err(Error::IncompleteResultsError(incomplete)) => {
                log::error!("Strict aggregation refused: {} quantify task(s) without usable output.", incomplete.len());
                Ok(PipelineOutcome { report, summary: None, summary_path, incomplete })
            }
            Err(e) => Err(e),
        }
    }
}
