use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::str::FromStr;

use crate::api::settings_dto::AggregationDto;
use crate::domain::job_graph::graph::JobGraph;
use crate::domain::job_graph::task::{Operation, TaskState};
use crate::domain::results::quantification::QuantificationTable;
use crate::domain::results::summary_table::{RowStatus, SummaryRow, SummaryTable};
use crate::domain::utils::id::{EventId, SampleId, TaskId};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregationMode {
    /// Every in-scope (event, sample) pair must have a value.
    #[default]
    Strict,

    /// Gaps become `missing` rows.
    Partial,
}

impl FromStr for AggregationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(AggregationMode::Strict),
            "partial" => Ok(AggregationMode::Partial),
            _ => Err(Error::ConfigurationError(format!("unknown aggregation mode '{}', expected 'strict' or 'partial'", s))),
        }
    }
}

/// What to aggregate and how strictly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSpec {
    pub mode: AggregationMode,

    /// Restrict to these samples. `None` means all.
    pub samples: Option<HashSet<SampleId>>,

    /// Restrict to these events. `None` means all.
    pub events: Option<HashSet<EventId>>,

    /// Summary destination when aggregating outside the graph.
    pub output: Option<PathBuf>,
}

impl OutputSpec {
    pub fn strict() -> Self {
        OutputSpec::default()
    }

    pub fn partial() -> Self {
        OutputSpec { mode: AggregationMode::Partial, ..Default::default() }
    }

    pub fn with_mode(mut self, mode: AggregationMode) -> Self {
        self.mode = mode;
        self
    }

    fn includes_sample(&self, sample_id: &SampleId) -> bool {
        self.samples.as_ref().is_none_or(|samples| samples.contains(sample_id))
    }

    fn includes_event(&self, event_id: &EventId) -> bool {
        self.events.as_ref().is_none_or(|events| events.contains(event_id))
    }
}

impl TryFrom<AggregationDto> for OutputSpec {
    type Error = Error;

    fn try_from(dto: AggregationDto) -> Result<Self> {
        Ok(OutputSpec {
            mode: dto.mode.parse()?,
            samples: dto.samples.map(|ids| ids.into_iter().map(SampleId::new).collect()),
            events: dto.events.map(|ids| ids.into_iter().map(EventId::new).collect()),
            output: dto.output,
        })
    }
}

/// Merges the quantification artifacts of a run into one summary table.
pub struct Aggregator;

impl Aggregator {
    /// **Scope:** every quantify task of `graph` whose sample and events pass
    /// the filters of `spec`.
    ///
    /// **Collect:** tasks in `Success` have their output table read and
    /// joined on event id. A task that did not succeed, whose output cannot
    /// be read, or whose output lacks an in-scope event is incomplete.
    ///
    /// **Decide:** in strict mode any incomplete task fails the aggregation
    /// with `Error::IncompleteResultsError`. In partial mode the affected
    /// pairs become `missing` rows.
    pub fn aggregate(graph: &JobGraph, spec: &OutputSpec) -> Result<SummaryTable> {
        let mut rows = Vec::new();
        let mut incomplete: Vec<TaskId> = Vec::new();

        for task in graph.tasks() {
            let (sample_id, events) = match &task.operation {
                Operation::Quantify { sample_id, events, .. } => (sample_id, events),
                _ => continue,
            };
            if !spec.includes_sample(sample_id) {
                continue;
            }
            let events: Vec<_> = events.iter().filter(|e| spec.includes_event(&e.event_id)).collect();
            if events.is_empty() {
                continue;
            }

            let table = if task.state == TaskState::Success { Self::read_output(graph, &task.id) } else { None };
            let mut task_complete = table.is_some();

            for event in events {
                let values = table.as_ref().and_then(|t| t.values_for(&event.event_id));
                let status = if values.is_some() { RowStatus::Complete } else { RowStatus::Missing };
                if values.is_none() && table.is_some() {
                    log::warn!("Output of task {} has no row for event {}.", task.id, event.event_id);
                    task_complete = false;
                }

                rows.push(SummaryRow {
                    event_id: event.event_id.clone(),
                    gene_id: event.gene_id.clone(),
                    event_type: event.event_type,
                    sample_id: sample_id.clone(),
                    status,
                    values: values.map(|v| v.into_iter().collect::<BTreeMap<_, _>>()).unwrap_or_default(),
                });
            }

            if !task_complete {
                incomplete.push(task.id.clone());
            }
        }

        if spec.mode == AggregationMode::Strict && !incomplete.is_empty() {
            return Err(Error::IncompleteResultsError(incomplete));
        }
        if !incomplete.is_empty() {
            log::warn!("Aggregating partial results: {} task(s) without usable output.", incomplete.len());
        }

        Ok(SummaryTable::new(rows))
    }

    fn read_output(graph: &JobGraph, task_id: &TaskId) -> Option<QuantificationTable> {
        let task = graph.get(task_id)?;
        let artifact = task.outputs.first().and_then(|id| graph.artifact(id))?;

        match QuantificationTable::read(&artifact.path) {
            Ok(table) => Some(table),
            Err(e) => {
                log::warn!("Could not read output '{}' of task {}: {}", artifact.path.display(), task_id, e);
                None
            }
        }
    }
}
