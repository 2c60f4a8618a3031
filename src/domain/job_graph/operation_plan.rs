use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::api::settings_dto::PlanDto;
use crate::domain::annotation::event::EventType;
use crate::domain::job_graph::command_template::CommandTemplate;
use crate::domain::job_graph::task::ResourceRequest;
use crate::error::{Error, Result};

pub const DEFAULT_DOWNLOAD_COMMAND: &str = "mkdir -p $(dirname {output}) && wget -q -O {output} {url}";
pub const DEFAULT_MAP_COMMAND: &str =
    "mkdir -p $(dirname {output}) && bowtie -p {cores} -S {reference} {reads} | samtools view -Sbh - | samtools sort -o {output} - && samtools index {output}";
pub const DEFAULT_QUANTIFY_COMMAND: &str =
    "mkdir -p $(dirname {output}) && quantify-events --annotation {annotation} --events {events} --bam {alignment} --output {output}";

/// When a producing stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum StagePolicy {
    Always,

    /// Skip when the stage's output already exists on disk.
    #[default]
    IfMissing,

    Never,
}

/// Granularity of quantification tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum QuantifyScope {
    /// One task per (sample, event).
    #[default]
    PerEvent,

    /// One task per (sample, event type), all events of that type batched.
    PerEventType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadStage {
    pub policy: StagePolicy,
    pub url: Option<String>,
    pub command: CommandTemplate,
    pub resources: ResourceRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapStage {
    pub policy: StagePolicy,
    pub command: CommandTemplate,
    pub resources: ResourceRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantifyStage {
    pub scope: QuantifyScope,
    pub command: CommandTemplate,
    pub resources: ResourceRequest,

    /// Restrict quantification to these types. `None` means every type.
    pub event_types: Option<Vec<EventType>>,
}

impl QuantifyStage {
    pub fn includes(&self, event_type: EventType) -> bool {
        match &self.event_types {
            Some(types) => types.contains(&event_type),
            None => true,
        }
    }
}

/// Which stages a run executes and how their commands look.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationPlan {
    /// Reference genome or index. When absent it is placed under
    /// `<output_dir>/reference/` by the download stage.
    pub reference: Option<PathBuf>,
    pub download: DownloadStage,
    pub map: MapStage,
    pub quantify: QuantifyStage,

    /// Add an in-graph aggregate task that writes the summary table.
    pub aggregate: bool,

    pub output_dir: PathBuf,

    /// Annotation handed to quantify commands as `{annotation}`.
    pub annotation_source: PathBuf,
}

impl OperationPlan {
    /// Plan with default commands and resources for every stage.
    pub fn new(output_dir: impl Into<PathBuf>, annotation_source: impl Into<PathBuf>) -> Self {
        OperationPlan {
            reference: None,
            download: DownloadStage {
                policy: StagePolicy::IfMissing,
                url: None,
                command: CommandTemplate::new(DEFAULT_DOWNLOAD_COMMAND),
                resources: ResourceRequest { cores: 1, memory_mb: 2048, wall_time_s: 3600 },
            },
            map: MapStage {
                policy: StagePolicy::IfMissing,
                command: CommandTemplate::new(DEFAULT_MAP_COMMAND),
                resources: ResourceRequest { cores: 4, memory_mb: 8192, wall_time_s: 12 * 3600 },
            },
            quantify: QuantifyStage {
                scope: QuantifyScope::PerEvent,
                command: CommandTemplate::new(DEFAULT_QUANTIFY_COMMAND),
                resources: ResourceRequest::default(),
                event_types: None,
            },
            aggregate: false,
            output_dir: output_dir.into(),
            annotation_source: annotation_source.into(),
        }
    }

    pub fn from_dto(dto: PlanDto, output_dir: impl Into<PathBuf>, annotation_source: impl Into<PathBuf>) -> Result<Self> {
        let mut plan = OperationPlan::new(output_dir, annotation_source);
        plan.reference = dto.reference;
        plan.aggregate = dto.aggregate;

        plan.download.policy = dto.download.policy;
        plan.download.url = dto.download.url.filter(|url| !url.trim().is_empty());
        if let Some(command) = dto.download.command {
            plan.download.command = CommandTemplate::new(command);
        }
        if let Some(resources) = dto.download.resources {
            plan.download.resources = validate_resources("download", resources)?;
        }

        plan.map.policy = dto.map.policy;
        if let Some(command) = dto.map.command {
            plan.map.command = CommandTemplate::new(command);
        }
        if let Some(resources) = dto.map.resources {
            plan.map.resources = validate_resources("map", resources)?;
        }

        plan.quantify.scope = dto.quantify.scope;
        if let Some(command) = dto.quantify.command {
            plan.quantify.command = CommandTemplate::new(command);
        }
        if let Some(resources) = dto.quantify.resources {
            plan.quantify.resources = validate_resources("quantify", resources)?;
        }
        if let Some(labels) = dto.quantify.event_types {
            let types = labels
                .iter()
                .map(|label| label.parse::<EventType>().map_err(|_| Error::ConfigurationError(format!("unknown event type '{}' in quantify filter", label))))
                .collect::<Result<Vec<_>>>()?;
            plan.quantify.event_types = Some(types);
        }

        Ok(plan)
    }

    /// Reference location: the configured path, else a file under
    /// `<output_dir>/reference/` named after the download URL.
    pub fn reference_path(&self) -> PathBuf {
        if let Some(reference) = &self.reference {
            return reference.clone();
        }
        let file_name = self
            .download
            .url
            .as_deref()
            .and_then(|url| url.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .unwrap_or("reference.fa");
        self.output_dir.join("reference").join(file_name)
    }

    pub fn mapping_dir(&self, sample: &str) -> PathBuf {
        self.output_dir.join("mapping").join(sample)
    }

    pub fn events_dir(&self, sample: &str) -> PathBuf {
        self.output_dir.join("analysis").join("events").join(sample)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join("analysis").join("summary.tsv")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.output_dir.join("logs")
    }
}

fn validate_resources(stage: &str, resources: ResourceRequest) -> Result<ResourceRequest> {
    if resources.cores == 0 || resources.memory_mb == 0 || resources.wall_time_s == 0 {
        return Err(Error::ConfigurationError(format!("{} resources must be non-zero, got {:?}", stage, resources)));
    }
    Ok(resources)
}

/// Whether a stage governed by `policy` has to produce `output`.
pub fn stage_required(policy: StagePolicy, output: &Path) -> bool {
    match policy {
        StagePolicy::Always => true,
        StagePolicy::IfMissing => !output.exists(),
        StagePolicy::Never => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::settings_dto::{DownloadStageDto, MapStageDto, QuantifyStageDto};

    fn dto() -> PlanDto {
        PlanDto {
            reference: None,
            download: DownloadStageDto { url: Some("http://example.org/genomes/hg19.fa".to_string()), ..Default::default() },
            map: MapStageDto::default(),
            quantify: QuantifyStageDto { event_types: Some(vec!["se".to_string(), "RI".to_string()]), ..Default::default() },
            aggregate: true,
        }
    }

    #[test]
    fn converts_dto_and_derives_paths() {
        let plan = OperationPlan::from_dto(dto(), "/out", "/gff").unwrap();

        assert_eq!(plan.reference_path(), PathBuf::from("/out/reference/hg19.fa"));
        assert_eq!(plan.mapping_dir("S1"), PathBuf::from("/out/mapping/S1"));
        assert_eq!(plan.summary_path(), PathBuf::from("/out/analysis/summary.tsv"));
        assert!(plan.quantify.includes(EventType::SkippedExon));
        assert!(!plan.quantify.includes(EventType::MutuallyExclusiveExons));
        assert!(plan.aggregate);
    }

    #[test]
    fn rejects_unknown_event_type() {
        let mut dto = dto();
        dto.quantify.event_types = Some(vec!["XYZ".to_string()]);
        assert!(matches!(OperationPlan::from_dto(dto, "/out", "/gff"), Err(Error::ConfigurationError(_))));
    }

    #[test]
    fn rejects_zero_resources() {
        let mut dto = dto();
        dto.map.resources = Some(ResourceRequest { cores: 0, ..Default::default() });
        assert!(OperationPlan::from_dto(dto, "/out", "/gff").is_err());
    }

    #[test]
    fn stage_policy_decides_on_existing_output() {
        let missing = std::env::temp_dir().join(format!("missing-{}", uuid::Uuid::new_v4()));
        assert!(stage_required(StagePolicy::IfMissing, &missing));
        assert!(stage_required(StagePolicy::Always, &std::env::temp_dir()));
        assert!(!stage_required(StagePolicy::IfMissing, &std::env::temp_dir()));
        assert!(!stage_required(StagePolicy::Never, &missing));
    }
}
