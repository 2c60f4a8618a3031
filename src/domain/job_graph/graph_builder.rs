use std::collections::HashSet;
use std::path::Path;

use crate::domain::annotation::event::{Event, EventType};
use crate::domain::annotation::gene_set::GeneSet;
use crate::domain::annotation::sample::Sample;
use crate::domain::job_graph::artifact::{Artifact, ArtifactKind};
use crate::domain::job_graph::command_template::TemplateBindings;
use crate::domain::job_graph::graph::JobGraph;
use crate::domain::job_graph::operation_plan::{OperationPlan, QuantifyScope, StagePolicy, stage_required};
use crate::domain::job_graph::task::{EventRef, Operation, ResourceRequest, TaskDescriptor};
use crate::domain::utils::id::{ArtifactId, TaskId};
use crate::error::{Error, Result};

pub const DOWNLOAD_TASK_ID: &str = "download:reference";
pub const AGGREGATE_TASK_ID: &str = "aggregate:summary";
pub const REFERENCE_ARTIFACT_ID: &str = "reference";
pub const SUMMARY_ARTIFACT_ID: &str = "summary";

/// Turns samples, the event annotation and an operation plan into a
/// validated job graph.
///
/// **Phase 1:** check samples and collect in-scope events.
/// **Phase 2:** decide per sample whether mapping is needed and, if any
/// sample needs it, whether the reference has to be downloaded.
/// **Phase 3:** emit download, map, quantify and aggregate tasks together with
/// their artifacts.
/// **Phase 4:** validate (dependencies resolve, no cycle).
pub fn build_graph(samples: &[Sample], genes: &GeneSet, plan: &OperationPlan) -> Result<JobGraph> {
    // Phase 1
    if samples.is_empty() {
        return Err(Error::GraphBuildError("no samples given".to_string()));
    }
    let mut seen = HashSet::new();
    for sample in samples {
        if !seen.insert(sample.id.clone()) {
            return Err(Error::GraphBuildError(format!("duplicate sample id '{}'", sample.id)));
        }
    }

    let events: Vec<&Event> = genes.events().iter().filter(|e| plan.quantify.includes(e.event_type)).collect();
    if events.is_empty() {
        return Err(Error::GraphBuildError(match &plan.quantify.event_types {
            Some(types) => format!("no events of type(s) {:?} in annotation '{}'", types, genes.source().display()),
            None => format!("no events in annotation '{}'", genes.source().display()),
        }));
    }

    // Phase 2
    let mut alignments = Vec::with_capacity(samples.len());
    for sample in samples {
        let alignment = match (&sample.alignment, plan.map.policy) {
            (Some(path), _) => path.clone(),
            (None, StagePolicy::Never) => {
                return Err(Error::GraphBuildError(format!("sample '{}' has no alignment and mapping is disabled", sample.id)));
            }
            (None, _) => plan.mapping_dir(sample.id.as_str()).join(format!("{}.bam", sample.id)),
        };
        let needs_map = stage_required(plan.map.policy, &alignment);
        if needs_map && sample.reads.is_empty() {
            return Err(Error::GraphBuildError(format!("sample '{}' must be mapped but has no reads", sample.id)));
        }
        alignments.push((alignment, needs_map));
    }

    let mut graph = JobGraph::new();
    let any_mapping = alignments.iter().any(|(_, needs_map)| *needs_map);
    let reference = plan.reference_path();

    // Phase 3
    let mut download_task: Option<TaskId> = None;
    if any_mapping {
        download_task = add_reference(&mut graph, plan, &reference)?;
    }

    let mut quantify_tasks: Vec<TaskId> = Vec::new();
    let mut quantify_outputs: Vec<ArtifactId> = Vec::new();

    for (sample, (alignment, needs_map)) in samples.iter().zip(alignments) {
        let alignment_id = format!("alignment:{}", sample.id);

        let map_task = if needs_map {
            Some(add_map_task(&mut graph, plan, sample, &alignment_id, &alignment, &reference, download_task.as_ref())?)
        } else {
            graph.add_artifact(Artifact::external(alignment_id.as_str(), alignment.clone(), ArtifactKind::Alignment))?;
            None
        };

        let batches: Vec<(String, Vec<&Event>, Option<EventType>)> = match plan.quantify.scope {
            QuantifyScope::PerEvent => events.iter().map(|e| (e.id.to_string(), vec![*e], None)).collect(),
            QuantifyScope::PerEventType => group_by_type(&events).into_iter().map(|(t, es)| (t.label().to_string(), es, Some(t))).collect(),
        };

        for (label, batch, event_type) in batches {
            let task_id = format!("quantify:{}:{}", sample.id, label);
            let output_id = format!("quant:{}:{}", sample.id, label);
            let output_path = plan.events_dir(sample.id.as_str()).join(format!("{}.tsv", file_safe(&label)));

            let operation = Operation::Quantify {
                sample_id: sample.id.clone(),
                events: batch.iter().map(|e| EventRef { event_id: e.id.clone(), gene_id: e.gene_id.clone(), event_type: e.event_type }).collect(),
                event_type,
            };

            let event_list = batch.iter().map(|e| e.id.as_str()).collect::<Vec<_>>().join(",");
            let bindings = base_bindings(&plan.quantify.resources)
                .set("alignment", path_str(&alignment))
                .set("output", path_str(&output_path))
                .set("sample", sample.id.as_str())
                .set("events", event_list)
                .set("event_type", event_type.map(|t| t.label()).unwrap_or_else(|| batch[0].event_type.label()))
                .set("annotation", path_str(&plan.annotation_source))
                .set("reference", path_str(&reference))
                .set("inputs", path_str(&alignment));

            let mut task = TaskDescriptor::new(task_id.as_str(), operation, plan.quantify.command.render(&bindings));
            task.resources = plan.quantify.resources;
            task.inputs.push(ArtifactId::new(alignment_id.as_str()));
            task.outputs.push(ArtifactId::new(output_id.as_str()));
            if let Some(map_task) = &map_task {
                task.add_dependency(map_task.clone());
            }

            graph.add_artifact(Artifact::produced(output_id.as_str(), output_path, ArtifactKind::Quantification, task.id.clone()))?;
            quantify_tasks.push(task.id.clone());
            quantify_outputs.push(ArtifactId::new(output_id));
            graph.add_task(task)?;
        }
    }

    if plan.aggregate {
        let mut task = TaskDescriptor::new(AGGREGATE_TASK_ID, Operation::Aggregate, "");
        task.inputs = quantify_outputs;
        task.outputs.push(ArtifactId::new(SUMMARY_ARTIFACT_ID));
        task.resources = ResourceRequest { cores: 1, memory_mb: 1024, wall_time_s: 3600 };
        task.dependencies = quantify_tasks;
        graph.add_artifact(Artifact::produced(SUMMARY_ARTIFACT_ID, plan.summary_path(), ArtifactKind::Summary, task.id.clone()))?;
        graph.add_task(task)?;
    }

    // Phase 4
    graph.validate()?;

    log::info!(
        "Built job graph: {} task(s) for {} sample(s) and {} event(s) (download: {}, aggregate: {})",
        graph.len(),
        samples.len(),
        events.len(),
        download_task.is_some(),
        plan.aggregate
    );
    Ok(graph)
}

/// Registers the reference artifact, adding a download task when needed.
fn add_reference(graph: &mut JobGraph, plan: &OperationPlan, reference: &Path) -> Result<Option<TaskId>> {
    if plan.download.policy == StagePolicy::Never && plan.reference.is_none() {
        return Err(Error::GraphBuildError("mapping requires a reference but none is configured and download is disabled".to_string()));
    }

    if !stage_required(plan.download.policy, reference) {
        graph.add_artifact(Artifact::external(REFERENCE_ARTIFACT_ID, reference, ArtifactKind::Reference))?;
        return Ok(None);
    }

    let url = plan
        .download
        .url
        .as_deref()
        .ok_or_else(|| Error::GraphBuildError(format!("reference '{}' must be downloaded but no URL is configured", reference.display())))?;

    let bindings = base_bindings(&plan.download.resources).set("url", url).set("output", path_str(reference)).set("reference", path_str(reference));

    let mut task = TaskDescriptor::new(DOWNLOAD_TASK_ID, Operation::Download { url: url.to_string() }, plan.download.command.render(&bindings));
    task.resources = plan.download.resources;
    task.outputs.push(ArtifactId::new(REFERENCE_ARTIFACT_ID));

    graph.add_artifact(Artifact::produced(REFERENCE_ARTIFACT_ID, reference, ArtifactKind::Reference, task.id.clone()))?;
    let id = task.id.clone();
    graph.add_task(task)?;
    Ok(Some(id))
}

fn add_map_task(
    graph: &mut JobGraph,
    plan: &OperationPlan,
    sample: &Sample,
    alignment_id: &str,
    alignment: &Path,
    reference: &Path,
    download_task: Option<&TaskId>,
) -> Result<TaskId> {
    let mut task = TaskDescriptor::new(format!("map:{}", sample.id), Operation::Map { sample_id: sample.id.clone() }, "");
    task.resources = plan.map.resources;
    task.inputs.push(ArtifactId::new(REFERENCE_ARTIFACT_ID));

    for (i, reads) in sample.reads.iter().enumerate() {
        let reads_id = format!("reads:{}:{}", sample.id, i + 1);
        graph.add_artifact(Artifact::external(reads_id.as_str(), reads.clone(), ArtifactKind::RawReads))?;
        task.inputs.push(ArtifactId::new(reads_id));
    }
    task.outputs.push(ArtifactId::new(alignment_id));
    if let Some(download) = download_task {
        task.add_dependency(download.clone());
    }

    let reads: Vec<String> = sample.reads.iter().map(|p| path_str(p)).collect();
    let bindings = base_bindings(&plan.map.resources)
        .set("reference", path_str(reference))
        .set("reads", reads.join(" "))
        .set("reads1", reads.first().cloned().unwrap_or_default())
        .set("reads2", reads.get(1).cloned().unwrap_or_default())
        .set("output", path_str(alignment))
        .set("alignment", path_str(alignment))
        .set("sample", sample.id.as_str())
        .set("annotation", path_str(&plan.annotation_source))
        .set("inputs", reads.join(" "));
    task.command = plan.map.command.render(&bindings);

    graph.add_artifact(Artifact::produced(alignment_id, alignment, ArtifactKind::Alignment, task.id.clone()))?;
    let id = task.id.clone();
    graph.add_task(task)?;
    Ok(id)
}

fn base_bindings(resources: &ResourceRequest) -> TemplateBindings {
    TemplateBindings::new().set("cores", resources.cores.to_string()).set("memory_mb", resources.memory_mb.to_string())
}

/// Events grouped by type, groups in order of first appearance.
fn group_by_type<'a>(events: &[&'a Event]) -> Vec<(EventType, Vec<&'a Event>)> {
    let mut groups: Vec<(EventType, Vec<&'a Event>)> = Vec::new();
    for event in events {
        match groups.iter_mut().find(|(t, _)| *t == event.event_type) {
            Some((_, group)) => group.push(*event),
            None => groups.push((event.event_type, vec![*event])),
        }
    }
    groups
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn file_safe(label: &str) -> String {
    label.chars().map(|c| if c == '/' || c.is_whitespace() { '_' } else { c }).collect()
}
