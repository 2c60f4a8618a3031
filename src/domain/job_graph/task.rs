use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::domain::annotation::event::EventType;
use crate::domain::utils::id::{ArtifactId, EventId, GeneId, SampleId, TaskId};

/// Lifecycle state of a task within one run.
///
/// `Pending → Ready → Submitted → Running → {Success, Failed}`. A `Failed`
/// task goes back to `Ready` while it has retries left, otherwise it ends in
/// `FailedPermanent`. `Blocked` and `Cancelled` are terminal states for tasks
/// that never got to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskState {
    /// Waiting for dependencies.
    Pending,

    /// All dependencies succeeded, not yet handed to the backend.
    Ready,

    /// Accepted by the backend, queued there.
    Submitted,

    /// Reported as running by the backend.
    Running,

    Success,

    /// The last attempt failed; a retry decision is still to be made.
    Failed,

    /// Retries exhausted or the backend reported a non-retriable fault.
    FailedPermanent,

    /// A dependency failed permanently. The task itself never ran.
    Blocked,

    /// Stopped by a run-level cancellation request.
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::FailedPermanent | TaskState::Blocked | TaskState::Cancelled)
    }

    /// Handed to the backend and not yet resolved.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TaskState::Submitted | TaskState::Running)
    }

    /// Dependents of a task in this state can never run.
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, TaskState::FailedPermanent | TaskState::Blocked)
    }

    pub const ALL: [TaskState; 9] = [
        TaskState::Pending,
        TaskState::Ready,
        TaskState::Submitted,
        TaskState::Running,
        TaskState::Success,
        TaskState::Failed,
        TaskState::FailedPermanent,
        TaskState::Blocked,
        TaskState::Cancelled,
    ];
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskState::Pending => "PENDING",
            TaskState::Ready => "READY",
            TaskState::Submitted => "SUBMITTED",
            TaskState::Running => "RUNNING",
            TaskState::Success => "SUCCESS",
            TaskState::Failed => "FAILED",
            TaskState::FailedPermanent => "FAILED-PERMANENT",
            TaskState::Blocked => "BLOCKED",
            TaskState::Cancelled => "CANCELLED",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Download,
    Map,
    Quantify,
    Aggregate,
}

impl OperationKind {
    /// `Aggregate` is executed by the coordinator itself; every other kind is
    /// a cluster job.
    pub fn runs_on_backend(&self) -> bool {
        !matches!(self, OperationKind::Aggregate)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationKind::Download => "download",
            OperationKind::Map => "map",
            OperationKind::Quantify => "quantify",
            OperationKind::Aggregate => "aggregate",
        };
        write!(f, "{}", label)
    }
}

/// An event as seen by a quantify task: enough to label summary rows without
/// going back to the annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRef {
    pub event_id: EventId,
    pub gene_id: GeneId,
    pub event_type: EventType,
}

/// What a task does, with the payload each kind needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Operation {
    Download {
        url: String,
    },
    Map {
        sample_id: SampleId,
    },
    Quantify {
        sample_id: SampleId,
        events: Vec<EventRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_type: Option<EventType>,
    },
    Aggregate,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Download { .. } => OperationKind::Download,
            Operation::Map { .. } => OperationKind::Map,
            Operation::Quantify { .. } => OperationKind::Quantify,
            Operation::Aggregate => OperationKind::Aggregate,
        }
    }

    pub fn sample_id(&self) -> Option<&SampleId> {
        match self {
            Operation::Map { sample_id } | Operation::Quantify { sample_id, .. } => Some(sample_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceRequest {
    pub cores: u32,
    pub memory_mb: u64,
    pub wall_time_s: u64,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        ResourceRequest { cores: 1, memory_mb: 4096, wall_time_s: 4 * 3600 }
    }
}

/// One unit of cluster work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    /// Deterministic id, e.g. `map:S1` or `quantify:S1:SE.12`. Stable across
    /// restarts so a persisted run can be matched back to its graph.
    pub id: TaskId,

    pub operation: Operation,

    /// Shell command executed by the backend. Empty for local operations.
    pub command: String,

    pub inputs: Vec<ArtifactId>,
    pub outputs: Vec<ArtifactId>,
    pub resources: ResourceRequest,

    /// Keys to other tasks of the same graph.
    pub dependencies: Vec<TaskId>,

    pub state: TaskState,
}

impl TaskDescriptor {
    pub fn new(id: impl Into<String>, operation: Operation, command: impl Into<String>) -> Self {
        TaskDescriptor {
            id: TaskId::new(id),
            operation,
            command: command.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            resources: ResourceRequest::default(),
            dependencies: Vec::new(),
            state: TaskState::Pending,
        }
    }

    pub fn with_dependencies(mut self, dependencies: &[&str]) -> Self {
        for dep in dependencies {
            self.add_dependency(TaskId::new(*dep));
        }
        self
    }

    /// Adds a dependency unless it is already present.
    pub fn add_dependency(&mut self, dependency: TaskId) {
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }

    /// Job name handed to the cluster; schedulers reject most punctuation.
    pub fn job_name(&self) -> String {
        self.id.as_str().chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' { c } else { '_' }).collect()
    }

    /// Stem for per-job files such as scripts and stdout logs. `job_name`
    /// folds distinct ids onto the same name, so a short hash of the id is
    /// appended.
    pub fn file_stem(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.id.as_str().hash(&mut hasher);
        format!("{}-{:08x}", self.job_name(), hasher.finish() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_in_flight_states() {
        assert!(TaskState::Blocked.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Failed.is_terminal());
        assert!(TaskState::Running.is_in_flight());
        assert!(!TaskState::Ready.is_in_flight());
    }

    #[test]
    fn dependencies_are_deduplicated() {
        let task = TaskDescriptor::new("quantify:S1:E1", Operation::Aggregate, "").with_dependencies(&["map:S1", "map:S1"]);
        assert_eq!(task.dependencies, vec![TaskId::new("map:S1")]);
    }

    #[test]
    fn job_name_is_scheduler_safe() {
        let task = TaskDescriptor::new("quantify:S1:SE.chr1:100-200", Operation::Aggregate, "");
        assert_eq!(task.job_name(), "quantify_S1_SE.chr1_100-200");
    }

    #[test]
    fn file_stem_separates_ids_with_the_same_job_name() {
        let slash = TaskDescriptor::new("quantify:S1:a/b", Operation::Aggregate, "");
        let underscore = TaskDescriptor::new("quantify:S1:a_b", Operation::Aggregate, "");

        assert_eq!(slash.job_name(), underscore.job_name());
        assert_ne!(slash.file_stem(), underscore.file_stem());
        assert!(slash.file_stem().starts_with("quantify_S1_a_b-"));
        assert_eq!(slash.file_stem(), slash.clone().file_stem());
    }

    #[test]
    fn operation_serializes_with_kind_tag() {
        let op = Operation::Map { sample_id: SampleId::new("S1") };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "map");
        assert_eq!(json["sampleId"], "S1");
    }
}
