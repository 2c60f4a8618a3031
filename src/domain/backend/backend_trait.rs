use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::domain::job_graph::graph::JobGraph;
use crate::domain::job_graph::task::TaskDescriptor;
use crate::domain::utils::id::BackendJobId;
use crate::error::Result;

/// What a cluster reports about one submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendJobStatus {
    Queued,
    Running,
    Succeeded,
    Failed { message: String, retriable: bool },

    /// The backend no longer knows the job (purged or never existed).
    Missing,
}

impl BackendJobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, BackendJobStatus::Succeeded | BackendJobStatus::Failed { .. } | BackendJobStatus::Missing)
    }
}

impl fmt::Display for BackendJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendJobStatus::Queued => write!(f, "queued"),
            BackendJobStatus::Running => write!(f, "running"),
            BackendJobStatus::Succeeded => write!(f, "succeeded"),
            BackendJobStatus::Failed { message, retriable: true } => write!(f, "failed (retriable): {}", message),
            BackendJobStatus::Failed { message, retriable: false } => write!(f, "failed: {}", message),
            BackendJobStatus::Missing => write!(f, "missing"),
        }
    }
}

/// A batch system that runs task commands.
///
/// `submit` returns `Error::SubmissionError` when the cluster refuses the job
/// and `Error::BackendError` when it could not be reached. Both count as a
/// failed attempt for the dispatcher.
#[async_trait]
pub trait ClusterBackend: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Called once before the first submission of a run.
    async fn prepare(&self, _graph: &JobGraph) -> Result<()> {
        Ok(())
    }

    async fn submit(&self, task: &TaskDescriptor) -> Result<BackendJobId>;

    async fn status(&self, job_id: &BackendJobId) -> Result<BackendJobStatus>;

    async fn cancel(&self, job_id: &BackendJobId) -> Result<()>;
}

pub type SharedBackend = Arc<dyn ClusterBackend>;
