use std::path::PathBuf;
use std::time::Duration;

use crate::api::settings_dto::PipelineSettingsDto;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound on tasks submitted to the backend and not yet finished.
    pub max_concurrent: usize,

    /// Resubmissions after the first attempt. A task runs at most
    /// `max_retries + 1` times.
    pub max_retries: u32,

    pub poll_interval: Duration,

    /// Concurrent submit/status/cancel calls against the backend.
    pub io_workers: usize,

    /// Run state is persisted here after every transition when set.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig { max_concurrent: 50, max_retries: 2, poll_interval: Duration::from_secs(30), io_workers: 8, snapshot_path: None }
    }
}

impl SchedulerConfig {
    pub fn validate(self) -> Result<Self> {
        if self.max_concurrent == 0 {
            return Err(Error::ConfigurationError("maxConcurrent must be at least 1".to_string()));
        }
        if self.io_workers == 0 {
            return Err(Error::ConfigurationError("ioWorkers must be at least 1".to_string()));
        }
        Ok(self)
    }
}

impl TryFrom<&PipelineSettingsDto> for SchedulerConfig {
    type Error = Error;

    fn try_from(dto: &PipelineSettingsDto) -> Result<Self> {
        let snapshot_path = dto.snapshot_path.clone().unwrap_or_else(|| dto.output_dir.join("logs").join("run_state.json"));
        SchedulerConfig {
            max_concurrent: dto.max_concurrent,
            max_retries: dto.max_retries,
            poll_interval: Duration::from_millis(dto.poll_interval_ms),
            io_workers: dto.io_workers,
            snapshot_path: Some(snapshot_path),
        }
        .validate()
    }
}

/// How a persisted run is picked up again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeOptions {
    /// Reset `FailedPermanent` and `Blocked` tasks to `Pending` with a fresh
    /// attempt budget.
    pub retry_failed: bool,
}
