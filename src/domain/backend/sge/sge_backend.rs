use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tokio::process::Command;

use crate::api::settings_dto::SgeBackendDto;
use crate::domain::backend::backend_trait::{BackendJobStatus, ClusterBackend};
use crate::domain::backend::sge::job_script::{SgeScriptOptions, render_job_script};
use crate::domain::backend::sge::output_parser::{find_qstat_state, map_qstat_state, parse_qacct_output, parse_qsub_output};
use crate::domain::job_graph::graph::JobGraph;
use crate::domain::job_graph::task::TaskDescriptor;
use crate::domain::utils::id::BackendJobId;
use crate::error::{Error, Result};

/// Sun/Open Grid Engine driven through the `qsub`, `qstat`, `qacct` and
/// `qdel` command line tools.
#[derive(Debug)]
pub struct SgeBackend {
    options: SgeScriptOptions,

    /// Job scripts and joined stdout/stderr files are written here.
    script_dir: PathBuf,

    unaccounted: Mutex<UnaccountedJobs>,
}

/// Jobs that left `qstat` without an accounting record yet. `qacct` lags
/// behind the queue, so a job only counts as missing once it stayed
/// unaccounted for more than `grace_polls` consecutive polls.
#[derive(Debug)]
struct UnaccountedJobs {
    grace_polls: u32,
    misses: HashMap<BackendJobId, u32>,
}

impl UnaccountedJobs {
    fn new(grace_polls: u32) -> Self {
        UnaccountedJobs { grace_polls, misses: HashMap::new() }
    }

    fn record_miss(&mut self, job_id: &BackendJobId) -> BackendJobStatus {
        let misses = self.misses.entry(job_id.clone()).or_insert(0);
        *misses += 1;
        if *misses > self.grace_polls {
            self.misses.remove(job_id);
            BackendJobStatus::Missing
        } else {
            BackendJobStatus::Running
        }
    }

    fn forget(&mut self, job_id: &BackendJobId) {
        self.misses.remove(job_id);
    }
}

impl SgeBackend {
    pub fn new(dto: SgeBackendDto, default_script_dir: PathBuf) -> Self {
        SgeBackend {
            options: SgeScriptOptions { queue: dto.queue, parallel_env: dto.parallel_env },
            script_dir: dto.script_dir.unwrap_or(default_script_dir),
            unaccounted: Mutex::new(UnaccountedJobs::new(dto.accounting_grace_polls)),
        }
    }

    fn unaccounted(&self) -> MutexGuard<'_, UnaccountedJobs> {
        self.unaccounted.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run(program: &str, args: &[&str]) -> Result<std::process::Output> {
        log::debug!("Executing: {} {}", program, args.join(" "));
        Command::new(program).args(args).output().await.map_err(|e| Error::BackendError(format!("failed to execute {}: {}", program, e)))
    }
}

#[async_trait]
impl ClusterBackend for SgeBackend {
    fn name(&self) -> &str {
        "sge"
    }

    async fn prepare(&self, _graph: &JobGraph) -> Result<()> {
        tokio::fs::create_dir_all(&self.script_dir).await?;
        Ok(())
    }

    async fn submit(&self, task: &TaskDescriptor) -> Result<BackendJobId> {
        let stem = task.file_stem();
        let script_path = self.script_dir.join(format!("{}.sh", stem));
        let output_path = self.script_dir.join(format!("{}.out", stem));

        tokio::fs::write(&script_path, render_job_script(task, &self.options, &output_path)).await?;

        let script = script_path.to_string_lossy().into_owned();
        let output = Self::run("qsub", &[script.as_str()]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            return Err(Error::SubmissionError {
                task_id: task.id.clone(),
                message: format!("qsub exited with {}: {}", output.status, String::from_utf8_lossy(&output.stderr).trim()),
            });
        }
        parse_qsub_output(&stdout)
    }

    async fn status(&self, job_id: &BackendJobId) -> Result<BackendJobStatus> {
        let output = Self::run("qstat", &[]).await?;
        if !output.status.success() {
            return Err(Error::BackendError(format!("qstat exited with {}: {}", output.status, String::from_utf8_lossy(&output.stderr).trim())));
        }

        if let Some(state) = find_qstat_state(&String::from_utf8_lossy(&output.stdout), job_id) {
            self.unaccounted().forget(job_id);
            return Ok(map_qstat_state(&state));
        }

        let output = Self::run("qacct", &["-j", job_id.as_str()]).await?;
        let record = if output.status.success() { parse_qacct_output(&String::from_utf8_lossy(&output.stdout)) } else { None };
        match record {
            Some(record) => {
                self.unaccounted().forget(job_id);
                Ok(record.to_status())
            }
            None => {
                let status = self.unaccounted().record_miss(job_id);
                log::debug!("Job {} is in neither qstat nor qacct, reporting {:?}.", job_id, status);
                Ok(status)
            }
        }
    }

    async fn cancel(&self, job_id: &BackendJobId) -> Result<()> {
        let output = Self::run("qdel", &[job_id.as_str()]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() && !stdout.contains("does not exist") {
            return Err(Error::BackendError(format!("qdel {} exited with {}: {}", job_id, output.status, String::from_utf8_lossy(&output.stderr).trim())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unaccounted_jobs_stay_running_during_grace() {
        let mut unaccounted = UnaccountedJobs::new(2);
        let job = BackendJobId::new("4711");

        assert_eq!(unaccounted.record_miss(&job), BackendJobStatus::Running);
        assert_eq!(unaccounted.record_miss(&job), BackendJobStatus::Running);
        assert_eq!(unaccounted.record_miss(&job), BackendJobStatus::Missing);

        // The counter starts over once the job was given up on.
        assert_eq!(unaccounted.record_miss(&job), BackendJobStatus::Running);
    }

    #[test]
    fn accounting_record_resets_misses() {
        let mut unaccounted = UnaccountedJobs::new(1);
        let job = BackendJobId::new("17");

        assert_eq!(unaccounted.record_miss(&job), BackendJobStatus::Running);
        unaccounted.forget(&job);
        assert_eq!(unaccounted.record_miss(&job), BackendJobStatus::Running);
        assert_eq!(unaccounted.record_miss(&job), BackendJobStatus::Missing);
    }

    #[test]
    fn zero_grace_reports_missing_right_away() {
        let mut unaccounted = UnaccountedJobs::new(0);
        assert_eq!(unaccounted.record_miss(&BackendJobId::new("1")), BackendJobStatus::Missing);
    }
}
