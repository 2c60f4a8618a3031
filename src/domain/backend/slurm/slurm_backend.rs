use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use std::path::PathBuf;

use crate::api::settings_dto::SlurmBackendDto;
use crate::domain::backend::backend_trait::{BackendJobStatus, ClusterBackend};
use crate::domain::backend::slurm::response::{
    SlurmJobDescription, SlurmJobSubmitRequest, SlurmJobsResponse, SlurmNumericValue, SlurmSubmitResponse, describe_errors,
};
use crate::domain::backend::slurm::slurm_endpoint::SlurmEndpoint;
use crate::domain::job_graph::task::TaskDescriptor;
use crate::domain::utils::id::BackendJobId;
use crate::error::{Error, Result};

/// Slurm cluster reached through `slurmrestd`.
#[derive(Debug)]
pub struct SlurmBackend {
    client: reqwest::Client,
    slurm_url: String,
    user_name: String,
    partition: Option<String>,
    working_dir: PathBuf,
}

impl SlurmBackend {
    pub fn new(dto: SlurmBackendDto, default_working_dir: PathBuf) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-SLURM-USER-NAME",
            HeaderValue::from_str(&dto.user_name).map_err(|e| Error::ConfigurationError(format!("invalid Slurm user name: {}", e)))?,
        );
        headers.insert(
            "X-SLURM-USER-TOKEN",
            HeaderValue::from_str(&dto.jwt_token).map_err(|e| Error::ConfigurationError(format!("invalid Slurm token: {}", e)))?,
        );

        let client = reqwest::Client::builder().default_headers(headers).build()?;

        Ok(SlurmBackend {
            client,
            slurm_url: dto.slurm_url.trim_end_matches('/').to_string(),
            user_name: dto.user_name,
            partition: dto.partition,
            working_dir: dto.working_dir.unwrap_or(default_working_dir),
        })
    }

    fn request(&self, endpoint: &SlurmEndpoint) -> reqwest::RequestBuilder {
        self.client.request(endpoint.method(), format!("{}{}", self.slurm_url, endpoint.path()))
    }

    fn submit_request(&self, task: &TaskDescriptor) -> SlurmJobSubmitRequest {
        let job_name = task.job_name();
        let resources = &task.resources;
        let working_dir = self.working_dir.to_string_lossy().into_owned();

        SlurmJobSubmitRequest {
            script: format!("#!/bin/bash\nset -e\n{}\n", task.command),
            job: SlurmJobDescription {
                standard_output: format!("{}/{}.out", working_dir, task.file_stem()),
                name: job_name,
                partition: self.partition.clone(),
                current_working_directory: working_dir,
                environment: vec!["PATH=/bin:/usr/bin:/usr/local/bin".to_string()],
                cpus_per_task: resources.cores.max(1),
                memory_per_node: SlurmNumericValue::of(resources.memory_mb as i64),
                time_limit: SlurmNumericValue::of(resources.wall_time_s.div_ceil(60) as i64),
            },
        }
    }
}

#[async_trait]
impl ClusterBackend for SlurmBackend {
    fn name(&self) -> &str {
        "slurm"
    }

    async fn submit(&self, task: &TaskDescriptor) -> Result<BackendJobId> {
        let endpoint = SlurmEndpoint::JobSubmit;
        let response = self.request(&endpoint).json(&self.submit_request(task)).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body_text = response.text().await?;
            log::error!(
                "Submission of task {} was rejected by Slurm.\nX-SLURM-USER-NAME: <<{}>>\nSlurm-URL: <<{}>>\nSlurm-Requested-Endpoint: <<{:?}>>\nResponse-Status-Code: <<{}>>\nResponse-Body: <<{}>>",
                task.id,
                self.user_name,
                self.slurm_url,
                endpoint,
                status,
                body_text
            );
            return Err(Error::SubmissionError { task_id: task.id.clone(), message: format!("HTTP {}: {}", status, body_text) });
        }

        let body: SlurmSubmitResponse = response.json().await?;
        match body.job_id {
            Some(job_id) if body.errors.is_empty() => Ok(BackendJobId::new(job_id.to_string())),
            _ => Err(Error::SubmissionError { task_id: task.id.clone(), message: describe_errors(&body.errors) }),
        }
    }

    async fn status(&self, job_id: &BackendJobId) -> Result<BackendJobStatus> {
        let response = self.request(&SlurmEndpoint::Job(job_id.clone())).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(BackendJobStatus::Missing);
        }
        if !status.is_success() {
            return Err(Error::BackendError(format!("status query for job {} returned HTTP {}: {}", job_id, status, response.text().await?)));
        }

        let body: SlurmJobsResponse = response.json().await?;
        Ok(body.jobs.iter().find(|job| job.job_id.to_string() == job_id.as_str()).map(|job| job.to_status()).unwrap_or(BackendJobStatus::Missing))
    }

    async fn cancel(&self, job_id: &BackendJobId) -> Result<()> {
        let response = self.request(&SlurmEndpoint::CancelJob(job_id.clone())).send().await?;
        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(Error::BackendError(format!("cancelling job {} returned HTTP {}: {}", job_id, status, response.text().await?)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job_graph::task::{Operation, ResourceRequest};

    #[test]
    fn submit_request_carries_resources() {
        let dto = SlurmBackendDto {
            slurm_url: "http://head:6820/".to_string(),
            user_name: "rnaseq".to_string(),
            jwt_token: "token".to_string(),
            partition: Some("batch".to_string()),
            working_dir: Some(PathBuf::from("/scratch/run")),
        };
        let backend = SlurmBackend::new(dto, PathBuf::from("/tmp")).unwrap();
        let mut task = TaskDescriptor::new("download:reference", Operation::Download { url: "http://x/hg19.fa".to_string() }, "wget x");
        task.resources = ResourceRequest { cores: 2, memory_mb: 1000, wall_time_s: 90 };

        let json = serde_json::to_value(backend.submit_request(&task)).unwrap();

        assert_eq!(json["job"]["name"], "download_reference");
        assert_eq!(json["job"]["partition"], "batch");
        assert_eq!(json["job"]["cpus_per_task"], 2);
        assert_eq!(json["job"]["memory_per_node"]["number"], 1000);
        assert_eq!(json["job"]["time_limit"]["number"], 2);
        assert_eq!(json["job"]["standard_output"], format!("/scratch/run/{}.out", task.file_stem()));
        assert!(json["script"].as_str().unwrap().ends_with("wget x\n"));
        assert_eq!(backend.slurm_url, "http://head:6820");
    }
}
