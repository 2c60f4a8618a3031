use crate::domain::utils::id::BackendJobId;

const API_VERSION: &str = "v0.0.40";

#[derive(Debug)]
pub enum SlurmEndpoint {
    JobSubmit,
    Job(BackendJobId),
    CancelJob(BackendJobId),
}

impl SlurmEndpoint {
    pub fn path(&self) -> String {
        match self {
            Self::JobSubmit => format!("/slurm/{}/job/submit", API_VERSION),
            Self::Job(id) | Self::CancelJob(id) => format!("/slurm/{}/job/{}", API_VERSION, id),
        }
    }

    pub fn method(&self) -> reqwest::Method {
        match self {
            Self::JobSubmit => reqwest::Method::POST,
            Self::Job(_) => reqwest::Method::GET,
            Self::CancelJob(_) => reqwest::Method::DELETE,
        }
    }
}
