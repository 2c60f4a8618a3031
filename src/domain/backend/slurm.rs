pub mod response;
pub mod slurm_backend;
pub mod slurm_endpoint;
