pub mod backend_trait;
pub mod backend_type;
pub mod mock_backend;
pub mod sge;
pub mod slurm;
