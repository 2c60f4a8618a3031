use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::api::settings_dto::BackendDto;
use crate::domain::backend::backend_trait::SharedBackend;
use crate::domain::backend::mock_backend::MockBackend;
use crate::domain::backend::sge::sge_backend::SgeBackend;
use crate::domain::backend::slurm::slurm_backend::SlurmBackend;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Mock,
    Sge,
    Slurm,
}

impl BackendType {
    /// Instantiates the backend described by `dto`. Script and log files of
    /// cluster jobs default to `logs_dir`.
    pub fn get_instance(dto: BackendDto, logs_dir: &Path) -> Result<SharedBackend, Error> {
        let backend_type = BackendType::from_str(dto.typ())?;
        log::info!("Using {:?} cluster backend.", backend_type);

        match dto {
            BackendDto::Mock(mock) => {
                let mut backend = MockBackend::new();
                if mock.materialize_outputs {
                    backend = backend.materializing();
                }
                Ok(Arc::new(backend))
            }
            BackendDto::Sge(sge) => Ok(Arc::new(SgeBackend::new(sge, logs_dir.join("sge")))),
            BackendDto::Slurm(slurm) => Ok(Arc::new(SlurmBackend::new(slurm, logs_dir.to_path_buf())?)),
        }
    }
}

impl FromStr for BackendType {
    type Err = Error;

    fn from_str(backend_type: &str) -> Result<BackendType, Self::Err> {
        match backend_type.to_ascii_lowercase().as_str() {
            "mock" => Ok(BackendType::Mock),
            "sge" | "gridengine" => Ok(BackendType::Sge),
            "slurm" => Ok(BackendType::Slurm),
            _ => Err(Error::ConfigurationError(format!("unknown backend type '{}'", backend_type))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::settings_dto::{MockBackendDto, SgeBackendDto};

    #[test]
    fn parses_backend_names() {
        assert_eq!(BackendType::from_str("SGE").unwrap(), BackendType::Sge);
        assert_eq!(BackendType::from_str("slurm").unwrap(), BackendType::Slurm);
        assert!(BackendType::from_str("pbs").is_err());
    }

    #[test]
    fn instantiates_named_backends() {
        let mock = BackendType::get_instance(BackendDto::Mock(MockBackendDto::default()), Path::new("/tmp/logs")).unwrap();
        assert_eq!(mock.name(), "mock");

        let sge = BackendDto::Sge(SgeBackendDto { queue: None, parallel_env: "smp".to_string(), script_dir: None, accounting_grace_polls: 3 });
        assert_eq!(BackendType::get_instance(sge, Path::new("/tmp/logs")).unwrap().name(), "sge");
    }
}
