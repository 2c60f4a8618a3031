use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::utils::id::{ArtifactId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactKind {
    Reference,
    RawReads,
    Alignment,
    Quantification,
    Summary,
}

/// A named output location. Produced by exactly one task, or supplied from
/// outside the run (`producer == None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: ArtifactId,
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub producer: Option<TaskId>,
}

impl Artifact {
    pub fn produced(id: impl Into<String>, path: impl Into<PathBuf>, kind: ArtifactKind, producer: TaskId) -> Self {
        Artifact { id: ArtifactId::new(id), path: path.into(), kind, producer: Some(producer) }
    }

    pub fn external(id: impl Into<String>, path: impl Into<PathBuf>, kind: ArtifactKind) -> Self {
        Artifact { id: ArtifactId::new(id), path: path.into(), kind, producer: None }
    }

    pub fn is_external(&self) -> bool {
        self.producer.is_none()
    }
}
