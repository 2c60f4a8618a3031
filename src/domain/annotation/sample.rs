use std::path::PathBuf;

use crate::api::settings_dto::SampleDto;
use crate::domain::utils::id::SampleId;
use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SampleMetadata {
    pub condition: Option<String>,
    pub replicate: Option<u32>,

    /// Group label for paired-end samples (`sample_groups` in the settings).
    pub group: Option<String>,
}

/// One sequencing sample. Supplied by the caller, immutable for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub id: SampleId,

    /// One file for single-end data, two for paired-end.
    pub reads: Vec<PathBuf>,

    /// Alignment produced outside this run, used when mapping is skipped.
    pub alignment: Option<PathBuf>,

    pub metadata: SampleMetadata,
}

impl Sample {
    pub fn new(id: impl Into<String>, reads: Vec<PathBuf>) -> Self {
        Sample { id: SampleId::new(id), reads, alignment: None, metadata: SampleMetadata::default() }
    }

    pub fn with_alignment(mut self, alignment: impl Into<PathBuf>) -> Self {
        self.alignment = Some(alignment.into());
        self
    }

    pub fn is_paired(&self) -> bool {
        self.reads.len() == 2
    }
}

impl TryFrom<SampleDto> for Sample {
    type Error = Error;

    fn try_from(dto: SampleDto) -> Result<Self, Self::Error> {
        if dto.id.trim().is_empty() {
            return Err(Error::ConfigurationError("sample with empty id".to_string()));
        }
        if dto.reads.len() > 2 {
            return Err(Error::ConfigurationError(format!(
                "sample '{}' lists {} read files, expected one (single-end) or two (paired-end)",
                dto.id,
                dto.reads.len()
            )));
        }
        if dto.reads.is_empty() && dto.alignment.is_none() {
            return Err(Error::ConfigurationError(format!("sample '{}' has neither reads nor an alignment", dto.id)));
        }

        Ok(Sample {
            id: SampleId::new(dto.id),
            reads: dto.reads,
            alignment: dto.alignment,
            metadata: SampleMetadata { condition: dto.condition, replicate: dto.replicate, group: dto.group },
        })
    }
}
