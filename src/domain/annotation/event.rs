use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::annotation::gene::{Isoform, Segment, Strand};
use crate::domain::utils::id::{EventId, GeneId};
use crate::error::Error;

/// The kind of alternative-splicing choice an event models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Skipped (cassette) exon.
    #[serde(rename = "SE")]
    SkippedExon,
    #[serde(rename = "RI")]
    RetainedIntron,
    #[serde(rename = "A3SS")]
    Alternative3SpliceSite,
    #[serde(rename = "A5SS")]
    Alternative5SpliceSite,
    #[serde(rename = "MXE")]
    MutuallyExclusiveExons,
    #[serde(rename = "AFE")]
    AlternativeFirstExon,
    #[serde(rename = "ALE")]
    AlternativeLastExon,
    #[serde(rename = "TandemUTR")]
    TandemUtr,
}

impl EventType {
    pub fn label(&self) -> &'static str {
        match self {
            EventType::SkippedExon => "SE",
            EventType::RetainedIntron => "RI",
            EventType::Alternative3SpliceSite => "A3SS",
            EventType::Alternative5SpliceSite => "A5SS",
            EventType::MutuallyExclusiveExons => "MXE",
            EventType::AlternativeFirstExon => "AFE",
            EventType::AlternativeLastExon => "ALE",
            EventType::TandemUtr => "TandemUTR",
        }
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SE" | "SKIPPED_EXON" => Ok(EventType::SkippedExon),
            "RI" | "RETAINED_INTRON" => Ok(EventType::RetainedIntron),
            "A3SS" => Ok(EventType::Alternative3SpliceSite),
            "A5SS" => Ok(EventType::Alternative5SpliceSite),
            "MXE" => Ok(EventType::MutuallyExclusiveExons),
            "AFE" => Ok(EventType::AlternativeFirstExon),
            "ALE" => Ok(EventType::AlternativeLastExon),
            "TANDEMUTR" => Ok(EventType::TandemUtr),
            _ => Err(Error::ParseError(format!("unknown event type '{}'", s))),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// An alternative-splicing event: two or more competing isoforms of one gene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub event_type: EventType,

    /// Back-reference to the host gene. The gene is owned by the `GeneSet`.
    pub gene_id: GeneId,

    pub chrom: String,
    pub strand: Strand,

    /// Competing isoforms in annotation order. Always at least two.
    pub isoforms: Vec<Isoform>,
}

impl Event {
    /// Union of all isoform segments.
    pub fn span(&self) -> Option<Segment> {
        let spans: Vec<Segment> = self.isoforms.iter().filter_map(|i| i.span()).collect();
        let start = spans.iter().map(|s| s.start).min()?;
        let end = spans.iter().map(|s| s.end).max()?;
        Some(Segment { start, end })
    }

    pub fn overlaps(&self, chrom: &str, start: u64, end: u64) -> bool {
        self.chrom == chrom && self.span().is_some_and(|span| span.overlaps(start, end))
    }
}
