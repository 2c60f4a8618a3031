use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::utils::id::{EventId, GeneId, IsoformId};
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strand {
    Forward,
    Reverse,
    Unknown,
}

impl FromStr for Strand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(Strand::Forward),
            "-" => Ok(Strand::Reverse),
            "." | "?" => Ok(Strand::Unknown),
            _ => Err(Error::ParseError(format!("invalid strand '{}'", s))),
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strand::Forward => write!(f, "+"),
            Strand::Reverse => write!(f, "-"),
            Strand::Unknown => write!(f, "."),
        }
    }
}

/// A contiguous genomic interval, 1-based and inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub start: u64,
    pub end: u64,
}

impl Segment {
    pub fn new(start: u64, end: u64) -> Result<Self, Error> {
        if start == 0 || end < start {
            return Err(Error::ParseError(format!("invalid segment {}-{}", start, end)));
        }
        Ok(Segment { start, end })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start <= end && start <= self.end
    }
}

/// One transcript structure: an ordered list of exonic segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Isoform {
    pub id: IsoformId,
    pub segments: Vec<Segment>,
}

impl Isoform {
    pub fn span(&self) -> Option<Segment> {
        let start = self.segments.iter().map(|s| s.start).min()?;
        let end = self.segments.iter().map(|s| s.end).max()?;
        Some(Segment { start, end })
    }
}

/// A host gene. Owns its gene-level isoforms and lists the ids of the
/// splicing events modelled on it; the events themselves live in the
/// `GeneSet`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gene {
    pub id: GeneId,
    pub name: Option<String>,
    pub chrom: String,
    pub span: Segment,
    pub strand: Strand,
    pub isoforms: Vec<Isoform>,
    pub event_ids: Vec<EventId>,
}

impl Gene {
    pub fn overlaps(&self, chrom: &str, start: u64, end: u64) -> bool {
        self.chrom == chrom && self.span.overlaps(start, end)
    }
}
