use std::collections::HashMap;

use crate::domain::annotation::gene::{Segment, Strand};
use crate::error::Error;

/// Feature types the event annotation understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Gene,
    Event,
    Isoform,
    Exon,
}

impl FeatureKind {
    fn from_column(s: &str) -> Option<FeatureKind> {
        match s {
            "gene" => Some(FeatureKind::Gene),
            "event" => Some(FeatureKind::Event),
            "mRNA" | "transcript" | "isoform" => Some(FeatureKind::Isoform),
            "exon" => Some(FeatureKind::Exon),
            _ => None,
        }
    }
}

/// One GFF3 feature line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GffRecord {
    pub chrom: String,
    pub source: String,
    pub kind: FeatureKind,
    pub segment: Segment,
    pub strand: Strand,
    pub attributes: HashMap<String, String>,
}

impl GffRecord {
    pub fn id(&self) -> Option<&str> {
        self.attributes.get("ID").map(String::as_str)
    }

    pub fn parent(&self) -> Option<&str> {
        self.attributes.get("Parent").map(String::as_str)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Result of parsing a single GFF3 line.
#[derive(Debug)]
pub enum ParsedLine {
    Record(Box<GffRecord>),
    Ignored(String),
    Comment,
    EndOfFile,
}

pub fn parse_line(line: &str) -> Result<ParsedLine, Error> {
    if line.starts_with("##FASTA") {
        return Ok(ParsedLine::EndOfFile);
    }
    if line.starts_with('#') {
        return Ok(ParsedLine::Comment);
    }

    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(ParsedLine::Comment);
    }

    let columns: Vec<&str> = line.split('\t').collect();
    if columns.len() != 9 {
        return Err(Error::ParseError(format!("GFF3 line has {} columns, expected 9", columns.len())));
    }

    let kind = match FeatureKind::from_column(columns[2]) {
        Some(kind) => kind,
        None => return Ok(ParsedLine::Ignored(columns[2].to_string())),
    };

    let start: u64 = columns[3].parse().map_err(|e| Error::ParseError(format!("invalid start '{}': {}", columns[3], e)))?;
    let end: u64 = columns[4].parse().map_err(|e| Error::ParseError(format!("invalid end '{}': {}", columns[4], e)))?;
    let segment = Segment::new(start, end)?;
    let strand: Strand = columns[6].parse()?;
    let attributes = parse_attributes(columns[8])?;

    Ok(ParsedLine::Record(Box::new(GffRecord {
        chrom: columns[0].to_string(),
        source: columns[1].to_string(),
        kind,
        segment,
        strand,
        attributes,
    })))
}

fn parse_attributes(attrs_str: &str) -> Result<HashMap<String, String>, Error> {
    let mut attributes = HashMap::new();
    if attrs_str == "." {
        return Ok(attributes);
    }

    for pair in attrs_str.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').ok_or_else(|| Error::ParseError(format!("attribute missing '=': '{}'", pair)))?;
        attributes.insert(key.trim().to_string(), url_decode(value.trim()));
    }
    Ok(attributes)
}

fn url_decode(value: &str) -> String {
    value.replace("%3B", ";").replace("%3D", "=").replace("%26", "&").replace("%2C", ",").replace("%25", "%")
}
