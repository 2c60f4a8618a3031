use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use crate::domain::annotation::event::EventType;
use crate::domain::utils::id::{EventId, GeneId, SampleId};
use crate::error::Result;

pub const NA_VALUE: &str = "NA";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RowStatus {
    Complete,
    Missing,
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowStatus::Complete => write!(f, "complete"),
            RowStatus::Missing => write!(f, "missing"),
        }
    }
}

/// Quantification of one event in one sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRow {
    pub event_id: EventId,
    pub gene_id: GeneId,
    pub event_type: EventType,
    pub sample_id: SampleId,
    pub status: RowStatus,
    pub values: BTreeMap<String, String>,
}

/// Merged results, one row per (event, sample).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryTable {
    rows: Vec<SummaryRow>,
}

impl SummaryTable {
    /// Rows are kept sorted by event id, then sample id.
    pub fn new(mut rows: Vec<SummaryRow>) -> Self {
        rows.sort_by(|a, b| (&a.event_id, &a.sample_id).cmp(&(&b.event_id, &b.sample_id)));
        SummaryTable { rows }
    }

    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sorted union of the field names of all rows.
    pub fn fields(&self) -> Vec<String> {
        let fields: BTreeSet<&String> = self.rows.iter().flat_map(|row| row.values.keys()).collect();
        fields.into_iter().cloned().collect()
    }

    pub fn complete_count(&self) -> usize {
        self.rows.iter().filter(|row| row.status == RowStatus::Complete).count()
    }

    pub fn missing_count(&self) -> usize {
        self.rows.iter().filter(|row| row.status == RowStatus::Missing).count()
    }

    pub fn by_gene(&self) -> BTreeMap<&GeneId, Vec<&SummaryRow>> {
        let mut genes: BTreeMap<&GeneId, Vec<&SummaryRow>> = BTreeMap::new();
        for row in &self.rows {
            genes.entry(&row.gene_id).or_default().push(row);
        }
        genes
    }

    pub fn get(&self, event_id: &EventId, sample_id: &SampleId) -> Option<&SummaryRow> {
        self.rows.iter().find(|row| &row.event_id == event_id && &row.sample_id == sample_id)
    }

    /// Tab-separated output; absent fields are written as `NA`.
    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;

        let fields = self.fields();
        let mut header = vec!["event_id", "gene_id", "event_type", "sample_id", "status"];
        header.extend(fields.iter().map(String::as_str));
        writer.write_record(&header)?;

        for row in &self.rows {
            let mut record = vec![row.event_id.to_string(), row.gene_id.to_string(), row.event_type.to_string(), row.sample_id.to_string(), row.status.to_string()];
            record.extend(fields.iter().map(|field| row.values.get(field).cloned().unwrap_or_else(|| NA_VALUE.to_string())));
            writer.write_record(&record)?;
        }
        writer.flush()?;

        log::info!("Wrote summary table with {} row(s) ({} missing) to '{}'.", self.len(), self.missing_count(), path.display());
        Ok(())
    }
}
