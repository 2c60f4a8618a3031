use std::collections::HashMap;
use std::path::Path;

use crate::domain::utils::id::EventId;
use crate::error::{Error, Result};

pub const EVENT_ID_COLUMN: &str = "event_id";

/// Output of one quantify task: a tab-separated table whose first column is
/// `event_id`; all other columns are free-form fields kept as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuantificationTable {
    fields: Vec<String>,
    rows: HashMap<EventId, Vec<String>>,
}

impl QuantificationTable {
    pub fn read(path: &Path) -> Result<Self> {
        let reader = std::fs::File::open(path)?;
        Self::from_reader(reader).map_err(|e| match e {
            Error::ParseError(msg) => Error::ParseError(format!("{} ({})", msg, path.display())),
            other => other,
        })
    }

    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().delimiter(b'\t').has_headers(true).comment(Some(b'#')).from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        if headers.get(0).map(str::trim) != Some(EVENT_ID_COLUMN) {
            return Err(Error::ParseError(format!("quantification table must start with an '{}' column, found {:?}", EVENT_ID_COLUMN, headers.get(0))));
        }
        let fields: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();

        let mut rows = HashMap::new();
        for (line, record) in csv_reader.records().enumerate() {
            let record = record?;
            let event_id = record.get(0).map(str::trim).unwrap_or_default();
            if event_id.is_empty() {
                return Err(Error::ParseError(format!("empty event id (line {})", line + 2)));
            }
            let values: Vec<String> = record.iter().skip(1).map(str::to_string).collect();
            if rows.insert(EventId::new(event_id), values).is_some() {
                return Err(Error::ParseError(format!("event '{}' listed twice (line {})", event_id, line + 2)));
            }
        }

        Ok(QuantificationTable { fields, rows })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Field name/value pairs for `event_id`, `None` when the table has no row for it.
    pub fn values_for(&self, event_id: &EventId) -> Option<Vec<(String, String)>> {
        self.rows.get(event_id).map(|values| self.fields.iter().cloned().zip(values.iter().cloned()).collect())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fields_verbatim() {
        let data = "event_id\tpsi\tci_low\tci_high\nSE.1\t0.82\t0.7\t0.9\nRI.1\t0.10\t0.05\t0.2\n";
        let table = QuantificationTable::from_reader(data.as_bytes()).unwrap();

        assert_eq!(table.fields(), ["psi", "ci_low", "ci_high"]);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.values_for(&EventId::new("SE.1")).unwrap(),
            vec![("psi".to_string(), "0.82".to_string()), ("ci_low".to_string(), "0.7".to_string()), ("ci_high".to_string(), "0.9".to_string())]
        );
        assert!(table.values_for(&EventId::new("MXE.1")).is_none());
    }

    #[test]
    fn requires_event_id_header() {
        let err = QuantificationTable::from_reader("id\tpsi\nSE.1\t0.8\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::ParseError(msg) if msg.contains("event_id")));
    }

    #[test]
    fn rejects_ragged_rows_and_duplicates() {
        assert!(matches!(QuantificationTable::from_reader("event_id\tpsi\nSE.1\t0.8\t9\n".as_bytes()), Err(Error::CsvError(_))));
        assert!(matches!(QuantificationTable::from_reader("event_id\tpsi\nSE.1\t0.8\nSE.1\t0.9\n".as_bytes()), Err(Error::ParseError(_))));
    }
}
