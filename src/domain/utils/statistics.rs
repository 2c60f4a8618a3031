use serde::Serialize;
use std::path::Path;

use crate::error::Result;

/// `tracing` target for per-transition analytics events.
pub const ANALYTICS_TARGET: &str = "analytics";

/// One row of the per-task statistics table written at the end of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskStatisticRow {
    pub run_id: String,
    pub task_id: String,
    pub operation: String,
    pub final_state: String,
    pub attempts: u32,
    pub backend_job_id: String,
    pub last_error: String,
}

/// Writes `rows` as a `;`-separated table with a header line. Absent values
/// are written as `NA`.
pub fn write_task_statistics(path: &Path, rows: &[TaskStatisticRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new().delimiter(b';').from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn or_na(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => "NA".to_string(),
    }
}
