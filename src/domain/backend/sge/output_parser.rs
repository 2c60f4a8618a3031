use crate::domain::backend::backend_trait::BackendJobStatus;
use crate::domain::utils::id::BackendJobId;
use crate::error::{Error, Result};

/// Extracts the job id from qsub's `Your job 4711 ("name") has been submitted`.
/// Array jobs (`Your job-array 4711.1-10:1`) yield the base id.
pub fn parse_qsub_output(output: &str) -> Result<BackendJobId> {
    for line in output.lines() {
        let rest = match line.trim().strip_prefix("Your job") {
            Some(rest) => rest.trim_start_matches("-array").trim_start(),
            None => continue,
        };
        let id: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !id.is_empty() {
            return Ok(BackendJobId::new(id));
        }
    }
    Err(Error::BackendError(format!("could not find a job id in qsub output: '{}'", output.trim())))
}

/// State column of `job_id` in plain `qstat` output, `None` when the job is
/// not listed.
pub fn find_qstat_state(output: &str, job_id: &BackendJobId) -> Option<String> {
    output
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(|columns| columns.len() >= 5)
        .find(|columns| columns[0] == job_id.as_str())
        .map(|columns| columns[4].to_string())
}

/// Maps a qstat state code (`qw`, `hqw`, `r`, `t`, `Eqw`, …).
pub fn map_qstat_state(state: &str) -> BackendJobStatus {
    if state.contains('E') {
        return BackendJobStatus::Failed { message: format!("job is in error state '{}'", state), retriable: false };
    }
    if state.contains('w') {
        return BackendJobStatus::Queued;
    }
    if state.contains(['r', 't', 'R', 's', 'S', 'T', 'd']) {
        return BackendJobStatus::Running;
    }
    BackendJobStatus::Queued
}

/// Relevant fields of a `qacct -j` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountingRecord {
    pub failed: i32,
    pub exit_status: i32,
}

impl AccountingRecord {
    pub fn to_status(self) -> BackendJobStatus {
        if self.failed == 0 && self.exit_status == 0 {
            BackendJobStatus::Succeeded
        } else {
            BackendJobStatus::Failed {
                message: format!("job finished with exit status {} (failed: {})", self.exit_status, self.failed),
                retriable: true,
            }
        }
    }
}

/// Parses `qacct -j` output. Takes the last record when the id was reused.
pub fn parse_qacct_output(output: &str) -> Option<AccountingRecord> {
    let mut failed = None;
    let mut exit_status = None;

    for line in output.lines() {
        let mut columns = line.split_whitespace();
        match (columns.next(), columns.next()) {
            (Some("failed"), Some(value)) => failed = value.parse().ok(),
            (Some("exit_status"), Some(value)) => exit_status = value.parse().ok(),
            _ => {}
        }
    }

    match (failed, exit_status) {
        (Some(failed), Some(exit_status)) => Some(AccountingRecord { failed, exit_status }),
        (None, Some(exit_status)) => Some(AccountingRecord { failed: 0, exit_status }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QSTAT: &str = "\
job-ID  prior   name       user         state submit/start at     queue                          slots ja-task-ID
-----------------------------------------------------------------------------------------------------------------
   4711 0.55500 map_S1     yarden       r     06/12/2013 10:01:22 all.q@node17                       4
   4712 0.00000 quantify_S ...          qw    06/12/2013 10:01:20                                    1
   4713 0.00000 quantify_S yarden       Eqw   06/12/2013 10:01:20                                    1
";

    #[test]
    fn parses_qsub_job_ids() {
        assert_eq!(parse_qsub_output("Your job 4711 (\"map_S1\") has been submitted\n").unwrap(), BackendJobId::new("4711"));
        assert_eq!(parse_qsub_output("Your job-array 99.1-10:1 (\"x\") has been submitted").unwrap(), BackendJobId::new("99"));
        assert!(parse_qsub_output("Unable to run job: denied").is_err());
    }

    #[test]
    fn finds_states_in_qstat_listing() {
        assert_eq!(find_qstat_state(QSTAT, &BackendJobId::new("4711")).as_deref(), Some("r"));
        assert_eq!(find_qstat_state(QSTAT, &BackendJobId::new("4712")).as_deref(), Some("qw"));
        assert_eq!(find_qstat_state(QSTAT, &BackendJobId::new("1")), None);
    }

    #[test]
    fn maps_states() {
        assert_eq!(map_qstat_state("qw"), BackendJobStatus::Queued);
        assert_eq!(map_qstat_state("hqw"), BackendJobStatus::Queued);
        assert_eq!(map_qstat_state("r"), BackendJobStatus::Running);
        assert_eq!(map_qstat_state("t"), BackendJobStatus::Running);
        assert!(matches!(map_qstat_state("Eqw"), BackendJobStatus::Failed { retriable: false, .. }));
    }

    #[test]
    fn parses_accounting_records() {
        let ok = "==============================================================\nqname        all.q\njobnumber    4711\nfailed       0    \nexit_status  0\n";
        assert_eq!(parse_qacct_output(ok).unwrap().to_status(), BackendJobStatus::Succeeded);

        let failed = "jobnumber    4711\nfailed       100 : assumedly after job\nexit_status  137\n";
        let record = parse_qacct_output(failed).unwrap();
        assert_eq!(record, AccountingRecord { failed: 100, exit_status: 137 });
        assert!(matches!(record.to_status(), BackendJobStatus::Failed { retriable: true, .. }));

        assert_eq!(parse_qacct_output("error: job id 4711 not found"), None);
    }
}
