use serde::{Deserialize, Serialize};

use crate::domain::job_graph::task::TaskState;
use crate::domain::utils::id::RunId;

/// Number of tasks per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateCounts {
    pub pending: usize,
    pub ready: usize,
    pub submitted: usize,
    pub running: usize,
    pub success: usize,
    pub failed: usize,
    pub failed_permanent: usize,
    pub blocked: usize,
    pub cancelled: usize,
}

impl StateCounts {
    pub fn from_states(states: impl IntoIterator<Item = TaskState>) -> Self {
        let mut counts = StateCounts::default();
        for state in states {
            *counts.slot(state) += 1;
        }
        counts
    }

    fn slot(&mut self, state: TaskState) -> &mut usize {
        match state {
            TaskState::Pending => &mut self.pending,
            TaskState::Ready => &mut self.ready,
            TaskState::Submitted => &mut self.submitted,
            TaskState::Running => &mut self.running,
            TaskState::Success => &mut self.success,
            TaskState::Failed => &mut self.failed,
            TaskState::FailedPermanent => &mut self.failed_permanent,
            TaskState::Blocked => &mut self.blocked,
            TaskState::Cancelled => &mut self.cancelled,
        }
    }

    pub fn get(&self, state: TaskState) -> usize {
        let mut copy = *self;
        *copy.slot(state)
    }

    pub fn total(&self) -> usize {
        TaskState::ALL.iter().map(|s| self.get(*s)).sum()
    }

    pub fn in_flight(&self) -> usize {
        self.submitted + self.running
    }

    pub fn terminal(&self) -> usize {
        self.success + self.failed_permanent + self.blocked + self.cancelled
    }
}

/// Progress snapshot published once per scheduling iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub run_id: Option<RunId>,
    pub iteration: u64,
    pub counts: StateCounts,
    pub finished: bool,
}

impl RunStatus {
    pub fn idle() -> Self {
        RunStatus { run_id: None, iteration: 0, counts: StateCounts::default(), finished: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_states() {
        let counts = StateCounts::from_states([TaskState::Success, TaskState::Running, TaskState::Success, TaskState::Blocked]);
        assert_eq!(counts.get(TaskState::Success), 2);
        assert_eq!(counts.in_flight(), 1);
        assert_eq!(counts.terminal(), 3);
        assert_eq!(counts.total(), 4);
    }
}
