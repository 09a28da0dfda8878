use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("a campaign run is already in progress")]
    Overlap,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("cron parse error: {0}")]
    Cron(#[from] cron::error::Error),
    #[error("invalid cron expression (expected 6 fields, got {0})")]
    InvalidCron(usize),
    #[error("no next run available for cron expression")]
    NoNextRun,
    #[error("scheduler loop already started")]
    AlreadyStarted,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Summary of one scheduler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub campaigns: usize,
    pub sent: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl RunReport {
    pub(super) fn summarize(&mut self) {
        self.success = self.errors == 0;
        self.message = format!(
            "processed {} campaign(s): {} sent, {} completed, {} failed, {} skipped, {} error(s)",
            self.campaigns, self.sent, self.completed, self.failed, self.skipped, self.errors
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    /// A run is executing right now.
    pub running: bool,
    /// The periodic loop is active.
    pub started: bool,
    pub schedule: Option<String>,
    pub last_run: Option<RunReport>,
    pub next_run: Option<DateTime<Utc>>,
}

/// Result of handling one lead during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LeadResult {
    NotDue,
    Sent { completed: bool },
    Failed,
    Skipped,
    Finished,
    Unschedulable,
}
