use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use std::str::FromStr;

use super::types::SchedulerError;

/// Daily at 14:00 UTC.
pub const DEFAULT_CAMPAIGN_CRON: &str = "0 0 14 * * *";

pub fn validate_cron_expression(expression: &str) -> Result<(), SchedulerError> {
    let fields = expression.split_whitespace().count();
    if fields != 6 {
        return Err(SchedulerError::InvalidCron(fields));
    }
    Ok(())
}

pub fn next_run_after(
    expression: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, SchedulerError> {
    validate_cron_expression(expression)?;
    let schedule = CronSchedule::from_str(expression)?;
    schedule
        .after(&after)
        .find(|datetime| *datetime > after)
        .ok_or(SchedulerError::NoNextRun)
}
