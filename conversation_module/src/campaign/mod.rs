mod core;
mod schedule;
mod sequence;
mod types;

pub use self::core::CampaignScheduler;
pub use schedule::{next_run_after, validate_cron_expression, DEFAULT_CAMPAIGN_CRON};
pub use sequence::{is_due, next_progress, step_due_at, Progress, MAX_STEP_OFFSET_DAYS};
pub use types::{RunReport, SchedulerError, SchedulerStatus};
