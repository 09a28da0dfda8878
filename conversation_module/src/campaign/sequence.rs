use chrono::{DateTime, TimeDelta, Utc};

use crate::models::{CampaignStep, Lead, LeadStatus};

/// Largest step offset a campaign may declare (ten years).
pub const MAX_STEP_OFFSET_DAYS: i64 = 3_650;

/// When `step` becomes sendable for a lead that started at `started_at`.
/// `None` when the offset cannot be represented as a date.
pub fn step_due_at(started_at: DateTime<Utc>, step: &CampaignStep) -> Option<DateTime<Utc>> {
    let offset = TimeDelta::try_days(step.offset_days.max(0))?;
    started_at.checked_add_signed(offset)
}

/// A lead is due when it is active, has a step left, that step's offset
/// has elapsed and any explicit `next_send_at` has passed.
pub fn is_due(lead: &Lead, steps: &[CampaignStep], now: DateTime<Utc>) -> bool {
    if lead.status != LeadStatus::Active {
        return false;
    }
    let Some(step) = steps.get(lead.sequence_index) else {
        return false;
    };
    match step_due_at(lead.started_at, step) {
        Some(due_at) if due_at <= now => {}
        _ => return false,
    }
    lead.next_send_at.map_or(true, |next| next <= now)
}

/// Where a lead goes after its current step was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub next_send_at: Option<DateTime<Utc>>,
    pub completed: bool,
}

/// `None` when the following step's due date overflows.
pub fn next_progress(lead: &Lead, steps: &[CampaignStep]) -> Option<Progress> {
    match steps.get(lead.sequence_index + 1) {
        Some(next) => Some(Progress {
            next_send_at: Some(step_due_at(lead.started_at, next)?),
            completed: false,
        }),
        None => Some(Progress {
            next_send_at: None,
            completed: true,
        }),
    }
}
