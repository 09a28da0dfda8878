use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use agent_reply_module::render_template;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::engine::conversation_variables;
use crate::models::{Agent, Campaign, CampaignStatus, Lead, LeadStatus};
use crate::outbound::{dispatch_outbound, MailTransport, OutboundDraft};
use crate::store::{ConversationStore, StoreError};
use crate::threading::{reply_subject, Direction};

use super::schedule::next_run_after;
use super::sequence::{is_due, next_progress};
use super::types::{LeadResult, RunReport, SchedulerError, SchedulerStatus};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Advances campaign leads through their steps. One instance owns the
/// periodic loop, the overlap flag and the last run report.
pub struct CampaignScheduler {
    inner: Arc<SchedulerInner>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

struct SchedulerInner {
    store: Arc<ConversationStore>,
    transport: Arc<dyn MailTransport>,
    running: AtomicBool,
    last_run: Mutex<Option<RunReport>>,
    next_run: Mutex<Option<DateTime<Utc>>>,
    schedule: Mutex<Option<String>>,
}

/// Holds the running flag for the duration of one pass.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl CampaignScheduler {
    pub fn new(store: Arc<ConversationStore>, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                transport,
                running: AtomicBool::new(false),
                last_run: Mutex::new(None),
                next_run: Mutex::new(None),
                schedule: Mutex::new(None),
            }),
            stop: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Runs one pass now. Refused with [`SchedulerError::Overlap`] while
    /// another pass is executing.
    pub fn run_now(&self) -> Result<RunReport, SchedulerError> {
        self.inner.run(Utc::now())
    }

    /// Runs one pass as of `now`.
    pub fn run_at(&self, now: DateTime<Utc>) -> Result<RunReport, SchedulerError> {
        self.inner.run(now)
    }

    /// Spawns the periodic loop for `expression` (six-field cron, UTC).
    pub fn start(&self, expression: &str) -> Result<(), SchedulerError> {
        let first = next_run_after(expression, Utc::now())?;
        let mut handle = lock(&self.handle);
        if handle.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }
        self.stop.store(false, Ordering::Relaxed);
        *lock(&self.inner.schedule) = Some(expression.to_string());
        *lock(&self.inner.next_run) = Some(first);

        let inner = self.inner.clone();
        let stop = self.stop.clone();
        let loop_expression = expression.to_string();
        let spawned = thread::Builder::new()
            .name("campaign-scheduler".to_string())
            .spawn(move || inner.run_loop(&loop_expression, &stop))?;
        *handle = Some(spawned);
        info!("campaign scheduler started ({}), first run at {}", expression, first);
        Ok(())
    }

    /// Signals the loop and waits for it. A pass in progress finishes first.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            let _ = handle.join();
            info!("campaign scheduler stopped");
        }
        *lock(&self.inner.next_run) = None;
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.inner.running.load(Ordering::Acquire),
            started: lock(&self.handle).is_some(),
            schedule: lock(&self.inner.schedule).clone(),
            last_run: lock(&self.inner.last_run).clone(),
            next_run: *lock(&self.inner.next_run),
        }
    }
}

impl Drop for CampaignScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SchedulerInner {
    fn run(&self, now: DateTime<Utc>) -> Result<RunReport, SchedulerError> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            warn!("campaign run refused: previous run still in progress");
            return Err(SchedulerError::Overlap);
        };
        let started = Instant::now();
        let mut report = RunReport {
            started_at: Some(now),
            ..RunReport::default()
        };
        match self.store.list_campaigns(Some(CampaignStatus::Active)) {
            Ok(campaigns) => {
                for campaign in campaigns {
                    report.campaigns += 1;
                    self.run_campaign(&campaign, now, &mut report);
                }
                report.summarize();
            }
            Err(err) => {
                error!("campaign run could not load campaigns: {}", err);
                report.errors += 1;
                report.summarize();
                report.message = format!("failed to load campaigns: {}", err);
            }
        }
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "campaign run finished in {}ms: {}",
            report.duration_ms, report.message
        );
        *lock(&self.last_run) = Some(report.clone());
        Ok(report)
    }

    fn run_loop(&self, expression: &str, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            let next = match next_run_after(expression, Utc::now()) {
                Ok(next) => next,
                Err(err) => {
                    error!("campaign scheduler cannot compute next run: {}", err);
                    break;
                }
            };
            *lock(&self.next_run) = Some(next);
            while !stop.load(Ordering::Relaxed) && Utc::now() < next {
                let remaining = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                thread::sleep(remaining.min(STOP_POLL_INTERVAL));
            }
            if stop.load(Ordering::Relaxed) {
                break;
            }
            match self.run(Utc::now()) {
                Ok(_) => {}
                Err(SchedulerError::Overlap) => {
                    warn!("scheduled campaign run skipped: manual run in progress")
                }
                Err(err) => error!("scheduled campaign run failed: {}", err),
            }
        }
    }

    fn run_campaign(&self, campaign: &Campaign, now: DateTime<Utc>, report: &mut RunReport) {
        let agent = match self.store.get_agent(&campaign.agent_id) {
            Ok(Some(agent)) => agent,
            Ok(None) => {
                warn!(
                    "campaign {} references unknown agent {}; skipping",
                    campaign.id, campaign.agent_id
                );
                report.errors += 1;
                return;
            }
            Err(err) => {
                error!("campaign {} agent lookup failed: {}", campaign.id, err);
                report.errors += 1;
                return;
            }
        };
        let leads = match self.store.active_leads(&campaign.id) {
            Ok(leads) => leads,
            Err(err) => {
                error!("campaign {} lead lookup failed: {}", campaign.id, err);
                report.errors += 1;
                return;
            }
        };

        for lead in leads {
            match self.run_lead(&agent, campaign, &lead, now) {
                Ok(LeadResult::NotDue) => {}
                Ok(LeadResult::Sent { completed }) => {
                    report.sent += 1;
                    if completed {
                        report.completed += 1;
                    }
                }
                Ok(LeadResult::Failed) => report.failed += 1,
                Ok(LeadResult::Skipped) => report.skipped += 1,
                Ok(LeadResult::Finished) => report.completed += 1,
                Ok(LeadResult::Unschedulable) => report.errors += 1,
                Err(err) => {
                    error!(
                        "campaign {} lead_id={} step failed: {}",
                        campaign.id, lead.id, err
                    );
                    report.errors += 1;
                }
            }
        }

        match self.store.complete_campaign_if_finished(&campaign.id) {
            Ok(true) => info!("campaign {} completed", campaign.id),
            Ok(false) => {}
            Err(err) => {
                error!("campaign {} completion check failed: {}", campaign.id, err);
                report.errors += 1;
            }
        }
    }

    fn run_lead(
        &self,
        agent: &Agent,
        campaign: &Campaign,
        lead: &Lead,
        now: DateTime<Utc>,
    ) -> Result<LeadResult, StoreError> {
        if lead.sequence_index >= campaign.steps.len() {
            self.store.set_lead_status(&lead.id, LeadStatus::Completed)?;
            return Ok(LeadResult::Finished);
        }
        if !is_due(lead, &campaign.steps, now) {
            return Ok(LeadResult::NotDue);
        }
        let step = &campaign.steps[lead.sequence_index];
        let Some(progress) = next_progress(lead, &campaign.steps) else {
            error!(
                "campaign {} lead_id={} step {} has an unschedulable follow-up offset; skipping",
                campaign.id,
                lead.id,
                lead.sequence_index + 1
            );
            return Ok(LeadResult::Unschedulable);
        };

        let first_subject = render_template(
            &step.subject,
            &conversation_variables(agent, &lead.email, lead.name.as_deref(), &step.subject),
        );
        let conversation =
            self.store
                .get_or_create_conversation(&agent.id, &lead.email, first_subject.trim())?;
        if conversation.is_handed_over() {
            info!(
                "lead_id={} skipped: conversation_id={} is handed over",
                lead.id, conversation.id
            );
            self.store.set_lead_status(&lead.id, LeadStatus::Completed)?;
            return Ok(LeadResult::Skipped);
        }

        let mut variables = conversation_variables(
            agent,
            &lead.email,
            lead.name.as_deref(),
            &conversation.subject,
        );
        variables.insert("campaign_name".to_string(), campaign.name.clone());
        variables.insert(
            "step_number".to_string(),
            (lead.sequence_index + 1).to_string(),
        );
        let subject = render_template(&step.subject, &variables);
        let subject = if subject.trim().is_empty() {
            reply_subject(&conversation.subject)
        } else {
            subject.trim().to_string()
        };
        let body_text = render_template(&step.template, &variables);
        let thread_ids = self.store.thread_message_ids(&conversation.id)?;

        let dispatched = dispatch_outbound(
            &self.store,
            self.transport.as_ref(),
            agent,
            &conversation.id,
            OutboundDraft {
                direction: Direction::CampaignStep,
                to: lead.email.clone(),
                subject,
                body_text: body_text.trim().to_string(),
                in_reply_to: thread_ids.last().cloned(),
                thread_ids,
            },
        )?;
        if !dispatched.is_sent() {
            warn!(
                "lead_id={} step {} not sent; will retry next run",
                lead.id, lead.sequence_index
            );
            return Ok(LeadResult::Failed);
        }

        let advanced = self.store.advance_lead(
            &lead.id,
            lead.sequence_index,
            progress.next_send_at,
            progress.completed,
        )?;
        if !advanced {
            warn!(
                "lead_id={} moved past step {} concurrently",
                lead.id, lead.sequence_index
            );
        }
        Ok(LeadResult::Sent {
            completed: advanced && progress.completed,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}
