use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Campaign, CampaignStatus, CampaignStep, Lead, LeadStatus, NewLead};

use super::{
    datetime_column, enum_column, format_datetime, optional_datetime_column, ConversationStore,
    StoreError,
};

const LEAD_COLUMNS: &str = "id, campaign_id, agent_id, email, name, status, sequence_index, next_send_at, started_at, updated_at";

/// Aggregates reported by the domain health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutreachCounts {
    pub active_campaigns: usize,
    pub active_leads: usize,
    pub leads_due_immediately: usize,
}

impl ConversationStore {
    /// Inserts or replaces a campaign and its ordered steps.
    pub fn upsert_campaign(&self, campaign: &Campaign) -> Result<(), StoreError> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO campaigns (id, agent_id, name, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                agent_id = excluded.agent_id,
                name = excluded.name,
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![
                campaign.id.as_str(),
                campaign.agent_id.as_str(),
                campaign.name.as_str(),
                campaign.status.as_str(),
                format_datetime(Utc::now())
            ],
        )?;
        tx.execute(
            "DELETE FROM campaign_steps WHERE campaign_id = ?1",
            params![campaign.id.as_str()],
        )?;
        for (position, step) in campaign.steps.iter().enumerate() {
            tx.execute(
                "INSERT INTO campaign_steps (campaign_id, position, offset_days, subject, template)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    campaign.id.as_str(),
                    position as i64,
                    step.offset_days,
                    step.subject.as_str(),
                    step.template.as_str()
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_campaign(&self, id: &str) -> Result<Option<Campaign>, StoreError> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT id, agent_id, name, status FROM campaigns WHERE id = ?1",
                params![id],
                campaign_header_from_row,
            )
            .optional()?;
        match row {
            Some(mut campaign) => {
                campaign.steps = load_steps(&conn, &campaign.id)?;
                Ok(Some(campaign))
            }
            None => Ok(None),
        }
    }

    pub fn list_campaigns(
        &self,
        status: Option<CampaignStatus>,
    ) -> Result<Vec<Campaign>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, name, status FROM campaigns
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY id",
        )?;
        let rows = stmt.query_map(
            params![status.map(|value| value.as_str())],
            campaign_header_from_row,
        )?;
        let mut campaigns = Vec::new();
        for row in rows {
            campaigns.push(row?);
        }
        for campaign in &mut campaigns {
            campaign.steps = load_steps(&conn, &campaign.id)?;
        }
        Ok(campaigns)
    }

    pub fn set_campaign_status(
        &self,
        id: &str,
        status: CampaignStatus,
    ) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let updated = conn.execute(
            "UPDATE campaigns SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), format_datetime(Utc::now()), id],
        )?;
        Ok(updated == 1)
    }

    /// Marks an active campaign completed once it has leads and none of
    /// them is still active.
    pub fn complete_campaign_if_finished(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let updated = conn.execute(
            "UPDATE campaigns SET status = 'completed', updated_at = ?1
             WHERE id = ?2 AND status = 'active'
               AND EXISTS (SELECT 1 FROM leads WHERE campaign_id = ?2)
               AND NOT EXISTS (SELECT 1 FROM leads WHERE campaign_id = ?2 AND status = 'active')",
            params![format_datetime(Utc::now()), id],
        )?;
        Ok(updated == 1)
    }

    /// Enrolls a lead; an existing (campaign, email) row is returned as is.
    pub fn insert_lead(&self, lead: &NewLead) -> Result<Lead, StoreError> {
        let conn = self.open()?;
        let email = lead.email.trim().to_ascii_lowercase();
        let started_at = format_datetime(lead.started_at);
        conn.execute(
            "INSERT INTO leads (id, campaign_id, agent_id, email, name, status, sequence_index, next_send_at, started_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'active', 0, NULL, ?6, ?6)
             ON CONFLICT(campaign_id, email) DO NOTHING",
            params![
                Uuid::new_v4().to_string(),
                lead.campaign_id.as_str(),
                lead.agent_id.as_str(),
                email.as_str(),
                lead.name.as_deref(),
                started_at
            ],
        )?;
        let stored = conn.query_row(
            &format!(
                "SELECT {} FROM leads WHERE campaign_id = ?1 AND email = ?2",
                LEAD_COLUMNS
            ),
            params![lead.campaign_id.as_str(), email.as_str()],
            lead_from_row,
        )?;
        Ok(stored)
    }

    pub fn get_lead(&self, id: &str) -> Result<Option<Lead>, StoreError> {
        let conn = self.open()?;
        let lead = conn
            .query_row(
                &format!("SELECT {} FROM leads WHERE id = ?1", LEAD_COLUMNS),
                params![id],
                lead_from_row,
            )
            .optional()?;
        Ok(lead)
    }

    pub fn list_leads(&self, campaign_id: &str) -> Result<Vec<Lead>, StoreError> {
        self.query_leads(
            &format!(
                "SELECT {} FROM leads WHERE campaign_id = ?1 ORDER BY started_at, rowid",
                LEAD_COLUMNS
            ),
            campaign_id,
        )
    }

    pub fn active_leads(&self, campaign_id: &str) -> Result<Vec<Lead>, StoreError> {
        self.query_leads(
            &format!(
                "SELECT {} FROM leads WHERE campaign_id = ?1 AND status = 'active'
                 ORDER BY started_at, rowid",
                LEAD_COLUMNS
            ),
            campaign_id,
        )
    }

    /// Moves a lead from `expected_index` to the next step. The index guard
    /// makes a stale or concurrent advance a no-op (returns false).
    pub fn advance_lead(
        &self,
        id: &str,
        expected_index: usize,
        next_send_at: Option<DateTime<Utc>>,
        completed: bool,
    ) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let status = if completed {
            LeadStatus::Completed
        } else {
            LeadStatus::Active
        };
        let updated = conn.execute(
            "UPDATE leads
             SET sequence_index = sequence_index + 1, next_send_at = ?1, status = ?2, updated_at = ?3
             WHERE id = ?4 AND sequence_index = ?5 AND status = 'active'",
            params![
                next_send_at.map(format_datetime),
                status.as_str(),
                format_datetime(Utc::now()),
                id,
                expected_index as i64
            ],
        )?;
        Ok(updated == 1)
    }

    pub fn set_lead_status(&self, id: &str, status: LeadStatus) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let updated = conn.execute(
            "UPDATE leads SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), format_datetime(Utc::now()), id],
        )?;
        Ok(updated == 1)
    }

    pub fn outreach_counts(&self) -> Result<OutreachCounts, StoreError> {
        let conn = self.open()?;
        let (active_campaigns, active_leads, leads_due_immediately) = conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM campaigns WHERE status = 'active'),
                (SELECT COUNT(*) FROM leads l JOIN campaigns c ON c.id = l.campaign_id
                    WHERE c.status = 'active' AND l.status = 'active'),
                (SELECT COUNT(*) FROM leads l JOIN campaigns c ON c.id = l.campaign_id
                    WHERE c.status = 'active' AND l.status = 'active' AND l.next_send_at IS NULL)",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )?;
        Ok(OutreachCounts {
            active_campaigns: active_campaigns.max(0) as usize,
            active_leads: active_leads.max(0) as usize,
            leads_due_immediately: leads_due_immediately.max(0) as usize,
        })
    }

    /// Sending domains of agents that own an active campaign.
    pub fn active_campaign_domains(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT a.domain FROM campaigns c JOIN agents a ON a.id = c.agent_id
             WHERE c.status = 'active'
             ORDER BY a.domain",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut domains = Vec::new();
        for row in rows {
            domains.push(row?);
        }
        Ok(domains)
    }

    fn query_leads(&self, sql: &str, campaign_id: &str) -> Result<Vec<Lead>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![campaign_id], lead_from_row)?;
        let mut leads = Vec::new();
        for row in rows {
            leads.push(row?);
        }
        Ok(leads)
    }
}

fn load_steps(conn: &Connection, campaign_id: &str) -> Result<Vec<CampaignStep>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT offset_days, subject, template FROM campaign_steps
         WHERE campaign_id = ?1
         ORDER BY position",
    )?;
    let rows = stmt.query_map(params![campaign_id], |row| {
        Ok(CampaignStep {
            offset_days: row.get(0)?,
            subject: row.get(1)?,
            template: row.get(2)?,
        })
    })?;
    let mut steps = Vec::new();
    for row in rows {
        steps.push(row?);
    }
    Ok(steps)
}

fn campaign_header_from_row(row: &Row<'_>) -> rusqlite::Result<Campaign> {
    Ok(Campaign {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        name: row.get(2)?,
        status: enum_column(row, 3)?,
        steps: Vec::new(),
    })
}

fn lead_from_row(row: &Row<'_>) -> rusqlite::Result<Lead> {
    let sequence_index: i64 = row.get(6)?;
    Ok(Lead {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        agent_id: row.get(2)?,
        email: row.get(3)?,
        name: row.get(4)?,
        status: enum_column(row, 5)?,
        sequence_index: sequence_index.max(0) as usize,
        next_send_at: optional_datetime_column(row, 7)?,
        started_at: datetime_column(row, 8)?,
        updated_at: datetime_column(row, 9)?,
    })
}
