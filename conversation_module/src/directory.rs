use std::collections::BTreeMap;
use std::path::Path;

use agent_reply_module::DisallowedTerm;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::campaign::MAX_STEP_OFFSET_DAYS;
use crate::models::{normalize_email, Agent, Campaign, CampaignStatus, CampaignStep, NewLead};
use crate::store::ConversationStore;
use crate::url_triggers::{UrlTrigger, UrlTriggerConfig};

/// Agents, campaigns and reply tuning declared in `outreach.toml`.
#[derive(Debug, Deserialize, Default)]
pub struct DirectoryFile {
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
    #[serde(default)]
    pub url_triggers: BTreeMap<String, UrlTrigger>,
    #[serde(default)]
    pub disallowed_terms: Vec<DisallowedTerm>,
    #[serde(default)]
    pub campaigns: Vec<CampaignEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentEntry {
    pub id: String,
    pub display_name: String,
    pub domain: String,
    pub local_part: String,
    #[serde(default)]
    pub prompt_template: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CampaignEntry {
    pub id: String,
    pub agent_id: String,
    pub name: String,
    #[serde(default = "default_campaign_status")]
    pub status: String,
    #[serde(default)]
    pub steps: Vec<CampaignStep>,
    #[serde(default)]
    pub leads: Vec<LeadEntry>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum LeadEntry {
    Email(String),
    Detailed { email: String, name: Option<String> },
}

impl LeadEntry {
    fn parts(&self) -> (&str, Option<&str>) {
        match self {
            LeadEntry::Email(email) => (email.as_str(), None),
            LeadEntry::Detailed { email, name } => (email.as_str(), name.as_deref()),
        }
    }
}

fn default_campaign_status() -> String {
    "draft".to_string()
}

impl DirectoryFile {
    pub fn url_trigger_config(&self) -> UrlTriggerConfig {
        UrlTriggerConfig {
            triggers: self.url_triggers.clone(),
        }
    }

    /// Configured terms, or `None` to keep the built-in table.
    pub fn disallowed_terms(&self) -> Option<&[DisallowedTerm]> {
        if self.disallowed_terms.is_empty() {
            None
        } else {
            Some(&self.disallowed_terms)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectorySummary {
    pub agents: usize,
    pub campaigns: usize,
    pub leads: usize,
}

pub fn load_directory(path: &Path) -> Result<DirectoryFile, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| format!("failed to read directory {}: {}", path.display(), err))?;
    parse_directory(&content)
}

pub fn parse_directory(content: &str) -> Result<DirectoryFile, String> {
    let file = toml::from_str::<DirectoryFile>(content)
        .map_err(|err| format!("failed to parse directory: {}", err))?;
    validate_directory(&file)?;
    Ok(file)
}

fn validate_directory(file: &DirectoryFile) -> Result<(), String> {
    for agent in &file.agents {
        if agent.id.trim().is_empty() {
            return Err("agent with empty id".to_string());
        }
        if agent.domain.trim().is_empty() || agent.local_part.trim().is_empty() {
            return Err(format!("agent {} needs domain and local_part", agent.id));
        }
    }
    for campaign in &file.campaigns {
        campaign
            .status
            .parse::<CampaignStatus>()
            .map_err(|err| format!("campaign {}: {}", campaign.id, err))?;
        if !file.agents.iter().any(|agent| agent.id == campaign.agent_id) {
            return Err(format!(
                "campaign {} references unknown agent {}",
                campaign.id, campaign.agent_id
            ));
        }
        if let Some(step) = campaign
            .steps
            .iter()
            .find(|step| !(0..=MAX_STEP_OFFSET_DAYS).contains(&step.offset_days))
        {
            return Err(format!(
                "campaign {} step offset {} is outside 0..={} days",
                campaign.id, step.offset_days, MAX_STEP_OFFSET_DAYS
            ));
        }
    }
    Ok(())
}

/// Upserts agents and campaigns and enrolls listed leads. Existing leads
/// keep their progress.
pub fn apply_directory(
    store: &ConversationStore,
    file: &DirectoryFile,
    now: DateTime<Utc>,
) -> Result<DirectorySummary, String> {
    let mut summary = DirectorySummary::default();
    for entry in &file.agents {
        store
            .upsert_agent(&Agent {
                id: entry.id.trim().to_string(),
                display_name: entry.display_name.trim().to_string(),
                domain: entry.domain.trim().to_ascii_lowercase(),
                local_part: entry.local_part.trim().to_ascii_lowercase(),
                prompt_template: entry.prompt_template.clone(),
                variables: entry.variables.clone(),
            })
            .map_err(|err| format!("failed to store agent {}: {}", entry.id, err))?;
        summary.agents += 1;
    }

    for entry in &file.campaigns {
        let status = entry
            .status
            .parse::<CampaignStatus>()
            .map_err(|err| format!("campaign {}: {}", entry.id, err))?;
        store
            .upsert_campaign(&Campaign {
                id: entry.id.clone(),
                agent_id: entry.agent_id.clone(),
                name: entry.name.clone(),
                status,
                steps: entry.steps.clone(),
            })
            .map_err(|err| format!("failed to store campaign {}: {}", entry.id, err))?;
        summary.campaigns += 1;

        for lead in &entry.leads {
            let (raw_email, name) = lead.parts();
            let Some(email) = normalize_email(raw_email) else {
                warn!("campaign {} skips invalid lead address {}", entry.id, raw_email);
                continue;
            };
            store
                .insert_lead(&NewLead {
                    campaign_id: entry.id.clone(),
                    agent_id: entry.agent_id.clone(),
                    email,
                    name: name.map(str::to_string),
                    started_at: now,
                })
                .map_err(|err| format!("failed to enroll lead in {}: {}", entry.id, err))?;
            summary.leads += 1;
        }
    }
    info!(
        "directory applied: {} agent(s), {} campaign(s), {} lead(s)",
        summary.agents, summary.campaigns, summary.leads
    );
    Ok(summary)
}
