use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::Agent;

mod campaigns;
mod conversations;
mod schema;

pub use campaigns::OutreachCounts;

use schema::OUTREACH_SCHEMA;

/// SQLite-backed store for agents, conversations, messages, campaigns and
/// leads. A fresh connection is opened per call; uniqueness constraints and
/// conditional updates carry the concurrency guarantees.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("storage error: {0}")]
    Storage(String),
}

impl ConversationStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { path: path.into() };
        let _ = store.open()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn upsert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        let conn = self.open()?;
        let variables = serde_json::to_string(&agent.variables)?;
        conn.execute(
            "INSERT INTO agents (id, display_name, domain, local_part, prompt_template, variables_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                domain = excluded.domain,
                local_part = excluded.local_part,
                prompt_template = excluded.prompt_template,
                variables_json = excluded.variables_json,
                updated_at = excluded.updated_at",
            params![
                agent.id.as_str(),
                agent.display_name.as_str(),
                agent.domain.trim().to_ascii_lowercase(),
                agent.local_part.trim().to_ascii_lowercase(),
                agent.prompt_template.as_str(),
                variables,
                format_datetime(Utc::now())
            ],
        )?;
        Ok(())
    }

    pub fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, StoreError> {
        let conn = self.open()?;
        let agent = conn
            .query_row(
                &format!("SELECT {} FROM agents WHERE id = ?1", AGENT_COLUMNS),
                params![agent_id],
                agent_from_row,
            )
            .optional()?;
        Ok(agent)
    }

    /// Resolves the agent owning `local_part@domain`, case-insensitively.
    pub fn find_agent_by_address(
        &self,
        local_part: &str,
        domain: &str,
    ) -> Result<Option<Agent>, StoreError> {
        let conn = self.open()?;
        let agent = conn
            .query_row(
                &format!(
                    "SELECT {} FROM agents WHERE domain = ?1 AND local_part = ?2",
                    AGENT_COLUMNS
                ),
                params![
                    domain.trim().to_ascii_lowercase(),
                    local_part.trim().to_ascii_lowercase()
                ],
                agent_from_row,
            )
            .optional()?;
        Ok(agent)
    }

    pub fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM agents ORDER BY id",
            AGENT_COLUMNS
        ))?;
        let rows = stmt.query_map([], agent_from_row)?;
        let mut agents = Vec::new();
        for row in rows {
            agents.push(row?);
        }
        Ok(agents)
    }

    fn open(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(OUTREACH_SCHEMA)?;
        Ok(conn)
    }
}

const AGENT_COLUMNS: &str =
    "id, display_name, domain, local_part, prompt_template, variables_json";

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    let variables_raw: String = row.get(5)?;
    let variables: BTreeMap<String, String> = serde_json::from_str(&variables_raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(err)))?;
    Ok(Agent {
        id: row.get(0)?,
        display_name: row.get(1)?,
        domain: row.get(2)?,
        local_part: row.get(3)?,
        prompt_template: row.get(4)?,
        variables,
    })
}

/// Fixed-width UTC timestamps so lexical order matches time order.
pub(crate) fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_datetime(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn datetime_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn optional_datetime_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => parse_datetime(&raw).map(Some).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
        }),
        None => Ok(None),
    }
}

fn enum_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into()))
}
