use std::env;
use std::io;
use std::path::PathBuf;

use crate::campaign::{validate_cron_expression, DEFAULT_CAMPAIGN_CRON};
use crate::engine::DEFAULT_HISTORY_LIMIT;

use super::BoxError;

pub const DEFAULT_INBOUND_BODY_MAX_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    /// TOML file with agents, campaigns and URL triggers.
    pub directory_path: Option<PathBuf>,
    pub webhook_signing_key: Option<String>,
    /// Skips webhook signature checks. Development only.
    pub signature_disabled: bool,
    pub allowed_sending_domains: Vec<String>,
    /// Bearer token for the manual scheduler trigger.
    pub admin_token: Option<String>,
    pub scheduler_enabled: bool,
    pub scheduler_cron: String,
    pub history_limit: usize,
    pub inbound_body_max_bytes: usize,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, BoxError> {
        dotenvy::dotenv().ok();

        let host = env::var("OUTREACH_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("OUTREACH_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(8080);
        let database_path = resolve_path(
            env_var_non_empty("OUTREACH_DB_PATH").unwrap_or_else(|| "state/outreach.db".to_string()),
        )?;
        let directory_path = match env_var_non_empty("OUTREACH_DIRECTORY_PATH") {
            Some(path) => Some(resolve_path(path)?),
            None => {
                let default = resolve_path("outreach.toml".to_string())?;
                default.exists().then_some(default)
            }
        };

        let webhook_signing_key = env_var_non_empty("MAILGUN_WEBHOOK_SIGNING_KEY");
        let signature_disabled = env_flag("WEBHOOK_SIGNATURE_DISABLED", false);
        if webhook_signing_key.is_none() && !signature_disabled {
            return Err(
                "MAILGUN_WEBHOOK_SIGNING_KEY is required (set WEBHOOK_SIGNATURE_DISABLED=true for local development)"
                    .into(),
            );
        }

        let allowed_sending_domains = env::var("ALLOWED_SENDING_DOMAINS")
            .map(|value| parse_domain_list(&value))
            .unwrap_or_default();
        let admin_token = env_var_non_empty("ADMIN_TOKEN");
        let scheduler_enabled = env_flag("CAMPAIGN_SCHEDULER_ENABLED", true);
        let scheduler_cron = env_var_non_empty("CAMPAIGN_SCHEDULER_CRON")
            .unwrap_or_else(|| DEFAULT_CAMPAIGN_CRON.to_string());
        validate_cron_expression(&scheduler_cron)?;
        let history_limit = env::var("CONVERSATION_HISTORY_LIMIT")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_HISTORY_LIMIT);
        let inbound_body_max_bytes = env::var("INBOUND_BODY_MAX_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_INBOUND_BODY_MAX_BYTES);

        Ok(Self {
            host,
            port,
            database_path,
            directory_path,
            webhook_signing_key,
            signature_disabled,
            allowed_sending_domains,
            admin_token,
            scheduler_enabled,
            scheduler_cron,
            history_limit,
            inbound_body_max_bytes,
        })
    }
}

pub(crate) fn parse_domain_list(raw: &str) -> Vec<String> {
    let mut domains: Vec<String> = raw
        .split(|ch: char| ch == ',' || ch.is_whitespace())
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .collect();
    domains.sort();
    domains.dedup();
    domains
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y"
        ),
        Err(_) => default,
    }
}

fn env_var_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_path(raw: String) -> Result<PathBuf, io::Error> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        Ok(path)
    } else {
        let cwd = env::current_dir()?;
        Ok(cwd.join(path))
    }
}
