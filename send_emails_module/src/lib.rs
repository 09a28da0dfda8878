use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_API_BASE_URL: &str = "https://api.mailgun.net";
const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// One outbound message as handed to the provider.
///
/// `message_id`, `in_reply_to` and `references` are sent as custom headers so
/// the provider does not mint its own Message-Id.
#[derive(Debug, Clone, Default)]
pub struct SendEmailParams {
    pub subject: String,
    pub from: String,
    pub to: Vec<String>,
    pub reply_to: Option<String>,
    pub text_body: String,
    pub html_body: Option<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SendEmailResponse {
    pub message_id: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SendEmailError {
    #[error("missing environment variable: {0}")]
    MissingEnv(&'static str),
    #[error("invalid send parameters: {0}")]
    InvalidParams(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider rejected message (status {status}): {body}")]
    Api { status: u16, body: String },
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone)]
pub struct MailgunConfig {
    pub api_key: String,
    pub api_base_url: String,
    pub timeout: Duration,
}

impl MailgunConfig {
    pub fn from_env() -> Result<Self, SendEmailError> {
        dotenvy::dotenv().ok();
        let api_key = env::var("MAILGUN_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(SendEmailError::MissingEnv("MAILGUN_API_KEY"))?;
        let api_base_url = env::var("MAILGUN_API_BASE_URL")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let timeout = env::var("MAILGUN_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        Ok(Self {
            api_key,
            api_base_url,
            timeout,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MailgunSendResponse {
    id: Option<String>,
    #[serde(default)]
    message: String,
}

/// Send using credentials from the environment.
pub fn send_email(params: &SendEmailParams) -> Result<SendEmailResponse, SendEmailError> {
    let config = MailgunConfig::from_env()?;
    send_email_with(&config, params)
}

pub fn send_email_with(
    config: &MailgunConfig,
    params: &SendEmailParams,
) -> Result<SendEmailResponse, SendEmailError> {
    if params.to.is_empty() {
        return Err(SendEmailError::InvalidParams(
            "at least one recipient is required".to_string(),
        ));
    }
    let domain = sending_domain(&params.from).ok_or_else(|| {
        SendEmailError::InvalidParams(format!("cannot resolve sending domain from {}", params.from))
    })?;

    let url = format!("{}/v3/{}/messages", config.api_base_url, domain);
    let form = build_form(params);
    let client = reqwest::blocking::Client::builder()
        .timeout(config.timeout)
        .build()?;
    let response = client
        .post(url)
        .basic_auth("api", Some(&config.api_key))
        .form(&form)
        .send()?;

    let status = response.status();
    let body = response.text()?;
    if !status.is_success() {
        return Err(SendEmailError::Api {
            status: status.as_u16(),
            body,
        });
    }
    let parsed: MailgunSendResponse = serde_json::from_str(&body)
        .map_err(|err| SendEmailError::InvalidResponse(err.to_string()))?;
    let message_id = parsed
        .id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| SendEmailError::InvalidResponse("missing id".to_string()))?;
    Ok(SendEmailResponse {
        message_id,
        message: parsed.message,
    })
}

fn build_form(params: &SendEmailParams) -> Vec<(String, String)> {
    let mut form = vec![
        ("from".to_string(), params.from.clone()),
        ("subject".to_string(), params.subject.clone()),
        ("text".to_string(), params.text_body.clone()),
    ];
    for recipient in &params.to {
        form.push(("to".to_string(), recipient.clone()));
    }
    if let Some(html) = params.html_body.as_deref().filter(|value| !value.is_empty()) {
        form.push(("html".to_string(), html.to_string()));
    }
    let threading = [
        ("Reply-To", params.reply_to.as_deref()),
        ("Message-Id", params.message_id.as_deref()),
        ("In-Reply-To", params.in_reply_to.as_deref()),
        ("References", params.references.as_deref()),
    ];
    for (name, value) in threading {
        if let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) {
            form.push((format!("h:{}", name), value.to_string()));
        }
    }
    for (name, value) in &params.headers {
        form.push((format!("h:{}", name), value.clone()));
    }
    form
}

/// Domain part of `Name <local@domain>` or a bare address.
pub fn sending_domain(from: &str) -> Option<String> {
    let address = match (from.rfind('<'), from.rfind('>')) {
        (Some(start), Some(end)) if start < end => &from[start + 1..end],
        _ => from,
    };
    let domain = address.trim().rsplit_once('@')?.1.trim();
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_ascii_lowercase())
    }
}
