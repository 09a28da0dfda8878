use std::collections::BTreeMap;

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("invalid form body: {0}")]
    InvalidForm(String),
    #[error("invalid json body: {0}")]
    InvalidJson(String),
    #[error("json body must be an object")]
    NotAnObject,
}

/// Flattened webhook fields keyed by lowercase name.
///
/// The provider posts either form fields (urlencoded or multipart) or JSON.
/// JSON bodies may nest the signature block under `signature` and carry
/// `message-headers` as an array; both are folded into the same map so
/// lookups do not care which encoding arrived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookPayload {
    fields: BTreeMap<String, String>,
}

impl WebhookPayload {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut payload = Self::default();
        for (key, value) in pairs {
            payload.insert(key.as_ref(), value.into());
        }
        payload
    }

    pub fn from_form(body: &[u8]) -> Result<Self, PayloadError> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
            .map_err(|err| PayloadError::InvalidForm(err.to_string()))?;
        Ok(Self::from_pairs(pairs))
    }

    pub fn from_json(body: &[u8]) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| PayloadError::InvalidJson(err.to_string()))?;
        let Value::Object(map) = value else {
            return Err(PayloadError::NotAnObject);
        };
        let mut payload = Self::default();
        for (key, value) in map {
            match (key.to_ascii_lowercase().as_str(), value) {
                ("signature", Value::Object(block)) => {
                    for (inner_key, inner_value) in block {
                        if let Some(text) = scalar_to_string(&inner_value) {
                            payload.insert(&inner_key, text);
                        }
                    }
                }
                (_, Value::Null) => {}
                (_, value @ (Value::Array(_) | Value::Object(_))) => {
                    payload.insert(&key, value.to_string());
                }
                (_, value) => {
                    if let Some(text) = scalar_to_string(&value) {
                        payload.insert(&key, text);
                    }
                }
            }
        }
        Ok(payload)
    }

    pub fn insert(&mut self, key: &str, value: String) {
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            return;
        }
        self.fields.entry(key).or_insert(value);
    }

    /// Case-insensitive field lookup; blank values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn first(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get(key))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.get("timestamp")
    }

    pub fn token(&self) -> Option<&str> {
        self.get("token")
    }

    pub fn signature(&self) -> Option<&str> {
        self.get("signature")
    }

    /// The `message-headers` list as (name, value) pairs.
    pub fn message_headers(&self) -> Vec<(String, String)> {
        let Some(raw) = self.get("message-headers") else {
            return Vec::new();
        };
        let Ok(Value::Array(entries)) = serde_json::from_str::<Value>(raw) else {
            return Vec::new();
        };
        entries
            .into_iter()
            .filter_map(|entry| match entry {
                Value::Array(pair) if pair.len() == 2 => {
                    let name = pair[0].as_str()?.to_string();
                    let value = scalar_to_string(&pair[1])?;
                    Some((name, value))
                }
                _ => None,
            })
            .collect()
    }

    /// A header from the top-level fields, falling back to `message-headers`.
    pub fn header(&self, name: &str) -> Option<String> {
        if let Some(value) = self.get(name) {
            return Some(value.to_string());
        }
        self.message_headers()
            .into_iter()
            .find(|(key, value)| key.eq_ignore_ascii_case(name) && !value.trim().is_empty())
            .map(|(_, value)| value)
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
