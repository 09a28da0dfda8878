use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Accepted clock skew between the provider's timestamp and ours.
pub const SIGNATURE_REPLAY_WINDOW_SECS: u64 = 60 * 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing signature field: {0}")]
    MissingField(&'static str),
    #[error("invalid timestamp")]
    InvalidTimestamp,
    #[error("timestamp outside replay window")]
    StaleTimestamp,
    #[error("signature mismatch")]
    Mismatch,
    #[error("signing key rejected")]
    BadSecret,
}

impl SignatureError {
    /// Short machine-readable reason returned in the 401 body.
    pub fn reason(&self) -> &'static str {
        match self {
            SignatureError::MissingField("timestamp") => "missing_timestamp",
            SignatureError::MissingField("token") => "missing_token",
            SignatureError::MissingField(_) => "missing_signature",
            SignatureError::InvalidTimestamp => "invalid_timestamp",
            SignatureError::StaleTimestamp => "stale_timestamp",
            SignatureError::Mismatch => "invalid_signature",
            SignatureError::BadSecret => "bad_secret",
        }
    }
}

/// Hex HMAC-SHA256 of `timestamp + token`, as the provider signs webhooks.
pub fn compute_signature(secret: &str, timestamp: &str, token: &str) -> Result<String, SignatureError> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::BadSecret)?;
    mac.update(timestamp.as_bytes());
    mac.update(token.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a webhook signature block against `secret` at `now_unix`.
pub fn verify_signature(
    secret: &str,
    timestamp: Option<&str>,
    token: Option<&str>,
    signature: Option<&str>,
    now_unix: i64,
) -> Result<(), SignatureError> {
    let timestamp = non_empty(timestamp).ok_or(SignatureError::MissingField("timestamp"))?;
    let token = non_empty(token).ok_or(SignatureError::MissingField("token"))?;
    let signature = non_empty(signature).ok_or(SignatureError::MissingField("signature"))?;

    let timestamp_value: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::InvalidTimestamp)?;
    if now_unix.abs_diff(timestamp_value) > SIGNATURE_REPLAY_WINDOW_SECS {
        return Err(SignatureError::StaleTimestamp);
    }

    let provided = hex::decode(signature.to_ascii_lowercase()).map_err(|_| SignatureError::Mismatch)?;
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::BadSecret)?;
    mac.update(timestamp.as_bytes());
    mac.update(token.as_bytes());
    mac.verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}

/// Compares two shared secrets in constant time. Both sides are hashed
/// first so the comparison does not leak the expected length.
pub fn secrets_match(expected: &str, provided: &str) -> bool {
    const LABEL: &[u8] = b"outreach-secret-compare";
    let Ok(mut expected_mac) = Hmac::<Sha256>::new_from_slice(LABEL) else {
        return false;
    };
    expected_mac.update(expected.as_bytes());
    let expected_tag = expected_mac.finalize().into_bytes();

    let Ok(mut provided_mac) = Hmac::<Sha256>::new_from_slice(LABEL) else {
        return false;
    };
    provided_mac.update(provided.as_bytes());
    provided_mac.verify_slice(&expected_tag).is_ok()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
