use std::fmt;

#[derive(Debug)]
pub enum CompletionError {
    MissingEnv { key: &'static str },
    Http(reqwest::Error),
    Api { status: u16, body: String },
    EmptyResponse,
    InvalidResponse(String),
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionError::MissingEnv { key } => {
                write!(f, "Missing environment variable: {}", key)
            }
            CompletionError::Http(err) => write!(f, "Completion request failed: {}", err),
            CompletionError::Api { status, body } => write!(
                f,
                "Completion service returned status {}. Body:\n{}",
                status, body
            ),
            CompletionError::EmptyResponse => write!(f, "Completion service returned no choices."),
            CompletionError::InvalidResponse(reason) => {
                write!(f, "Invalid completion response: {}", reason)
            }
        }
    }
}

impl std::error::Error for CompletionError {}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        CompletionError::Http(err)
    }
}

impl CompletionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CompletionError::Http(err) if err.is_timeout())
    }
}
