use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthzError {
    /// The subject lacks the requested permission. Carries the checked
    /// relationship in tuple form so callers can log what was denied.
    #[error("access denied: {0}")]
    Denied(String),

    #[error("Invalid relationship: {0}")]
    InvalidRelationship(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Schema has not been written to the backend")]
    SchemaMissing,

    #[error("Too many updates in one write: {count} exceeds limit of {limit}")]
    TooManyUpdates { count: usize, limit: usize },

    #[error("Maximum dispatch depth exceeded while checking {0}")]
    MaxDepthExceeded(String),

    #[error("Backend returned status {status}: {message}")]
    Backend { status: u16, message: String },

    /// Error frame inside a streamed response; `code` is a gRPC status code
    #[error("Backend stream failed with code {code}: {message}")]
    Stream { code: i32, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthzError {
    /// True when the error is a permission denial rather than a failure.
    pub fn is_denied(&self) -> bool {
        matches!(self, AuthzError::Denied(_))
    }
}

impl From<reqwest::Error> for AuthzError {
    fn from(err: reqwest::Error) -> Self {
        AuthzError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for AuthzError {
    fn from(err: serde_json::Error) -> Self {
        AuthzError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AuthzError>;
