use actions_auth::oauth::OAuthError;
use actions_auth::CryptoError;
use thiserror::Error;

pub const AGENT_NOT_FOUND_TYPE_KEY: &str = "TaskAgentNotFoundException";
pub const SESSION_CONFLICT_TYPE_KEY: &str = "TaskAgentSessionConflictException";

#[derive(Error, Debug)]
pub enum ActionsError {
    #[error("agent service request failed: `{0}`")]
    Http(#[from] reqwest::Error),

    #[error("agent service answered `{status}` for {url}: {message}")]
    Status {
        status: String,
        url: String,
        message: String,
    },

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("another session is open for the agent: {0}")]
    SessionConflict(String),

    #[error("token exchange failed: `{0}`")]
    OAuth(#[from] OAuthError),

    #[error("session crypto failed: `{0}`")]
    Crypto(#[from] CryptoError),

    #[error("undecodable agent service payload: `{0}`")]
    Decode(#[from] serde_json::Error),

    #[error("agent service returned no {0}")]
    MissingField(&'static str),
}

impl ActionsError {
    /// The runner identity is unusable and has to be rotated.
    pub fn is_unrecoverable(&self) -> bool {
        match self {
            ActionsError::AgentNotFound(_) => true,
            ActionsError::OAuth(err) => err.is_unrecoverable(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            ActionsError::AgentNotFound(_) => true,
            ActionsError::Status { status, .. } => status.starts_with("404"),
            _ => false,
        }
    }
}
