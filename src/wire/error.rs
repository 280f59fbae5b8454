use crate::actions::error::ActionsError;
use crate::github::error::GitHubError;
use actions_auth::CryptoError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("code host: {0}")]
    GitHub(#[from] GitHubError),

    #[error("agent service: {0}")]
    Actions(#[from] ActionsError),

    #[error("generating the runner key: {0}")]
    Crypto(#[from] CryptoError),

    #[error("{count} agents are named `{name}`")]
    AmbiguousAgent { name: String, count: usize },

    #[error("the runner key generation task failed: {0}")]
    KeyGeneration(String),
}

impl WireError {
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, WireError::Actions(err) if err.is_unrecoverable())
    }
}
