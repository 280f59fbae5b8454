use actions_auth::jwt::error::JwtError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GitHubError {
    #[error("github request failed: `{0}`")]
    Http(#[from] reqwest::Error),

    #[error("github answered `{status}` for {url}")]
    Status { status: String, url: String },

    #[error("repository owner `{0}` is not allowed")]
    OwnerNotAllowed(String),

    #[error("repository `{repository}` visibility `{visibility}` is not allowed")]
    VisibilityNotAllowed {
        repository: String,
        visibility: String,
    },

    #[error("the github app has no installation")]
    NoInstallation,

    #[error("signing github app token: `{0}`")]
    Jwt(#[from] JwtError),

    #[error("invalid github app private key: `{0}`")]
    InvalidAppKey(String),
}

impl GitHubError {
    /// Requests rejected by configuration, retrying will not help.
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            GitHubError::OwnerNotAllowed(_) | GitHubError::VisibilityNotAllowed { .. }
        )
    }
}
