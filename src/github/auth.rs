//! Credentials for the GitHub REST API: a personal access token, or a GitHub App
//! whose installation token is refreshed when it gets close to expiring.
use super::client::{execute, ACCEPT, API_VERSION, API_VERSION_HEADER, USER_AGENT};
use super::error::GitHubError;
use super::types::{Installation, InstallationToken};
use crate::metrics::Metrics;
use actions_auth::jwt::claims::Claims;
use actions_auth::jwt::signer::RsaSigner;
use chrono::{Duration, Utc};
use reqwest::header;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Clone, PartialEq)]
pub enum GitHubCredentials {
    PersonalAccessToken(String),
    App {
        id: u64,
        private_key: String,
        installation_id: Option<u64>,
    },
}

impl Debug for GitHubCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GitHubCredentials::PersonalAccessToken(_) => f.write_str("PersonalAccessToken(..)"),
            GitHubCredentials::App {
                id,
                installation_id,
                ..
            } => f
                .debug_struct("App")
                .field("id", id)
                .field("installation_id", installation_id)
                .finish_non_exhaustive(),
        }
    }
}

impl GitHubCredentials {
    /// Label identifying the credential kind on metrics.
    pub fn client_label(&self) -> &'static str {
        match self {
            GitHubCredentials::PersonalAccessToken(_) => "pat",
            GitHubCredentials::App { .. } => "app",
        }
    }
}

pub struct Authenticator {
    credentials: GitHubCredentials,
    signer: Option<RsaSigner>,
    http: reqwest::Client,
    api_url: String,
    metrics: Arc<Metrics>,
    installation_token: Mutex<Option<InstallationToken>>,
}

impl Authenticator {
    pub fn try_new(
        credentials: GitHubCredentials,
        http: reqwest::Client,
        api_url: impl Into<String>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, GitHubError> {
        let signer = match &credentials {
            GitHubCredentials::App { private_key, .. } => Some(
                RsaSigner::from_pem(private_key.as_bytes())
                    .map_err(|err| GitHubError::InvalidAppKey(err.to_string()))?,
            ),
            GitHubCredentials::PersonalAccessToken(_) => None,
        };
        Ok(Self {
            credentials,
            signer,
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            metrics,
            installation_token: Mutex::new(None),
        })
    }

    pub fn client_label(&self) -> &'static str {
        self.credentials.client_label()
    }

    /// Value of the `Authorization` header for API calls.
    pub async fn authorization(&self) -> Result<String, GitHubError> {
        match &self.credentials {
            GitHubCredentials::PersonalAccessToken(token) => Ok(format!("Bearer {token}")),
            GitHubCredentials::App {
                id,
                installation_id,
                ..
            } => {
                let mut current = self.installation_token.lock().await;
                let fresh = current.as_ref().filter(|token| {
                    token.expires_at > Utc::now() + Duration::seconds(REFRESH_MARGIN_SECS)
                });
                if let Some(token) = fresh {
                    return Ok(format!("Bearer {}", token.token));
                }

                debug!(app_id = id, "refreshing installation token");
                let token = self.installation_token(*id, *installation_id).await?;
                let header = format!("Bearer {}", token.token);
                *current = Some(token);
                Ok(header)
            }
        }
    }

    async fn installation_token(
        &self,
        app_id: u64,
        installation_id: Option<u64>,
    ) -> Result<InstallationToken, GitHubError> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            GitHubError::InvalidAppKey("github app credentials without a signer".to_string())
        })?;
        let jwt = signer.sign(&Claims::app(app_id, Utc::now()))?;
        let bearer = format!("Bearer {}", jwt.value);

        let installation_id = match installation_id {
            Some(id) => id,
            None => {
                let installations: Vec<Installation> = execute(
                    self.app_request(reqwest::Method::GET, "/app/installations", &bearer),
                    &self.metrics,
                    "app",
                )
                .await?;
                installations
                    .first()
                    .map(|installation| installation.id)
                    .ok_or(GitHubError::NoInstallation)?
            }
        };

        execute(
            self.app_request(
                reqwest::Method::POST,
                &format!("/app/installations/{installation_id}/access_tokens"),
                &bearer,
            ),
            &self.metrics,
            "app",
        )
        .await
    }

    fn app_request(
        &self,
        method: reqwest::Method,
        path: &str,
        bearer: &str,
    ) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.api_url))
            .header(header::ACCEPT, ACCEPT)
            .header(header::USER_AGENT, USER_AGENT)
            .header(API_VERSION_HEADER, API_VERSION)
            .header(header::AUTHORIZATION, bearer)
    }
}
