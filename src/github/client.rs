use super::auth::Authenticator;
use super::cache::TokenCache;
use super::error::GitHubError;
use super::types::{
    Repository, RunnerEvent, RunnerToken, TenantCredential, TenantCredentialRequest,
};
use super::{AccessPolicy, CodeHost};
use crate::crd::runner::Repository as RepositoryRef;
use crate::metrics::Metrics;
use actions_auth::jwt::peek_expiration;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{header, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub(super) const ACCEPT: &str = "application/vnd.github+json";
pub(super) const USER_AGENT: &str = "kube-actions";
pub(super) const API_VERSION_HEADER: &str = "X-GitHub-Api-Version";
pub(super) const API_VERSION: &str = "2022-11-28";
const REMOTE_AUTH_SCHEME: &str = "RemoteAuth";
const REPOSITORY_TTL_HOURS: i64 = 1;

/// Sends `request`, records its rate limit headers and decodes a successful body.
pub(super) async fn execute<T: DeserializeOwned>(
    request: RequestBuilder,
    metrics: &Metrics,
    client: &str,
) -> Result<T, GitHubError> {
    let response = request.send().await?;
    metrics.observe_response(client, response.headers());

    let status = response.status();
    if !status.is_success() {
        return Err(GitHubError::Status {
            status: status.to_string(),
            url: response.url().to_string(),
        });
    }
    Ok(response.json().await?)
}

pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    auth: Authenticator,
    access: AccessPolicy,
    metrics: Arc<Metrics>,
    repositories: TokenCache<Repository>,
    registration_tokens: TokenCache<String>,
    remove_tokens: TokenCache<String>,
    tenant_credentials: TokenCache<TenantCredential>,
}

impl GitHubClient {
    pub fn new(
        http: reqwest::Client,
        api_url: impl Into<String>,
        auth: Authenticator,
        access: AccessPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            auth,
            access,
            repositories: TokenCache::unlimited("repository", metrics.clone()),
            registration_tokens: TokenCache::new("registration-token", metrics.clone()),
            remove_tokens: TokenCache::new("remove-token", metrics.clone()),
            tenant_credentials: TokenCache::new("tenant-credential", metrics.clone()),
            metrics,
        }
    }

    fn base_url<'a>(&'a self, repository: &'a RepositoryRef) -> &'a str {
        repository
            .api_endpoint
            .as_deref()
            .map(|endpoint| endpoint.trim_end_matches('/'))
            .unwrap_or(self.api_url.as_str())
    }

    async fn request(
        &self,
        method: Method,
        url: String,
    ) -> Result<RequestBuilder, GitHubError> {
        Ok(self
            .http
            .request(method, url)
            .header(header::ACCEPT, ACCEPT)
            .header(header::USER_AGENT, USER_AGENT)
            .header(API_VERSION_HEADER, API_VERSION)
            .header(header::AUTHORIZATION, self.auth.authorization().await?))
    }

    async fn runner_token(
        &self,
        repository: &RepositoryRef,
        event: RunnerEvent,
    ) -> Result<String, GitHubError> {
        let (cache, path) = match event {
            RunnerEvent::Register => (&self.registration_tokens, "registration-token"),
            RunnerEvent::Remove => (&self.remove_tokens, "remove-token"),
        };
        let key = repository.to_string();
        cache
            .get_or_fetch(&key, || async {
                self.check_owner(repository)?;
                let url = format!(
                    "{}/repos/{}/{}/actions/runners/{path}",
                    self.base_url(repository),
                    repository.owner,
                    repository.name
                );
                let token: RunnerToken = execute(
                    self.request(Method::POST, url).await?,
                    &self.metrics,
                    self.auth.client_label(),
                )
                .await?;
                Ok((token.token, token.expires_at))
            })
            .await
    }

    fn check_owner(&self, repository: &RepositoryRef) -> Result<(), GitHubError> {
        if self.access.allows_owner(&repository.owner) {
            Ok(())
        } else {
            Err(GitHubError::OwnerNotAllowed(repository.owner.clone()))
        }
    }
}

#[async_trait]
impl CodeHost for GitHubClient {
    async fn repository(&self, repository: &RepositoryRef) -> Result<Repository, GitHubError> {
        self.check_owner(repository)?;
        let found = self
            .repositories
            .get_or_fetch(&repository.to_string(), || async {
                let url = format!(
                    "{}/repos/{}/{}",
                    self.base_url(repository),
                    repository.owner,
                    repository.name
                );
                let found: Repository = execute(
                    self.request(Method::GET, url).await?,
                    &self.metrics,
                    self.auth.client_label(),
                )
                .await?;
                Ok::<_, GitHubError>((found, Utc::now() + Duration::hours(REPOSITORY_TTL_HOURS)))
            })
            .await?;

        let visibility = found.visibility();
        if !self.access.allows_visibility(visibility) {
            return Err(GitHubError::VisibilityNotAllowed {
                repository: found.full_name,
                visibility: visibility.to_string(),
            });
        }
        Ok(found)
    }

    async fn registration_token(&self, repository: &RepositoryRef) -> Result<String, GitHubError> {
        self.runner_token(repository, RunnerEvent::Register).await
    }

    async fn remove_token(&self, repository: &RepositoryRef) -> Result<String, GitHubError> {
        self.runner_token(repository, RunnerEvent::Remove).await
    }

    async fn tenant_credential(
        &self,
        event: RunnerEvent,
        repository: &RepositoryRef,
    ) -> Result<TenantCredential, GitHubError> {
        let key = format!("{event}@{repository}");
        self.tenant_credentials
            .get_or_fetch(&key, || async {
                let html_url = self.repository(repository).await?.html_url;
                let runner_token = self.runner_token(repository, event).await?;

                debug!(%repository, %event, "requesting tenant credential");
                let request = self
                    .http
                    .post(format!(
                        "{}/actions/runner-registration",
                        self.base_url(repository)
                    ))
                    .header(header::USER_AGENT, USER_AGENT)
                    .header(
                        header::AUTHORIZATION,
                        format!("{REMOTE_AUTH_SCHEME} {runner_token}"),
                    )
                    .json(&TenantCredentialRequest {
                        url: &html_url,
                        runner_event: event.to_string(),
                    });
                let credential: TenantCredential =
                    execute(request, &self.metrics, "tenant").await?;

                let expires_at = peek_expiration(&credential.token).unwrap_or_else(|err| {
                    warn!(%repository, "tenant credential expiration unreadable: {err}");
                    Utc::now() + Duration::hours(1)
                });
                Ok((credential, expires_at))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::auth::GitHubCredentials;
    use crate::github::types::Visibility;
    use assert_matches::assert_matches;
    use httpmock::{Method::GET, Method::POST, MockServer};
    use serde_json::json;

    fn client(server: &MockServer, access: AccessPolicy) -> GitHubClient {
        let metrics = Arc::new(Metrics::try_new().unwrap());
        let auth = Authenticator::try_new(
            GitHubCredentials::PersonalAccessToken("pat".to_string()),
            reqwest::Client::new(),
            server.base_url(),
            metrics.clone(),
        )
        .unwrap();
        GitHubClient::new(
            reqwest::Client::new(),
            server.base_url(),
            auth,
            access,
            metrics,
        )
    }

    fn repository_ref() -> RepositoryRef {
        RepositoryRef {
            owner: "o".to_string(),
            name: "r".to_string(),
            api_endpoint: None,
        }
    }

    fn repository_body(private: bool) -> serde_json::Value {
        json!({
            "id": 1,
            "name": "r",
            "full_name": "o/r",
            "owner": {"login": "o"},
            "private": private,
            "html_url": "https://github.com/o/r"
        })
    }

    #[tokio::test]
    async fn test_repository_lookup_is_cached() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/o/r")
                    .header("authorization", "Bearer pat")
                    .header("accept", ACCEPT);
                then.status(200)
                    .header("x-ratelimit-remaining", "4999")
                    .json_body(repository_body(false));
            })
            .await;

        let client = client(&server, AccessPolicy::default());
        let first = client.repository(&repository_ref()).await.unwrap();
        let second = client.repository(&repository_ref()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.html_url, "https://github.com/o/r");
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_owner_not_allowed_skips_the_api() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.any_request();
                then.status(500);
            })
            .await;

        let client = client(
            &server,
            AccessPolicy::new(vec!["someone-else".to_string()], vec![]),
        );
        let err = client.repository(&repository_ref()).await.unwrap_err();

        assert_matches!(err, GitHubError::OwnerNotAllowed(owner) => assert_eq!(owner, "o"));
        mock.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_visibility_not_allowed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/o/r");
                then.status(200).json_body(repository_body(true));
            })
            .await;

        let client = client(
            &server,
            AccessPolicy::new(vec![], vec![Visibility::Public]),
        );
        let err = client.repository(&repository_ref()).await.unwrap_err();
        assert!(err.is_forbidden());
        assert_matches!(err, GitHubError::VisibilityNotAllowed { visibility, .. } => {
            assert_eq!(visibility, "private");
        });
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/o/r");
                then.status(404);
            })
            .await;

        let err = client(&server, AccessPolicy::default())
            .repository(&repository_ref())
            .await
            .unwrap_err();
        assert_matches!(err, GitHubError::Status { status, .. } => {
            assert_eq!(status, "404 Not Found");
        });
    }

    #[tokio::test]
    async fn test_tenant_credential() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/o/r");
                then.status(200).json_body(repository_body(false));
            })
            .await;
        let token = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/repos/o/r/actions/runners/registration-token");
                then.status(201).json_body(json!({
                    "token": "registration",
                    "expires_at": (Utc::now() + Duration::hours(1)).to_rfc3339(),
                }));
            })
            .await;
        let registration = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/actions/runner-registration")
                    .header("authorization", "RemoteAuth registration")
                    .json_body(json!({
                        "url": "https://github.com/o/r",
                        "runner_event": "register"
                    }));
                then.status(200).json_body(json!({
                    "url": "https://pipelines.example/tenant",
                    "token": "not-a-jwt",
                    "token_schema": "OAuthAccessToken"
                }));
            })
            .await;

        let client = client(&server, AccessPolicy::default());
        let credential = client
            .tenant_credential(RunnerEvent::Register, &repository_ref())
            .await
            .unwrap();
        let cached = client
            .tenant_credential(RunnerEvent::Register, &repository_ref())
            .await
            .unwrap();

        assert_eq!(credential.url, "https://pipelines.example/tenant");
        assert_eq!(credential, cached);
        token.assert_hits_async(1).await;
        registration.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_remove_token_uses_its_own_endpoint() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/repos/o/r/actions/runners/remove-token");
                then.status(201).json_body(json!({
                    "token": "remove",
                    "expires_at": (Utc::now() + Duration::hours(1)).to_rfc3339(),
                }));
            })
            .await;

        let token = client(&server, AccessPolicy::default())
            .remove_token(&repository_ref())
            .await
            .unwrap();
        assert_eq!(token, "remove");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_endpoint_override() {
        let server = MockServer::start_async().await;
        let enterprise = MockServer::start_async().await;
        let mock = enterprise
            .mock_async(|when, then| {
                when.method(GET).path("/api/v3/repos/o/r");
                then.status(200).json_body(repository_body(false));
            })
            .await;

        let mut repository = repository_ref();
        repository.api_endpoint = Some(format!("{}/api/v3/", enterprise.base_url()));
        client(&server, AccessPolicy::default())
            .repository(&repository)
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
