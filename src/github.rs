//! Upstream code host facade: repository lookups, runner tokens and tenant credentials.
use crate::crd::runner::Repository as RepositoryRef;
use async_trait::async_trait;

pub mod auth;
pub mod cache;
pub mod client;
pub mod error;
pub mod types;

use error::GitHubError;
use types::{Repository, RunnerEvent, TenantCredential, Visibility};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Looks the repository up, enforcing the owner and visibility allow-lists.
    async fn repository(&self, repository: &RepositoryRef) -> Result<Repository, GitHubError>;

    async fn registration_token(&self, repository: &RepositoryRef) -> Result<String, GitHubError>;

    async fn remove_token(&self, repository: &RepositoryRef) -> Result<String, GitHubError>;

    /// Exchanges the runner token matching `event` for an agent service credential.
    async fn tenant_credential(
        &self,
        event: RunnerEvent,
        repository: &RepositoryRef,
    ) -> Result<TenantCredential, GitHubError>;
}

/// Repositories runners may be registered for. Empty lists allow everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessPolicy {
    owners: Vec<String>,
    visibilities: Vec<Visibility>,
}

impl AccessPolicy {
    pub fn new(owners: Vec<String>, visibilities: Vec<Visibility>) -> Self {
        Self {
            owners,
            visibilities,
        }
    }

    pub fn allows_owner(&self, owner: &str) -> bool {
        self.owners.is_empty()
            || self
                .owners
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(owner))
    }

    pub fn allows_visibility(&self, visibility: Visibility) -> bool {
        self.visibilities.is_empty() || self.visibilities.contains(&visibility)
    }
}
