use super::client::AgentClient;
use super::error::ActionsError;
use super::{AgentService, Connector};
use crate::dot_files::DotFiles;
use crate::github::types::TenantCredential;
use actions_auth::jwt::signer::RsaSigner;
use actions_auth::oauth::HttpAuthenticator;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Builds agent service clients over a shared HTTP connection pool.
pub struct HttpConnector {
    http: reqwest::Client,
    authenticator: HttpAuthenticator,
}

impl HttpConnector {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            authenticator: HttpAuthenticator::new(http.clone()),
            http,
        }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn control(
        &self,
        credential: &TenantCredential,
    ) -> Result<Arc<dyn AgentService>, ActionsError> {
        Ok(Arc::new(AgentClient::new(
            self.http.clone(),
            &credential.url,
            &credential.token,
        )))
    }

    async fn bridge(&self, dot_files: &DotFiles) -> Result<Arc<dyn AgentService>, ActionsError> {
        let data = &dot_files.credentials.data;
        let signer = RsaSigner::try_from(&dot_files.rsa_params)
            .map_err(actions_auth::oauth::OAuthError::from)?;

        debug!(agent = %dot_files.runner.agent_name, "exchanging agent credentials");
        let token = self
            .authenticator
            .exchange(&data.authorization_url, &data.client_id, &signer)
            .await?;

        Ok(Arc::new(AgentClient::new(
            self.http.clone(),
            &dot_files.runner.server_url,
            &token.value,
        )))
    }
}
