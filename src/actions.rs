//! Agent service facade: agent registration, message sessions and long polling.
use crate::dot_files::DotFiles;
use crate::github::types::TenantCredential;
use async_trait::async_trait;
use std::sync::Arc;

pub mod client;
pub mod connector;
pub mod error;
pub mod session;
pub mod types;

use error::ActionsError;
use types::{TaskAgent, TaskAgentMessage, TaskAgentSession};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentService: Send + Sync {
    async fn get_agent(&self, pool_id: u64, agent_id: u64) -> Result<TaskAgent, ActionsError>;

    async fn get_agents_by_name(
        &self,
        pool_id: u64,
        name: &str,
    ) -> Result<Vec<TaskAgent>, ActionsError>;

    async fn add_agent(&self, pool_id: u64, agent: &TaskAgent) -> Result<TaskAgent, ActionsError>;

    async fn replace_agent(&self, pool_id: u64, agent: &TaskAgent)
        -> Result<TaskAgent, ActionsError>;

    async fn delete_agent(&self, pool_id: u64, agent_id: u64) -> Result<(), ActionsError>;

    async fn create_session(
        &self,
        pool_id: u64,
        session: &TaskAgentSession,
    ) -> Result<TaskAgentSession, ActionsError>;

    async fn delete_session(&self, pool_id: u64, session_id: &str) -> Result<(), ActionsError>;

    /// Long poll. `None` when the poll timed out without a message.
    async fn get_message(
        &self,
        pool_id: u64,
        session_id: &str,
        last_message_id: Option<u64>,
    ) -> Result<Option<TaskAgentMessage>, ActionsError>;

    async fn delete_message(
        &self,
        pool_id: u64,
        session_id: &str,
        message_id: u64,
    ) -> Result<(), ActionsError>;
}

/// Builds authenticated agent service clients.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Client acting on the tenant with a registration or remove credential.
    async fn control(
        &self,
        credential: &TenantCredential,
    ) -> Result<Arc<dyn AgentService>, ActionsError>;

    /// Client acting as the agent itself, after an OAuth exchange of its identity.
    async fn bridge(&self, dot_files: &DotFiles) -> Result<Arc<dyn AgentService>, ActionsError>;
}
