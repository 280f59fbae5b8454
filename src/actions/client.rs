use super::error::{ActionsError, AGENT_NOT_FOUND_TYPE_KEY, SESSION_CONFLICT_TYPE_KEY};
use super::types::{ListResponse, ServiceError, TaskAgent, TaskAgentMessage, TaskAgentSession};
use super::AgentService;
use async_trait::async_trait;
use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::trace;

pub const API_VERSION: &str = "6.0-preview";
const DISTRIBUTED_TASK: &str = "_apis/distributedtask/pools";

/// REST client for one agent service tenant, authenticated with a bearer token.
#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
    authorization: String,
}

impl AgentClient {
    pub fn new(http: reqwest::Client, base_url: &str, token: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            authorization: format!("Bearer {token}"),
        }
    }

    fn request(&self, method: Method, pool_id: u64, path: &str) -> RequestBuilder {
        let url = format!("{}/{DISTRIBUTED_TASK}/{pool_id}/{path}", self.base_url);
        trace!(%method, %url, "agent service request");
        self.http
            .request(method, url)
            .query(&[("api-version", API_VERSION)])
            .header(header::AUTHORIZATION, &self.authorization)
            .header(header::ACCEPT, "application/json")
    }

    async fn check(response: Response) -> Result<Response, ActionsError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_default();
        let error = serde_json::from_str::<ServiceError>(&body).ok();
        Err(match error {
            Some(error) if error.type_key == AGENT_NOT_FOUND_TYPE_KEY => {
                ActionsError::AgentNotFound(error.message)
            }
            Some(error) if error.type_key == SESSION_CONFLICT_TYPE_KEY => {
                ActionsError::SessionConflict(error.message)
            }
            Some(error) => ActionsError::Status {
                status: status.to_string(),
                url,
                message: error.message,
            },
            None => ActionsError::Status {
                status: status.to_string(),
                url,
                message: body,
            },
        })
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ActionsError> {
        let response = Self::check(request.send().await?).await?;
        Ok(serde_json::from_slice(&response.bytes().await?)?)
    }

    async fn send_empty(request: RequestBuilder) -> Result<(), ActionsError> {
        Self::check(request.send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl AgentService for AgentClient {
    async fn get_agent(&self, pool_id: u64, agent_id: u64) -> Result<TaskAgent, ActionsError> {
        Self::send(self.request(Method::GET, pool_id, &format!("agents/{agent_id}"))).await
    }

    async fn get_agents_by_name(
        &self,
        pool_id: u64,
        name: &str,
    ) -> Result<Vec<TaskAgent>, ActionsError> {
        let agents: ListResponse<TaskAgent> = Self::send(
            self.request(Method::GET, pool_id, "agents")
                .query(&[("agentName", name)]),
        )
        .await?;
        Ok(agents.value)
    }

    async fn add_agent(&self, pool_id: u64, agent: &TaskAgent) -> Result<TaskAgent, ActionsError> {
        Self::send(self.request(Method::POST, pool_id, "agents").json(agent)).await
    }

    async fn replace_agent(
        &self,
        pool_id: u64,
        agent: &TaskAgent,
    ) -> Result<TaskAgent, ActionsError> {
        let agent_id = agent.id.ok_or(ActionsError::MissingField("agent id"))?;
        Self::send(
            self.request(Method::PUT, pool_id, &format!("agents/{agent_id}"))
                .json(agent),
        )
        .await
    }

    async fn delete_agent(&self, pool_id: u64, agent_id: u64) -> Result<(), ActionsError> {
        Self::send_empty(self.request(Method::DELETE, pool_id, &format!("agents/{agent_id}")))
            .await
    }

    async fn create_session(
        &self,
        pool_id: u64,
        session: &TaskAgentSession,
    ) -> Result<TaskAgentSession, ActionsError> {
        Self::send(self.request(Method::POST, pool_id, "sessions").json(session)).await
    }

    async fn delete_session(&self, pool_id: u64, session_id: &str) -> Result<(), ActionsError> {
        Self::send_empty(self.request(
            Method::DELETE,
            pool_id,
            &format!("sessions/{session_id}"),
        ))
        .await
    }

    async fn get_message(
        &self,
        pool_id: u64,
        session_id: &str,
        last_message_id: Option<u64>,
    ) -> Result<Option<TaskAgentMessage>, ActionsError> {
        let mut request = self
            .request(Method::GET, pool_id, "messages")
            .query(&[("sessionId", session_id)]);
        if let Some(last_message_id) = last_message_id {
            request = request.query(&[("lastMessageId", last_message_id)]);
        }

        let response = Self::check(request.send().await?).await?;
        if matches!(
            response.status(),
            StatusCode::ACCEPTED | StatusCode::NO_CONTENT
        ) {
            return Ok(None);
        }
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&body)?))
    }

    async fn delete_message(
        &self,
        pool_id: u64,
        session_id: &str,
        message_id: u64,
    ) -> Result<(), ActionsError> {
        Self::send_empty(
            self.request(Method::DELETE, pool_id, &format!("messages/{message_id}"))
                .query(&[("sessionId", session_id)]),
        )
        .await
    }
}
