use super::error::ActionsError;
use super::types::{TaskAgentMessage, TaskAgentReference, TaskAgentSession};
use super::AgentService;
use crate::dot_files::DotFiles;
use actions_auth::session::{decrypt_message_body, unwrap_session_key};
use std::sync::Arc;
use tracing::{debug, warn};

pub const SESSION_OWNER: &str = "kube-actions";
pub const OS_DESCRIPTION: &str = "Linux";

/// An open message session of one agent. Message bodies come back decrypted.
pub struct AgentSession {
    service: Arc<dyn AgentService>,
    pool_id: u64,
    session_id: String,
    key: Vec<u8>,
}

impl AgentSession {
    pub async fn open(
        service: Arc<dyn AgentService>,
        dot_files: &DotFiles,
        agent_version: &str,
    ) -> Result<Self, ActionsError> {
        let pool_id = dot_files.runner.pool_id;
        let request = TaskAgentSession {
            owner_name: SESSION_OWNER.to_string(),
            agent: TaskAgentReference {
                id: dot_files.runner.agent_id,
                name: dot_files.runner.agent_name.clone(),
                version: agent_version.to_string(),
                os_description: Some(OS_DESCRIPTION.to_string()),
            },
            use_fips_encryption: dot_files.credentials.data.require_fips_cryptography,
            ..Default::default()
        };

        let session = service.create_session(pool_id, &request).await?;
        let session_id = session
            .session_id
            .clone()
            .ok_or(ActionsError::MissingField("session id"))?;
        debug!(%session_id, agent = %dot_files.runner.agent_name, "session opened");

        let mut opened = Self {
            service,
            pool_id,
            session_id,
            key: Vec::new(),
        };
        match Self::session_key(&session, dot_files) {
            Ok(key) => {
                opened.key = key;
                Ok(opened)
            }
            Err(err) => {
                opened.close().await;
                Err(err)
            }
        }
    }

    fn session_key(session: &TaskAgentSession, dot_files: &DotFiles) -> Result<Vec<u8>, ActionsError> {
        match &session.encryption_key {
            Some(key) if key.encrypted => Ok(unwrap_session_key(
                &key.value,
                &dot_files.rsa_params,
                session.use_fips_encryption,
            )?),
            Some(key) if !key.value.is_empty() => Ok(key.value.clone()),
            _ => Err(ActionsError::MissingField("session encryption key")),
        }
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    /// Long polls for the next message after `last_message_id`.
    pub async fn get_message(
        &self,
        last_message_id: Option<u64>,
    ) -> Result<Option<TaskAgentMessage>, ActionsError> {
        let Some(mut message) = self
            .service
            .get_message(self.pool_id, &self.session_id, last_message_id)
            .await?
        else {
            return Ok(None);
        };

        if let Some(iv) = message.iv.take().filter(|iv| !iv.is_empty()) {
            message.body = decrypt_message_body(&message.body, &iv, &self.key)?;
        }
        Ok(Some(message))
    }

    pub async fn delete_message(&self, message_id: u64) -> Result<(), ActionsError> {
        self.service
            .delete_message(self.pool_id, &self.session_id, message_id)
            .await
    }

    /// Deletes the session server side. Failures are only logged.
    pub async fn close(&self) {
        match self
            .service
            .delete_session(self.pool_id, &self.session_id)
            .await
        {
            Ok(()) => debug!(session_id = %self.session_id, "session closed"),
            Err(err) if err.is_not_found() => {
                debug!(session_id = %self.session_id, "session already gone")
            }
            Err(err) => warn!(session_id = %self.session_id, "closing session: {err}"),
        }
    }
}
