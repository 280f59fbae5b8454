//! The live link between a `Runner` and the agent service.
//!
//! A [Wire] holds the runner identity ([DotFiles]), registers it as an agent, and runs
//! a listener task that long polls for messages. The listener stops as soon as a job
//! request arrives, leaving the request in a single slot channel for the reconciler,
//! and is restarted by the reconciler once the job is gone.
use crate::actions::error::ActionsError;
use crate::actions::session::{AgentSession, OS_DESCRIPTION};
use crate::actions::types::{AgentLabel, TaskAgent, TaskAgentAuthorization, TaskAgentPublicKey};
use crate::actions::{AgentService, Connector};
use crate::crd::runner::{Repository, Runner, RunnerKey};
use crate::dot_files::{CredentialData, DotFiles};
use crate::event::channel::EventPublisher;
use crate::github::types::RunnerEvent;
use crate::github::CodeHost;
use crate::k8s::utils::shorten;
use actions_auth::RsaParameters;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod collection;
pub mod error;
pub mod job_request;
mod listener;

use error::WireError;
use job_request::JobRequest;

pub const MAX_AGENT_NAME_LEN: usize = 64;
const NO_MESSAGE: u64 = 0;

/// Agent wide settings shared by every wire.
#[derive(Debug, Clone, PartialEq)]
pub struct WireSettings {
    /// Version of the agent binary shipped in the runner image.
    pub agent_version: String,
    /// Kubernetes architecture of the worker nodes.
    pub arch: String,
}

impl WireSettings {
    pub fn agent_labels(&self, user_labels: &[String]) -> Vec<AgentLabel> {
        let mut labels = vec![
            AgentLabel::system("self-hosted"),
            AgentLabel::system(OS_DESCRIPTION),
            AgentLabel::system(arch_label(&self.arch)),
        ];
        labels.extend(user_labels.iter().map(AgentLabel::user));
        labels
    }
}

fn arch_label(arch: &str) -> &str {
    match arch {
        "amd64" | "x64" => "X64",
        "arm64" => "ARM64",
        "arm" => "ARM",
        other => other,
    }
}

pub struct WireDependencies {
    pub code_host: Arc<dyn CodeHost>,
    pub connector: Arc<dyn Connector>,
    pub settings: WireSettings,
}

pub struct Wire {
    key: RunnerKey,
    repository: Repository,
    dot_files: DotFiles,
    deps: Arc<WireDependencies>,
    bridge: Arc<dyn AgentService>,
    job_requests_tx: mpsc::Sender<JobRequest>,
    job_requests_rx: Mutex<mpsc::Receiver<JobRequest>>,
    loop_close: CancellationToken,
    invalid: AtomicBool,
    listening: AtomicBool,
    job_cancelled: AtomicBool,
    last_message_id: AtomicU64,
    session: Mutex<Option<Arc<AgentSession>>>,
    events: EventPublisher<RunnerKey>,
}

impl Wire {
    /// Loads or registers the runner identity, then authenticates as the agent.
    pub async fn init(
        runner: &Runner,
        dot_files: Option<DotFiles>,
        deps: Arc<WireDependencies>,
        events: EventPublisher<RunnerKey>,
    ) -> Result<Self, WireError> {
        let key = runner.key();
        let dot_files = match dot_files {
            Some(dot_files) => dot_files,
            None => register(runner, &deps).await?,
        };
        let bridge = deps.connector.bridge(&dot_files).await?;

        let (job_requests_tx, job_requests_rx) = mpsc::channel(1);
        info!(runner = %key, agent_id = dot_files.runner.agent_id, "wire initialised");
        Ok(Self {
            key,
            repository: runner.spec.repository.clone(),
            dot_files,
            deps,
            bridge,
            job_requests_tx,
            job_requests_rx: Mutex::new(job_requests_rx),
            loop_close: CancellationToken::new(),
            invalid: AtomicBool::new(false),
            listening: AtomicBool::new(false),
            job_cancelled: AtomicBool::new(false),
            last_message_id: AtomicU64::new(NO_MESSAGE),
            session: Mutex::new(None),
            events,
        })
    }

    pub fn key(&self) -> &RunnerKey {
        &self.key
    }

    pub fn dot_files(&self) -> &DotFiles {
        &self.dot_files
    }

    pub fn is_closed(&self) -> bool {
        self.loop_close.is_cancelled()
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Stops the listener. A closed wire is replaced on the next reconcile.
    pub fn close(&self) {
        self.loop_close.cancel();
    }

    /// Consumes the pending job request, if any.
    pub async fn take_job_request(&self) -> Option<JobRequest> {
        self.job_requests_rx.lock().await.try_recv().ok()
    }

    /// Puts back a request the reconciler could not materialise.
    pub fn restore_job_request(&self, request: JobRequest) {
        if self.job_requests_tx.try_send(request).is_err() {
            warn!(runner = %self.key, "a job request is already pending");
        }
    }

    /// Consumes the cancellation raised by the service for the current job.
    pub fn take_job_cancellation(&self) -> bool {
        self.job_cancelled.swap(false, Ordering::SeqCst)
    }

    fn last_message_id(&self) -> Option<u64> {
        match self.last_message_id.load(Ordering::SeqCst) {
            NO_MESSAGE => None,
            id => Some(id),
        }
    }

    fn emit(&self) {
        if let Err(err) = self.events.publish(self.key.clone()) {
            debug!(runner = %self.key, "dropping wire event: {err}");
        }
    }

    async fn close_session(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.close().await;
        }
    }

    /// Unregisters the agent with a `remove` credential.
    async fn delete_agent(&self) -> Result<(), WireError> {
        let credential = self
            .deps
            .code_host
            .tenant_credential(RunnerEvent::Remove, &self.repository)
            .await?;
        let control = self.deps.connector.control(&credential).await?;
        match control
            .delete_agent(self.dot_files.runner.pool_id, self.dot_files.runner.agent_id)
            .await
        {
            Err(err) if err.is_not_found() => {
                debug!(runner = %self.key, "agent already deleted");
                Ok(())
            }
            result => Ok(result?),
        }
    }

    /// Stops listening, deletes the agent and closes any open session.
    pub async fn destroy(&self) -> Result<(), WireError> {
        info!(runner = %self.key, "destroying wire");
        self.close();
        let result = self.delete_agent().await;
        self.close_session().await;
        result
    }
}

async fn register(runner: &Runner, deps: &WireDependencies) -> Result<DotFiles, WireError> {
    let key = runner.key();
    let repository = &runner.spec.repository;
    let rsa_params = tokio::task::spawn_blocking(RsaParameters::generate)
        .await
        .map_err(|err| WireError::KeyGeneration(err.to_string()))??;
    let agent_name = shorten(
        &format!("KA {} {}", key.namespace, key.name),
        MAX_AGENT_NAME_LEN,
    )
    .to_string();
    let mut dot_files = DotFiles::new(agent_name, rsa_params);

    let found = deps.code_host.repository(repository).await?;
    let credential = deps
        .code_host
        .tenant_credential(RunnerEvent::Register, repository)
        .await?;
    let control = deps.connector.control(&credential).await?;
    let agent = register_agent(
        control.as_ref(),
        &dot_files,
        deps.settings.agent_labels(&runner.spec.labels),
        &deps.settings.agent_version,
    )
    .await?;

    let authorization = agent.authorization.clone().unwrap_or_default();
    let authorization_url = authorization.authorization_url.unwrap_or_default();
    dot_files.runner.agent_id = agent.id.ok_or(ActionsError::MissingField("agent id"))?;
    dot_files.runner.server_url = credential.url;
    dot_files.runner.git_hub_url = found.html_url;
    dot_files.credentials.data = CredentialData {
        client_id: authorization.client_id.unwrap_or_default(),
        oauth_endpoint_url: authorization_url.clone(),
        authorization_url,
        require_fips_cryptography: agent.requires_fips(),
    };
    info!(runner = %key, agent_id = dot_files.runner.agent_id, "agent registered");
    Ok(dot_files)
}

/// Adds the agent, or replaces the one already registered under its id or name.
pub async fn register_agent(
    control: &dyn AgentService,
    dot_files: &DotFiles,
    labels: Vec<AgentLabel>,
    agent_version: &str,
) -> Result<TaskAgent, WireError> {
    let pool_id = dot_files.runner.pool_id;
    let name = &dot_files.runner.agent_name;
    let mut agent = TaskAgent {
        name: name.clone(),
        version: agent_version.to_string(),
        os_description: Some(OS_DESCRIPTION.to_string()),
        labels,
        max_parallelism: Some(1),
        ephemeral: true,
        disable_update: true,
        authorization: Some(TaskAgentAuthorization {
            public_key: Some(TaskAgentPublicKey {
                exponent: dot_files.rsa_params.exponent.clone(),
                modulus: dot_files.rsa_params.modulus.clone(),
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut existing = None;
    if dot_files.is_registered() {
        match control.get_agent(pool_id, dot_files.runner.agent_id).await {
            Ok(found) => existing = Some(found),
            Err(err) => debug!(%name, "agent lookup by id failed: {err}"),
        }
    }
    if existing.is_none() {
        let mut found = control.get_agents_by_name(pool_id, name).await?;
        existing = match found.len() {
            0 => None,
            1 => found.pop(),
            count => {
                return Err(WireError::AmbiguousAgent {
                    name: name.clone(),
                    count,
                })
            }
        };
    }

    Ok(match existing {
        Some(existing) => {
            debug!(%name, "replacing agent");
            agent.id = existing.id;
            agent.properties = existing.properties;
            control.replace_agent(pool_id, &agent).await?
        }
        None => {
            debug!(%name, "adding agent");
            control.add_agent(pool_id, &agent).await?
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::actions::types::TaskAgentAuthorization;
    use crate::actions::{MockAgentService, MockConnector};
    use crate::crd::runner::tests::runner;
    use crate::dot_files::tests::dot_files;
    use crate::event::channel::pub_sub;
    use crate::github::types::{Owner, Repository as GitHubRepository, TenantCredential};
    use crate::github::MockCodeHost;
    use assert_matches::assert_matches;
    use mockall::predicate::eq;

    pub(crate) fn settings() -> WireSettings {
        WireSettings {
            agent_version: "2.320.0".to_string(),
            arch: "amd64".to_string(),
        }
    }

    pub(crate) fn github_repository() -> GitHubRepository {
        GitHubRepository {
            id: 1,
            name: "r".to_string(),
            full_name: "o/r".to_string(),
            owner: Owner {
                login: "o".to_string(),
            },
            private: false,
            visibility: None,
            html_url: "https://github.com/o/r".to_string(),
        }
    }

    pub(crate) fn credential(event: RunnerEvent) -> TenantCredential {
        TenantCredential {
            url: "https://pipelines.example/tenant".to_string(),
            token: format!("{event}-token"),
            token_schema: "OAuthAccessToken".to_string(),
        }
    }

    pub(crate) fn registered(agent: &TaskAgent) -> TaskAgent {
        TaskAgent {
            id: Some(42),
            authorization: Some(TaskAgentAuthorization {
                authorization_url: Some("https://token.example/oauth2/token".to_string()),
                client_id: Some("client".to_string()),
                public_key: None,
            }),
            ..agent.clone()
        }
        .with_fips_property(true)
    }

    fn connector_with_bridge() -> MockConnector {
        let mut connector = MockConnector::new();
        connector
            .expect_bridge()
            .returning(|_| Ok(Arc::new(MockAgentService::new())));
        connector
    }

    #[tokio::test]
    async fn test_init_registers_a_new_agent() {
        let mut code_host = MockCodeHost::new();
        code_host
            .expect_repository()
            .returning(|_| Ok(github_repository()));
        code_host
            .expect_tenant_credential()
            .with(eq(RunnerEvent::Register), mockall::predicate::always())
            .returning(|event, _| Ok(credential(event)));

        let mut control = MockAgentService::new();
        control
            .expect_get_agents_by_name()
            .with(eq(1), eq("KA a r"))
            .returning(|_, _| Ok(vec![]));
        control
            .expect_add_agent()
            .withf(|pool_id, agent| {
                *pool_id == 1
                    && agent.name == "KA a r"
                    && agent.labels.iter().map(|l| l.name.as_str()).collect::<Vec<_>>()
                        == ["self-hosted", "Linux", "X64", "gpu"]
                    && agent
                        .authorization
                        .as_ref()
                        .and_then(|auth| auth.public_key.as_ref())
                        .is_some_and(|key| key.modulus.len() == 256)
            })
            .returning(|_, agent| Ok(registered(agent)));
        let control: Arc<dyn AgentService> = Arc::new(control);

        let mut connector = connector_with_bridge();
        connector
            .expect_control()
            .returning(move |_| Ok(control.clone()));

        let mut runner = runner("a", "r");
        runner.spec.labels = vec!["gpu".to_string()];
        let deps = Arc::new(WireDependencies {
            code_host: Arc::new(code_host),
            connector: Arc::new(connector),
            settings: settings(),
        });
        let (events, _consumer) = pub_sub();

        let wire = Wire::init(&runner, None, deps, events).await.unwrap();
        let dot_files = wire.dot_files();

        assert_eq!(dot_files.runner.agent_name, "KA a r");
        assert_eq!(dot_files.runner.agent_id, 42);
        assert_eq!(dot_files.runner.pool_id, 1);
        assert_eq!(dot_files.runner.pool_name, "Default");
        assert_eq!(dot_files.runner.work_folder, "_work");
        assert_eq!(dot_files.runner.server_url, "https://pipelines.example/tenant");
        assert_eq!(dot_files.runner.git_hub_url, "https://github.com/o/r");
        assert_eq!(dot_files.credentials.scheme, "OAuth");
        assert_eq!(dot_files.credentials.data.client_id, "client");
        assert!(dot_files.credentials.data.require_fips_cryptography);
        assert!(!wire.is_closed());
        assert!(!wire.is_invalid());
        assert!(!wire.is_listening());
    }

    #[tokio::test]
    async fn test_init_with_existing_identity_only_authenticates() {
        let deps = Arc::new(WireDependencies {
            code_host: Arc::new(MockCodeHost::new()),
            connector: Arc::new(connector_with_bridge()),
            settings: settings(),
        });
        let (events, _consumer) = pub_sub();

        let wire = Wire::init(&runner("a", "r"), Some(dot_files()), deps, events)
            .await
            .unwrap();
        assert_eq!(wire.dot_files(), &dot_files());
    }

    #[tokio::test]
    async fn test_init_bridge_failure_is_reported() {
        let mut connector = MockConnector::new();
        connector.expect_bridge().returning(|_| {
            Err(ActionsError::OAuth(
                actions_auth::oauth::OAuthError::InvalidClient("gone".to_string()),
            ))
        });
        let deps = Arc::new(WireDependencies {
            code_host: Arc::new(MockCodeHost::new()),
            connector: Arc::new(connector),
            settings: settings(),
        });
        let (events, _consumer) = pub_sub();

        let err = Wire::init(&runner("a", "r"), Some(dot_files()), deps, events)
            .await
            .err()
            .unwrap();
        assert!(err.is_unrecoverable());
    }

    #[tokio::test]
    async fn test_register_agent_replaces_by_id() {
        let mut control = MockAgentService::new();
        control
            .expect_get_agent()
            .with(eq(1), eq(42))
            .returning(|_, _| {
                Ok(TaskAgent {
                    id: Some(42),
                    name: "KA a r".to_string(),
                    ..Default::default()
                }
                .with_fips_property(false))
            });
        control
            .expect_replace_agent()
            .withf(|_, agent| agent.id == Some(42) && agent.properties.is_some())
            .returning(|_, agent| Ok(agent.clone()));

        let agent = register_agent(&control, &dot_files(), vec![], "2.320.0")
            .await
            .unwrap();
        assert_eq!(agent.id, Some(42));
    }

    #[tokio::test]
    async fn test_register_agent_falls_back_to_name() {
        let mut control = MockAgentService::new();
        control.expect_get_agent().returning(|_, _| {
            Err(ActionsError::AgentNotFound("42".to_string()))
        });
        control.expect_get_agents_by_name().returning(|_, name| {
            Ok(vec![TaskAgent {
                id: Some(7),
                name: name.to_string(),
                ..Default::default()
            }])
        });
        control
            .expect_replace_agent()
            .withf(|_, agent| agent.id == Some(7))
            .returning(|_, agent| Ok(agent.clone()));

        let agent = register_agent(&control, &dot_files(), vec![], "2.320.0")
            .await
            .unwrap();
        assert_eq!(agent.id, Some(7));
    }

    #[tokio::test]
    async fn test_register_agent_ambiguous_name() {
        let mut fresh = dot_files();
        fresh.runner.agent_id = 0;
        let mut control = MockAgentService::new();
        control
            .expect_get_agents_by_name()
            .returning(|_, _| Ok(vec![TaskAgent::default(), TaskAgent::default()]));

        let err = register_agent(&control, &fresh, vec![], "2.320.0")
            .await
            .unwrap_err();
        assert_matches!(err, WireError::AmbiguousAgent { count: 2, .. });
    }

    #[tokio::test]
    async fn test_destroy_deletes_the_agent_with_a_remove_credential() {
        let mut code_host = MockCodeHost::new();
        code_host
            .expect_tenant_credential()
            .with(eq(RunnerEvent::Remove), mockall::predicate::always())
            .times(1)
            .returning(|event, _| Ok(credential(event)));
        let mut control = MockAgentService::new();
        control
            .expect_delete_agent()
            .with(eq(1), eq(42))
            .times(1)
            .returning(|_, _| Err(ActionsError::AgentNotFound("42".to_string())));
        let control: Arc<dyn AgentService> = Arc::new(control);
        let mut connector = connector_with_bridge();
        connector
            .expect_control()
            .withf(|credential| credential.token == "remove-token")
            .returning(move |_| Ok(control.clone()));

        let deps = Arc::new(WireDependencies {
            code_host: Arc::new(code_host),
            connector: Arc::new(connector),
            settings: settings(),
        });
        let (events, _consumer) = pub_sub();
        let wire = Wire::init(&runner("a", "r"), Some(dot_files()), deps, events)
            .await
            .unwrap();

        wire.destroy().await.unwrap();
        assert!(wire.is_closed());
    }

    #[test]
    fn test_agent_labels() {
        let settings = WireSettings {
            arch: "arm64".to_string(),
            ..settings()
        };
        let labels = settings.agent_labels(&["gpu".to_string()]);
        assert_eq!(labels[2], AgentLabel::system("ARM64"));
        assert_eq!(labels[3], AgentLabel::user("gpu"));
    }

    #[test]
    fn test_long_agent_names_are_shortened() {
        let name = format!("KA {} {}", "n".repeat(40), "r".repeat(40));
        assert_eq!(shorten(&name, MAX_AGENT_NAME_LEN).len(), MAX_AGENT_NAME_LEN);
    }
}
