use super::job_request::JobRequest;
use super::Wire;
use crate::actions::error::ActionsError;
use crate::actions::session::AgentSession;
use crate::actions::types::MessageType;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause after a message that does not advance the cursor, so a service replaying it can
/// not spin the loop.
const STALE_MESSAGE_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, PartialEq)]
enum ListenerExit {
    JobRequested,
    Refresh,
    Closed,
}

impl Wire {
    /// Starts the listener unless it is already running or the wire is done.
    /// Returns whether a listener was started.
    pub fn listen(self: &Arc<Self>) -> bool {
        if self.is_closed() || self.is_invalid() {
            return false;
        }
        if self.listening.swap(true, Ordering::SeqCst) {
            return false;
        }

        let wire = self.clone();
        tokio::spawn(async move {
            let exit = tokio::spawn(wire.clone().run_listener()).await;
            wire.close_session().await;

            match exit {
                Ok(Ok(ListenerExit::JobRequested)) => {
                    wire.listening.store(false, Ordering::SeqCst);
                    wire.emit();
                }
                Ok(Ok(ListenerExit::Closed)) => {
                    wire.listening.store(false, Ordering::SeqCst);
                }
                Ok(Ok(ListenerExit::Refresh)) => {
                    info!(runner = %wire.key, "agent refresh requested, rotating identity");
                    if let Err(err) = wire.delete_agent().await {
                        warn!(runner = %wire.key, "deleting refreshed agent: {err}");
                    }
                    wire.invalid.store(true, Ordering::SeqCst);
                    wire.listening.store(false, Ordering::SeqCst);
                    wire.emit();
                }
                Ok(Err(err)) => {
                    if err.is_unrecoverable() {
                        warn!(runner = %wire.key, "listener hit an unrecoverable error: {err}");
                        wire.invalid.store(true, Ordering::SeqCst);
                    } else {
                        warn!(runner = %wire.key, "listener failed: {err}");
                        wire.close();
                    }
                    wire.listening.store(false, Ordering::SeqCst);
                    wire.emit();
                }
                Err(join_err) => {
                    error!(runner = %wire.key, "listener panicked: {join_err}");
                    wire.close();
                    wire.listening.store(false, Ordering::SeqCst);
                    wire.emit();
                }
            }
        });
        true
    }

    async fn run_listener(self: Arc<Self>) -> Result<ListenerExit, ActionsError> {
        let session = Arc::new(
            AgentSession::open(
                self.bridge.clone(),
                &self.dot_files,
                &self.deps.settings.agent_version,
            )
            .await?,
        );
        *self.session.lock().await = Some(session.clone());
        debug!(runner = %self.key, session_id = session.id(), "listening");

        loop {
            let last_message_id = self.last_message_id();
            let message = tokio::select! {
                biased;
                _ = self.loop_close.cancelled() => return Ok(ListenerExit::Closed),
                message = session.get_message(last_message_id) => message?,
            };
            let Some(message) = message else {
                tokio::task::yield_now().await;
                continue;
            };

            if last_message_id.is_some_and(|last| message.message_id <= last) {
                warn!(runner = %self.key, message_id = message.message_id, "skipping stale message");
                tokio::select! {
                    _ = self.loop_close.cancelled() => return Ok(ListenerExit::Closed),
                    _ = tokio::time::sleep(STALE_MESSAGE_BACKOFF) => continue,
                }
            }
            self.last_message_id
                .store(message.message_id, Ordering::SeqCst);

            match message.kind() {
                MessageType::PipelineAgentJobRequest => {
                    info!(runner = %self.key, message_id = message.message_id, "job requested");
                    let request = JobRequest::from_message(message.message_id, &message.body);
                    if self.job_requests_tx.try_send(request).is_err() {
                        warn!(runner = %self.key, "a job request is already pending");
                    }
                    return Ok(ListenerExit::JobRequested);
                }
                MessageType::AgentRefresh => {
                    session.delete_message(message.message_id).await?;
                    return Ok(ListenerExit::Refresh);
                }
                MessageType::JobCancellation => {
                    info!(runner = %self.key, message_id = message.message_id, "job cancelled");
                    session.delete_message(message.message_id).await?;
                    self.job_cancelled.store(true, Ordering::SeqCst);
                    self.emit();
                }
                MessageType::JobMetadata | MessageType::Unknown => {
                    debug!(runner = %self.key, message_type = %message.message_type, "acknowledging message");
                    session.delete_message(message.message_id).await?;
                }
            }
        }
    }
}
