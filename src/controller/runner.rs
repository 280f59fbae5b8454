//! Drives a `Runner` toward its dependents: the identity ConfigMap and Secret, the
//! disruption budget and, while a job is assigned, the `JobResource`.
use super::context::Context;
use super::error::ReconcileError;
use crate::converters::{to_job_resource, to_pod_disruption_budget};
use crate::crd::job::JobResource;
use crate::crd::runner::Runner;
use crate::dot_files::{to_config_map, to_dot_files, to_secret};
use crate::k8s::utils::is_being_deleted;
use crate::policy::context::JobContext;
use crate::policy::{self, Verdict};
use crate::wire::job_request::JobRequest;
use crate::wire::Wire;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Error as FinalizerError, Event};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Holds the runner until its wire, and with it the agent, is destroyed.
pub const WIRE_FINALIZER: &str = "kube-actions.inloco.com.br/wire";

pub async fn reconcile(runner: Arc<Runner>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let namespace = runner.namespace().ok_or(ReconcileError::MissingNamespace)?;
    let api = ctx.client.namespaced::<Runner>(&namespace);

    finalizer(&api, WIRE_FINALIZER, runner, |event| async {
        match event {
            Event::Apply(runner) => apply(&runner, &ctx).await,
            Event::Cleanup(runner) => cleanup(&runner, &ctx).await,
        }
    })
    .await
    .map_err(|err| match err {
        FinalizerError::ApplyFailed(err) | FinalizerError::CleanupFailed(err) => err,
        other => ReconcileError::Finalizer(other.to_string()),
    })
}

#[instrument(skip_all, fields(runner = %runner.key()))]
async fn apply(runner: &Runner, ctx: &Context) -> Result<Action, ReconcileError> {
    let key = runner.key();
    let config_map = ctx.client.get::<ConfigMap>(&key.namespace, &key.name).await?;
    let secret = ctx.client.get::<Secret>(&key.namespace, &key.name).await?;
    let deleting = config_map
        .as_ref()
        .is_some_and(|config_map| is_being_deleted(&config_map.metadata))
        || secret
            .as_ref()
            .is_some_and(|secret| is_being_deleted(&secret.metadata));
    if deleting {
        debug!("identity is being deleted");
        return Ok(Action::await_change());
    }

    let dot_files = config_map
        .as_ref()
        .zip(secret.as_ref())
        .and_then(|(config_map, secret)| to_dot_files(config_map, secret));
    let wire = match ctx.wires.wire_for(runner, dot_files).await {
        Ok(wire) if wire.is_invalid() => {
            rotate_identity(runner, ctx).await?;
            return Err(ReconcileError::InvalidWire(key));
        }
        Ok(wire) => wire,
        Err(err) if err.is_unrecoverable() => {
            rotate_identity(runner, ctx).await?;
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };

    ctx.client.apply(&to_config_map(runner, wire.dot_files())).await?;
    ctx.client.apply(&to_secret(runner, wire.dot_files())).await?;

    match to_pod_disruption_budget(runner) {
        Some(budget) => {
            ctx.client.apply(&budget).await?;
        }
        None => {
            ctx.client
                .delete_if_exists::<PodDisruptionBudget>(&key.namespace, &key.name)
                .await?;
        }
    }

    reconcile_job(runner, &wire, ctx).await?;
    Ok(Action::await_change())
}

#[instrument(skip_all, fields(runner = %runner.key()))]
async fn cleanup(runner: &Runner, ctx: &Context) -> Result<Action, ReconcileError> {
    match ctx.wires.try_destroy(&runner.key()).await {
        Ok(destroyed) => debug!(destroyed, "runner deleted"),
        Err(err) => warn!("destroying the wire of a deleted runner: {err}"),
    }
    Ok(Action::await_change())
}

/// Drops the wire and the persisted identity, so the next pass registers a new agent.
async fn rotate_identity(runner: &Runner, ctx: &Context) -> Result<(), ReconcileError> {
    let key = runner.key();
    warn!("agent identity is no longer valid, rotating it");
    if let Err(err) = ctx.wires.try_destroy(&key).await {
        debug!("destroying the invalid wire: {err}");
    }
    ctx.client
        .delete_if_exists::<ConfigMap>(&key.namespace, &key.name)
        .await?;
    ctx.client
        .delete_if_exists::<Secret>(&key.namespace, &key.name)
        .await?;
    Ok(())
}

#[derive(Debug, PartialEq)]
enum JobAction {
    /// No job: materialise the pending request, or listen for one.
    Acquire,
    /// The job is over.
    Release,
    Wait,
}

fn job_action(job: Option<&JobResource>, cancelled: bool) -> JobAction {
    match job {
        None => JobAction::Acquire,
        Some(job) if is_being_deleted(&job.metadata) => JobAction::Wait,
        Some(job) if job.is_terminal() || cancelled => JobAction::Release,
        Some(_) => JobAction::Wait,
    }
}

async fn reconcile_job(
    runner: &Runner,
    wire: &Arc<Wire>,
    ctx: &Context,
) -> Result<(), ReconcileError> {
    let key = runner.key();
    let job = ctx
        .client
        .get::<JobResource>(&key.namespace, &key.name)
        .await?;
    let cancelled = wire.take_job_cancellation();

    match job_action(job.as_ref(), cancelled) {
        JobAction::Acquire => match wire.take_job_request().await {
            Some(request) => acquire(runner, wire, request, ctx).await?,
            None => {
                if wire.listen() {
                    debug!("listener started");
                }
            }
        },
        JobAction::Release => {
            if cancelled {
                info!("job cancelled by the service");
            }
            ctx.client
                .delete_if_exists::<JobResource>(&key.namespace, &key.name)
                .await?;
            ctx.metrics.job_done(&key.namespace, &key.name);
            info!("job released");
        }
        JobAction::Wait => {}
    }
    Ok(())
}

async fn acquire(
    runner: &Runner,
    wire: &Arc<Wire>,
    request: JobRequest,
    ctx: &Context,
) -> Result<(), ReconcileError> {
    let key = runner.key();
    let context = JobContext::flatten(&request.context_data);
    match policy::evaluate(&runner.spec.policy, &context) {
        Verdict::Allowed => {
            if let Err(err) = ctx.client.apply(&to_job_resource(runner, &request)).await {
                wire.restore_job_request(request);
                return Err(err.into());
            }
            ctx.metrics.job_started(&key.namespace, &key.name);
            info!(message_id = request.message_id, job = ?request.job_display_name, "job acquired");
        }
        Verdict::Blocked { rule, reason } => {
            info!(message_id = request.message_id, %rule, %reason, "job blocked by policy");
            wire.listen();
        }
    }
    Ok(())
}
