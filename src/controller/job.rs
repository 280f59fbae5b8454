//! Drives a `JobResource` toward its claim and worker pod, mirroring their phases on its
//! status. The Runner controller watches the status for the terminal phases.
use super::context::Context;
use super::error::ReconcileError;
use crate::converters::{to_persistent_volume_claim, to_pod};
use crate::crd::job::{ClaimPhase, JobResource, JobResourceStatus, PodPhase};
use crate::crd::runner::Runner;
use crate::k8s::utils::is_being_deleted;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[instrument(skip_all, fields(job = %job.name_any()))]
pub async fn reconcile(job: Arc<JobResource>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    if is_being_deleted(&job.metadata) {
        return Ok(Action::await_change());
    }
    let namespace = job.namespace().ok_or(ReconcileError::MissingNamespace)?;
    let name = job.name_any();
    if let Some(status) = job.status.as_ref().filter(|status| status.is_terminal()) {
        // terminal phases are final: only tear down, never recreate
        return finish(&ctx, &namespace, &name, status).await;
    }
    let Some(runner) = ctx.client.get::<Runner>(&namespace, &job.spec.runner).await? else {
        debug!("runner is gone, waiting for garbage collection");
        return Ok(Action::await_change());
    };
    let mut status = job.status.clone().unwrap_or_default();

    if let Some(claim) = to_persistent_volume_claim(&runner, &job) {
        let claim = match ctx.client.get::<PersistentVolumeClaim>(&namespace, &name).await? {
            Some(current) => current,
            None => ctx.client.apply(&claim).await?,
        };
        let phase = ClaimPhase::from_status(
            claim
                .status
                .as_ref()
                .and_then(|status| status.phase.as_deref()),
        );
        if status.persistent_volume_claim_phase != Some(phase) {
            status.persistent_volume_claim_phase = Some(phase);
            update_status(&ctx, &namespace, &name, &status).await?;
            return Ok(Action::await_change());
        }
    }

    let pod = match ctx.client.get::<Pod>(&namespace, &name).await? {
        Some(current) => current,
        None => {
            info!("creating worker pod");
            ctx.client.apply(&to_pod(&runner, &job, &ctx.pod)).await?
        }
    };
    let phase = PodPhase::from_status(pod.status.as_ref().and_then(|status| status.phase.as_deref()));
    if status.pod_phase != Some(phase) {
        status.pod_phase = Some(phase);
        update_status(&ctx, &namespace, &name, &status).await?;
    }
    if status.is_terminal() {
        return finish(&ctx, &namespace, &name, &status).await;
    }
    Ok(Action::await_change())
}

/// Deletes whatever a terminal phase left behind. The Runner controller releases the job.
async fn finish(
    ctx: &Context,
    namespace: &str,
    name: &str,
    status: &JobResourceStatus,
) -> Result<Action, ReconcileError> {
    if status.persistent_volume_claim_phase == Some(ClaimPhase::Lost) {
        info!("claim lost");
        ctx.client
            .delete_if_exists::<PersistentVolumeClaim>(namespace, name)
            .await?;
    }
    if status.pod_phase == Some(PodPhase::Unknown) {
        info!("worker pod in unknown phase");
        ctx.client.delete_if_exists::<Pod>(namespace, name).await?;
    }
    Ok(Action::await_change())
}

async fn update_status(
    ctx: &Context,
    namespace: &str,
    name: &str,
    status: &JobResourceStatus,
) -> Result<(), ReconcileError> {
    debug!(claim = ?status.persistent_volume_claim_phase, pod = ?status.pod_phase, "updating status");
    ctx.client
        .apply_status::<JobResource, _>(namespace, name, status)
        .await?;
    Ok(())
}
