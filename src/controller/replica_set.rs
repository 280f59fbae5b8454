//! Keeps `spec.replicas` children of a `RunnerReplicaSet`, one step per pass: each
//! create or delete triggers a new pass through the watch on the owned runners.
use super::context::Context;
use super::error::ReconcileError;
use crate::converters::replica_set::{has_immutable_drift, update_runner};
use crate::converters::to_runner;
use crate::crd::job::JobResource;
use crate::crd::replica_set::{RunnerReplicaSet, RunnerReplicaSetStatus};
use crate::crd::runner::Runner;
use crate::k8s::labels::replica_set_selector;
use crate::k8s::utils::is_being_deleted;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[instrument(skip_all, fields(replica_set = %replica_set.name_any()))]
pub async fn reconcile(
    replica_set: Arc<RunnerReplicaSet>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    if is_being_deleted(&replica_set.metadata) {
        return Ok(Action::await_change());
    }
    let namespace = replica_set
        .namespace()
        .ok_or(ReconcileError::MissingNamespace)?;
    let name = replica_set.name_any();

    let children: Vec<Runner> = ctx
        .client
        .list::<Runner>(&namespace, &replica_set_selector(&name))
        .await?
        .into_iter()
        .filter(|child| !is_being_deleted(&child.metadata))
        .collect();
    let desired = usize::try_from(replica_set.spec.replicas).unwrap_or_default();

    let mut waiting = false;
    let current = match children.len().cmp(&desired) {
        Ordering::Less => {
            let created = ctx.client.create(&to_runner(&replica_set)).await?;
            info!(runner = %created.name_any(), "runner created");
            children.len() + 1
        }
        Ordering::Greater => {
            let surplus = pick_surplus(&ctx, &namespace, &children).await?;
            ctx.client
                .delete_if_exists::<Runner>(&namespace, &surplus)
                .await?;
            info!(runner = %surplus, "runner deleted");
            children.len() - 1
        }
        Ordering::Equal => {
            let converged = converge(&ctx, &replica_set, &children).await?;
            waiting = converged.waiting;
            children.len() - converged.deleted
        }
    };

    let replicas = i32::try_from(current).unwrap_or(i32::MAX);
    if replica_set.status.as_ref().map(|status| status.replicas) != Some(replicas) {
        ctx.client
            .apply_status::<RunnerReplicaSet, _>(
                &namespace,
                &name,
                &RunnerReplicaSetStatus { replicas },
            )
            .await?;
    }
    if waiting {
        return Ok(Action::requeue(ctx.requeue_after));
    }
    Ok(Action::await_change())
}

/// Name of the child to remove: an idle one when there is any, the newest otherwise.
async fn pick_surplus(
    ctx: &Context,
    namespace: &str,
    children: &[Runner],
) -> Result<String, ReconcileError> {
    for child in children {
        let name = child.name_any();
        if !is_busy(ctx, namespace, &name).await? {
            return Ok(name);
        }
        debug!(runner = %name, "runner is busy");
    }
    Ok(children
        .iter()
        .max_by_key(|child| child.creation_timestamp())
        .map(ResourceExt::name_any)
        .unwrap_or_default())
}

/// A runner is busy while its `JobResource` exists.
async fn is_busy(ctx: &Context, namespace: &str, name: &str) -> Result<bool, ReconcileError> {
    Ok(ctx
        .client
        .get::<JobResource>(namespace, name)
        .await?
        .is_some())
}

#[derive(Debug, Default, PartialEq)]
struct Converged {
    deleted: usize,
    /// Busy children still wait for replacement.
    waiting: bool,
}

/// Updates children whose spec drifted from the template, deleting idle ones that can not
/// be updated in place.
async fn converge(
    ctx: &Context,
    replica_set: &RunnerReplicaSet,
    children: &[Runner],
) -> Result<Converged, ReconcileError> {
    let template = &replica_set.spec.template;
    let mut converged = Converged::default();
    for child in children {
        let name = child.name_any();
        let namespace = child.namespace().unwrap_or_default();
        if has_immutable_drift(&template.spec, &child.spec) {
            if is_busy(ctx, &namespace, &name).await? {
                debug!(runner = %name, "drifted runner is busy, replacing it later");
                converged.waiting = true;
                continue;
            }
            info!(runner = %name, "runner drifted from an immutable template field, deleting it");
            if ctx
                .client
                .delete_if_exists::<Runner>(&namespace, &name)
                .await?
            {
                converged.deleted += 1;
            }
        } else if needs_update(replica_set, child) {
            info!(runner = %name, "updating runner from template");
            ctx.client.apply(&update_runner(replica_set, child)).await?;
        }
    }
    Ok(converged)
}

fn needs_update(replica_set: &RunnerReplicaSet, child: &Runner) -> bool {
    let template = &replica_set.spec.template;
    let contains = |current: &BTreeMap<String, String>, wanted: &BTreeMap<String, String>| {
        wanted
            .iter()
            .all(|(key, value)| current.get(key) == Some(value))
    };
    child.spec != template.spec
        || !contains(child.labels(), &template.metadata.labels)
        || !contains(child.annotations(), &template.metadata.annotations)
}
