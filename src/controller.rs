//! The three controllers: Runner, JobResource and RunnerReplicaSet.
use crate::crd::job::JobResource;
use crate::crd::replica_set::RunnerReplicaSet;
use crate::crd::runner::{Runner, RunnerKey};
use crate::event::channel::EventConsumer;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::runtime::controller::{Action, Config as ControllerConfig, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Api, Resource, ResourceExt};
use std::fmt::Debug;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub mod context;
pub mod error;
pub mod job;
pub mod replica_set;
pub mod runner;

pub use context::Context;
use error::ReconcileError;

/// Requeues a failed object after the configured backoff.
pub fn error_policy<K>(object: Arc<K>, err: &ReconcileError, ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    error!(
        error_msg = %err,
        kind = %K::kind(&()),
        name = %object.name_any(),
        unrecoverable = err.is_unrecoverable(),
        "reconcile failed"
    );
    Action::requeue(ctx.requeue_after)
}

fn wire_triggers(events: EventConsumer<RunnerKey>) -> impl Stream<Item = ObjectRef<Runner>> {
    events
        .into_stream()
        .map(|key| ObjectRef::new(&key.name).within(&key.namespace))
}

async fn drain<K, E>(kind: &'static str, results: impl Stream<Item = Result<(ObjectRef<K>, Action), E>>)
where
    K: Resource<DynamicType = ()>,
    E: Debug,
{
    results
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(%kind, name = %object.name, "reconciled"),
                Err(err) => debug!(%kind, "controller: {err:?}"),
            }
        })
        .await
}

/// Runs every controller until `shutdown` is cancelled.
pub async fn run(
    ctx: Arc<Context>,
    wire_events: EventConsumer<RunnerKey>,
    concurrency: u16,
    shutdown: CancellationToken,
) {
    let client = ctx.client.client();
    let config = ControllerConfig::default().concurrency(concurrency);
    let watched = watcher::Config::default();
    info!(concurrency, "starting controllers");

    let runners = Controller::new(Api::<Runner>::all(client.clone()), watched.clone())
        .with_config(config.clone())
        .owns(Api::<ConfigMap>::all(client.clone()), watched.clone())
        .owns(Api::<Secret>::all(client.clone()), watched.clone())
        .owns(Api::<PodDisruptionBudget>::all(client.clone()), watched.clone())
        .owns(Api::<JobResource>::all(client.clone()), watched.clone())
        .reconcile_on(wire_triggers(wire_events))
        .graceful_shutdown_on(shutdown.clone().cancelled_owned())
        .run(runner::reconcile, error_policy, ctx.clone());

    let jobs = Controller::new(Api::<JobResource>::all(client.clone()), watched.clone())
        .with_config(config.clone())
        .owns(Api::<PersistentVolumeClaim>::all(client.clone()), watched.clone())
        .owns(Api::<Pod>::all(client.clone()), watched.clone())
        .graceful_shutdown_on(shutdown.clone().cancelled_owned())
        .run(job::reconcile, error_policy, ctx.clone());

    let replica_sets = Controller::new(Api::<RunnerReplicaSet>::all(client.clone()), watched.clone())
        .with_config(config)
        .owns(Api::<Runner>::all(client), watched)
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(replica_set::reconcile, error_policy, ctx);

    tokio::join!(
        drain("Runner", runners),
        drain("JobResource", jobs),
        drain("RunnerReplicaSet", replica_sets),
    );
    info!("controllers stopped");
}
