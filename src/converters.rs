//! Pure builders for the objects derived from a `Runner`.
//!
//! Each builder is a deterministic function of its inputs: the reconcilers apply the
//! result as is, so building twice from the same runner yields the same object.
use crate::k8s::labels::Labels;
use crate::k8s::utils::controller_reference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

pub mod disruption;
pub mod job;
pub mod pod;
pub mod replica_set;
pub mod resources;
pub mod storage;

pub use disruption::to_pod_disruption_budget;
pub use job::to_job_resource;
pub use pod::{to_pod, PodConfig};
pub use replica_set::to_runner;
pub use storage::to_persistent_volume_claim;

/// Metadata of an object named after `runner_name` and controlled by `owner`.
fn owned_metadata<K>(owner: &K, runner_name: &str) -> ObjectMeta
where
    K: Resource<DynamicType = ()>,
{
    ObjectMeta {
        name: Some(runner_name.to_string()),
        namespace: owner.namespace(),
        labels: Some(Labels::new(runner_name).get()),
        owner_references: Some(vec![controller_reference(owner)]),
        ..Default::default()
    }
}
