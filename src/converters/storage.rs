use super::owned_metadata;
use super::resources::claim_resources;
use crate::crd::job::JobResource;
use crate::crd::runner::Runner;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec};
use kube::ResourceExt;

const ACCESS_MODE: &str = "ReadWriteOnce";

/// Claim backing the work directory of the job, owned by the job resource. `None` when
/// the runner requests no storage.
pub fn to_persistent_volume_claim(
    runner: &Runner,
    job: &JobResource,
) -> Option<PersistentVolumeClaim> {
    let resources = claim_resources(runner.spec.resources.runner.as_ref())?;
    Some(PersistentVolumeClaim {
        metadata: owned_metadata(job, &runner.name_any()),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![ACCESS_MODE.to_string()]),
            resources: Some(resources),
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converters::job::tests::job_resource;
    use crate::crd::runner::tests::runner;
    use k8s_openapi::api::core::v1::ResourceRequirements;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    #[test]
    fn test_no_claim_without_storage() {
        let runner = runner("a", "r");
        assert!(to_persistent_volume_claim(&runner, &job_resource(&runner)).is_none());
    }

    #[test]
    fn test_claim_is_owned_by_the_job() {
        let mut runner = runner("a", "r");
        runner.spec.resources.runner = Some(ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("storage".to_string(), Quantity("10Gi".to_string())),
                ("cpu".to_string(), Quantity("1".to_string())),
            ])),
            ..Default::default()
        });
        let job = job_resource(&runner);

        let claim = to_persistent_volume_claim(&runner, &job).unwrap();
        assert_eq!(claim.metadata.name.as_deref(), Some("r"));
        assert_eq!(claim.metadata.namespace.as_deref(), Some("a"));
        let owner = &claim.metadata.owner_references.unwrap()[0];
        assert_eq!(owner.kind, "JobResource");
        assert_eq!(owner.controller, Some(true));

        let spec = claim.spec.unwrap();
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteOnce".to_string()]));
        let requests = spec.resources.unwrap().requests.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests["storage"], Quantity("10Gi".to_string()));
    }
}
