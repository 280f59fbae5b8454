//! Custom resources served under `inloco.com.br/v1alpha1`.
use kube::CustomResourceExt;

pub mod job;
pub mod replica_set;
pub mod runner;

pub const GROUP: &str = "inloco.com.br";
pub const VERSION: &str = "v1alpha1";

/// Definitions of every custom resource, in installation order.
pub fn definitions() -> Vec<k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition>
{
    vec![
        runner::Runner::crd(),
        replica_set::RunnerReplicaSet::crd(),
        job::JobResource::crd(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definitions_share_group_and_version() {
        for crd in definitions() {
            assert_eq!(crd.spec.group, GROUP);
            assert_eq!(crd.spec.versions.len(), 1);
            assert_eq!(crd.spec.versions[0].name, VERSION);
            assert_eq!(crd.spec.scope, "Namespaced");
        }
    }
}
