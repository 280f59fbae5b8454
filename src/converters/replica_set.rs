use crate::crd::replica_set::RunnerReplicaSet;
use crate::crd::runner::{Runner, RunnerSpec};
use crate::k8s::labels::REPLICA_SET_LABEL_KEY;
use crate::k8s::utils::controller_reference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

/// New child runner stamped out of the template, named by the server from the replica set
/// name.
pub fn to_runner(replica_set: &RunnerReplicaSet) -> Runner {
    let name = replica_set.name_any();
    let template = &replica_set.spec.template;

    let mut labels = template.metadata.labels.clone();
    labels.insert(REPLICA_SET_LABEL_KEY.to_string(), name.clone());

    Runner {
        metadata: ObjectMeta {
            generate_name: Some(format!("{name}-")),
            namespace: replica_set.namespace(),
            labels: Some(labels),
            annotations: (!template.metadata.annotations.is_empty())
                .then(|| template.metadata.annotations.clone()),
            owner_references: Some(vec![controller_reference(replica_set)]),
            ..Default::default()
        },
        spec: template.spec.clone(),
    }
}

/// Desired state of an existing child: its identity with the template spec.
pub fn update_runner(replica_set: &RunnerReplicaSet, child: &Runner) -> Runner {
    let mut desired = to_runner(replica_set);
    desired.metadata.generate_name = None;
    desired.metadata.name = Some(child.name_any());
    desired
}

/// Whether the child can no longer be updated in place: its identity fields differ from
/// the template.
pub fn has_immutable_drift(template: &RunnerSpec, child: &RunnerSpec) -> bool {
    template.labels != child.labels || template.repository != child.repository
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crd::replica_set::{RunnerReplicaSetSpec, RunnerTemplate, TemplateMetadata};
    use crate::crd::runner::Repository;
    use std::collections::BTreeMap;

    pub(crate) fn replica_set(replicas: i32) -> RunnerReplicaSet {
        RunnerReplicaSet {
            metadata: ObjectMeta {
                name: Some("pool".to_string()),
                namespace: Some("a".to_string()),
                uid: Some("uid-pool".to_string()),
                ..Default::default()
            },
            spec: RunnerReplicaSetSpec {
                replicas,
                template: RunnerTemplate {
                    metadata: TemplateMetadata {
                        labels: BTreeMap::from([("team".to_string(), "ci".to_string())]),
                        annotations: BTreeMap::new(),
                    },
                    spec: RunnerSpec {
                        repository: Repository {
                            owner: "o".to_string(),
                            name: "r".to_string(),
                            api_endpoint: None,
                        },
                        labels: vec!["x".to_string()],
                        ..Default::default()
                    },
                },
            },
            status: None,
        }
    }

    #[test]
    fn test_to_runner() {
        let runner = to_runner(&replica_set(2));

        assert_eq!(runner.metadata.generate_name.as_deref(), Some("pool-"));
        assert!(runner.metadata.name.is_none());
        assert_eq!(runner.metadata.namespace.as_deref(), Some("a"));
        let labels = runner.metadata.labels.as_ref().unwrap();
        assert_eq!(labels[REPLICA_SET_LABEL_KEY], "pool");
        assert_eq!(labels["team"], "ci");
        assert!(runner.metadata.annotations.is_none());
        let owner = &runner.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "RunnerReplicaSet");
        assert_eq!(owner.uid, "uid-pool");
        assert_eq!(runner.spec.labels, vec!["x".to_string()]);
    }

    #[test]
    fn test_update_runner_keeps_the_child_name() {
        let mut child = to_runner(&replica_set(1));
        child.metadata.name = Some("pool-abcde".to_string());

        let desired = update_runner(&replica_set(1), &child);
        assert_eq!(desired.metadata.name.as_deref(), Some("pool-abcde"));
        assert!(desired.metadata.generate_name.is_none());
    }

    #[test]
    fn test_has_immutable_drift() {
        let template = replica_set(1).spec.template.spec;
        let mut child = template.clone();
        child.env_from = vec![Default::default()];
        assert!(!has_immutable_drift(&template, &child));

        child.labels = vec!["y".to_string()];
        assert!(has_immutable_drift(&template, &child));

        let mut child = template.clone();
        child.repository.name = "other".to_string();
        assert!(has_immutable_drift(&template, &child));
    }
}
