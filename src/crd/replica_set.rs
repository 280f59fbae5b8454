use super::runner::RunnerSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Keeps `replicas` identical runners stamped out of `template`.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[kube(
    group = "inloco.com.br",
    version = "v1alpha1",
    kind = "RunnerReplicaSet",
    namespaced,
    shortname = "arrs",
    status = "RunnerReplicaSetStatus",
    scale = r#"{"specReplicasPath":".spec.replicas","statusReplicasPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Desired","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Current","type":"integer","jsonPath":".status.replicas"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RunnerReplicaSetSpec {
    pub replicas: i32,
    pub template: RunnerTemplate,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
pub struct RunnerTemplate {
    #[serde(default)]
    pub metadata: TemplateMetadata,
    pub spec: RunnerSpec,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
pub struct TemplateMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
pub struct RunnerReplicaSetStatus {
    pub replicas: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest() {
        let replica_set: RunnerReplicaSet = serde_yaml::from_str(
            r#"
apiVersion: inloco.com.br/v1alpha1
kind: RunnerReplicaSet
metadata:
  name: pool
  namespace: a
spec:
  replicas: 2
  template:
    metadata:
      labels:
        team: platform
    spec:
      repository:
        owner: o
        name: r
      labels: [gpu]
"#,
        )
        .unwrap();

        assert_eq!(replica_set.spec.replicas, 2);
        assert_eq!(replica_set.spec.template.metadata.labels["team"], "platform");
        assert_eq!(replica_set.spec.template.spec.labels, vec!["gpu"]);
        assert!(replica_set.status.is_none());
    }
}
