use std::collections::BTreeMap;

pub const MANAGED_BY_KEY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VAL: &str = "kube-actions";
pub const RUNNER_LABEL_KEY: &str = "kube-actions.inloco.com.br/actions-runner";
pub const REPLICA_SET_LABEL_KEY: &str = "kube-actions.inloco.com.br/actions-runner-replica-set";

/// Collection of labels put on every object derived from a runner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new(runner_name: &str) -> Self {
        Labels(BTreeMap::from([
            (MANAGED_BY_KEY.to_string(), MANAGED_BY_VAL.to_string()),
            (RUNNER_LABEL_KEY.to_string(), runner_name.to_string()),
        ]))
    }

    pub fn get(&self) -> BTreeMap<String, String> {
        self.0.clone()
    }
}

/// Labels matching the worker pods of a single runner, used by its disruption budget.
pub fn runner_selector(runner_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(RUNNER_LABEL_KEY.to_string(), runner_name.to_string())])
}

pub fn replica_set_selector(replica_set_name: &str) -> String {
    format!("{REPLICA_SET_LABEL_KEY}={replica_set_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        let labels = Labels::new("runner").get();
        assert_eq!(labels.get(MANAGED_BY_KEY).unwrap(), MANAGED_BY_VAL);
        assert_eq!(labels.get(RUNNER_LABEL_KEY).unwrap(), "runner");
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn test_replica_set_selector() {
        assert_eq!(
            replica_set_selector("pool"),
            "kube-actions.inloco.com.br/actions-runner-replica-set=pool"
        );
    }
}
