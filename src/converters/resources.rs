use k8s_openapi::api::core::v1::{ResourceRequirements, VolumeResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

pub const STORAGE: &str = "storage";
/// Keys meaningful for a container.
pub const CONTAINER_KEYS: [&str; 3] = ["cpu", "memory", "ephemeral-storage"];

fn retain(quantities: Option<&BTreeMap<String, Quantity>>, keys: &[&str]) -> Option<BTreeMap<String, Quantity>> {
    let retained: BTreeMap<String, Quantity> = quantities?
        .iter()
        .filter(|(key, _)| keys.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    (!retained.is_empty()).then_some(retained)
}

/// Requests and limits of a container, without the keys a container cannot use.
pub fn container_resources(resources: Option<&ResourceRequirements>) -> Option<ResourceRequirements> {
    let resources = resources?;
    let requests = retain(resources.requests.as_ref(), &CONTAINER_KEYS);
    let limits = retain(resources.limits.as_ref(), &CONTAINER_KEYS);
    if requests.is_none() && limits.is_none() {
        return None;
    }
    Some(ResourceRequirements {
        requests,
        limits,
        ..Default::default()
    })
}

/// Storage requests and limits of a persistent volume claim.
pub fn claim_resources(resources: Option<&ResourceRequirements>) -> Option<VolumeResourceRequirements> {
    let resources = resources?;
    let requests = retain(resources.requests.as_ref(), &[STORAGE])?;
    Some(VolumeResourceRequirements {
        requests: Some(requests),
        limits: retain(resources.limits.as_ref(), &[STORAGE]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quantities(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, Quantity>> {
        Some(
            pairs
                .iter()
                .map(|(key, value)| (key.to_string(), Quantity(value.to_string())))
                .collect(),
        )
    }

    fn requirements() -> ResourceRequirements {
        ResourceRequirements {
            requests: quantities(&[("cpu", "1"), ("storage", "10Gi"), ("nvidia.com/gpu", "1")]),
            limits: quantities(&[("memory", "2Gi"), ("storage", "20Gi")]),
            ..Default::default()
        }
    }

    #[test]
    fn test_container_resources() {
        let filtered = container_resources(Some(&requirements())).unwrap();
        assert_eq!(filtered.requests, quantities(&[("cpu", "1")]));
        assert_eq!(filtered.limits, quantities(&[("memory", "2Gi")]));
    }

    #[test]
    fn test_container_resources_without_meaningful_keys() {
        let requirements = ResourceRequirements {
            requests: quantities(&[("storage", "10Gi")]),
            ..Default::default()
        };
        assert!(container_resources(Some(&requirements)).is_none());
        assert!(container_resources(None).is_none());
    }

    #[test]
    fn test_claim_resources() {
        let filtered = claim_resources(Some(&requirements())).unwrap();
        assert_eq!(filtered.requests, quantities(&[("storage", "10Gi")]));
        assert_eq!(filtered.limits, quantities(&[("storage", "20Gi")]));
    }

    #[test]
    fn test_claim_resources_need_a_storage_request() {
        let requirements = ResourceRequirements {
            limits: quantities(&[("storage", "20Gi")]),
            ..Default::default()
        };
        assert!(claim_resources(Some(&requirements)).is_none());
    }
}
