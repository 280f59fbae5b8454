use super::owned_metadata;
use crate::crd::runner::Runner;
use crate::k8s::annotations::is_disruptible;
use crate::k8s::labels::runner_selector;
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

/// Budget forbidding voluntary evictions of the runner's worker pod, or `None` when the
/// runner is annotated as disruptible.
pub fn to_pod_disruption_budget(runner: &Runner) -> Option<PodDisruptionBudget> {
    if is_disruptible(runner.annotations()) {
        return None;
    }
    let name = runner.name_any();
    Some(PodDisruptionBudget {
        metadata: owned_metadata(runner, &name),
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(0)),
            selector: Some(LabelSelector {
                match_labels: Some(runner_selector(&name)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}
