use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A job assigned to a runner, named after it. Lives until its worker pod ends.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[kube(
    group = "inloco.com.br",
    version = "v1alpha1",
    kind = "JobResource",
    namespaced,
    status = "JobResourceStatus",
    printcolumn = r#"{"name":"Job","type":"string","jsonPath":".spec.jobDisplayName"}"#,
    printcolumn = r#"{"name":"Claim","type":"string","jsonPath":".status.persistentVolumeClaimPhase"}"#,
    printcolumn = r#"{"name":"Pod","type":"string","jsonPath":".status.podPhase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct JobResourceSpec {
    /// Name of the owning runner.
    pub runner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_display_name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobResourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim_phase: Option<ClaimPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_phase: Option<PodPhase>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, JsonSchema)]
pub enum ClaimPhase {
    Pending,
    Bound,
    Lost,
}

impl ClaimPhase {
    /// Claims without a reported phase are still pending.
    pub fn from_status(phase: Option<&str>) -> Self {
        match phase {
            Some("Bound") => ClaimPhase::Bound,
            Some("Lost") => ClaimPhase::Lost,
            _ => ClaimPhase::Pending,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, JsonSchema)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn from_status(phase: Option<&str>) -> Self {
        match phase {
            None | Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            Some(_) => PodPhase::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed | PodPhase::Unknown)
    }
}

impl JobResourceStatus {
    pub fn is_terminal(&self) -> bool {
        self.persistent_volume_claim_phase == Some(ClaimPhase::Lost)
            || self.pod_phase.is_some_and(PodPhase::is_terminal)
    }
}

impl JobResource {
    pub fn is_terminal(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(JobResourceStatus::is_terminal)
    }
}
