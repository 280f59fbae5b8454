use super::owned_metadata;
use crate::crd::job::{JobResource, JobResourceSpec};
use crate::crd::runner::Runner;
use crate::wire::job_request::JobRequest;
use kube::ResourceExt;

/// Job resource materialising `request`, named after and owned by the runner.
pub fn to_job_resource(runner: &Runner, request: &JobRequest) -> JobResource {
    let name = runner.name_any();
    JobResource {
        metadata: owned_metadata(runner, &name),
        spec: JobResourceSpec {
            runner: name,
            message_id: Some(request.message_id),
            request_id: request.request_id,
            job_display_name: request.job_display_name.clone(),
        },
        status: None,
    }
}
