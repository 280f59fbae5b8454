use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// A job assignment picked up by the listener, waiting to be materialised.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub message_id: u64,
    pub request_id: Option<u64>,
    pub job_display_name: Option<String>,
    /// Typed context data the policy rules are evaluated against.
    pub context_data: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Body {
    #[serde(default)]
    request_id: Option<u64>,
    #[serde(default)]
    job_display_name: Option<String>,
    #[serde(default)]
    context_data: Value,
}

impl JobRequest {
    /// Undecodable bodies still produce a request, with an empty context.
    pub fn from_message(message_id: u64, body: &str) -> Self {
        let body = serde_json::from_str::<Body>(body).unwrap_or_else(|err| {
            warn!(message_id, "undecodable job request body: {err}");
            Body {
                request_id: None,
                job_display_name: None,
                context_data: Value::Null,
            }
        });
        Self {
            message_id,
            request_id: body.request_id,
            job_display_name: body.job_display_name,
            context_data: body.context_data,
        }
    }
}
