//! Agent service payloads.
use actions_auth::serde_base64;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const FIPS_PROPERTY: &str = "RequireFipsCryptography";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAgent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<TaskAgentAuthorization>,
    #[serde(default)]
    pub labels: Vec<AgentLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallelism: Option<u32>,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub disable_update: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAgentAuthorization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<TaskAgentPublicKey>,
}

/// Public RSA key, big-endian components in base64.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskAgentPublicKey {
    #[serde(with = "serde_base64", default)]
    pub exponent: Vec<u8>,
    #[serde(with = "serde_base64", default)]
    pub modulus: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentLabel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl AgentLabel {
    pub fn system(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind: "system".to_string(),
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind: "user".to_string(),
        }
    }
}

impl TaskAgent {
    /// Reads the server mandated FIPS flag, stored as `{"$type": .., "$value": ..}`.
    pub fn requires_fips(&self) -> bool {
        let Some(property) = self
            .properties
            .as_ref()
            .and_then(|properties| properties.get(FIPS_PROPERTY))
        else {
            return false;
        };
        match property.get("$value").unwrap_or(property) {
            Value::Bool(value) => *value,
            Value::String(value) => value.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    pub fn with_fips_property(mut self, value: bool) -> Self {
        let property = json!({"$type": "System.Boolean", "$value": value.to_string()});
        match self.properties.as_mut().and_then(Value::as_object_mut) {
            Some(properties) => {
                properties.insert(FIPS_PROPERTY.to_string(), property);
            }
            None => self.properties = Some(json!({ FIPS_PROPERTY: property })),
        }
        self
    }
}

/// Wrapper the service puts around collections.
#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default)]
    pub count: usize,
    pub value: Vec<T>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAgentSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub owner_name: String,
    pub agent: TaskAgentReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<SessionEncryptionKey>,
    #[serde(default)]
    pub use_fips_encryption: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAgentReference {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEncryptionKey {
    #[serde(default)]
    pub encrypted: bool,
    #[serde(with = "serde_base64", default)]
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAgentMessage {
    pub message_id: u64,
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    PipelineAgentJobRequest,
    JobCancellation,
    AgentRefresh,
    JobMetadata,
    Unknown,
}

impl From<&str> for MessageType {
    fn from(value: &str) -> Self {
        match value {
            "PipelineAgentJobRequest" => MessageType::PipelineAgentJobRequest,
            "JobCancellation" => MessageType::JobCancellation,
            "AgentRefresh" => MessageType::AgentRefresh,
            "JobMetadataMessage" | "JobMetadata" => MessageType::JobMetadata,
            _ => MessageType::Unknown,
        }
    }
}

impl TaskAgentMessage {
    pub fn kind(&self) -> MessageType {
        MessageType::from(self.message_type.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ServiceError {
    #[serde(default)]
    pub type_key: String,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::string_value(json!({FIPS_PROPERTY: {"$type": "System.Boolean", "$value": "True"}}), true)]
    #[case::bool_value(json!({FIPS_PROPERTY: {"$type": "System.Boolean", "$value": false}}), false)]
    #[case::plain(json!({FIPS_PROPERTY: true}), true)]
    #[case::missing(json!({"Other": 1}), false)]
    fn test_requires_fips(#[case] properties: Value, #[case] expected: bool) {
        let agent = TaskAgent {
            properties: Some(properties),
            ..Default::default()
        };
        assert_eq!(agent.requires_fips(), expected);
    }

    #[test]
    fn test_with_fips_property_round_trip() {
        let agent = TaskAgent::default().with_fips_property(true);
        assert!(agent.requires_fips());
        assert!(!agent.with_fips_property(false).requires_fips());
    }

    #[test]
    fn test_agent_layout() {
        let agent = TaskAgent {
            name: "KA a r".to_string(),
            version: "2.320.0".to_string(),
            labels: vec![AgentLabel::system("self-hosted"), AgentLabel::user("gpu")],
            authorization: Some(TaskAgentAuthorization {
                public_key: Some(TaskAgentPublicKey {
                    exponent: vec![1, 0, 1],
                    modulus: vec![0xff],
                }),
                ..Default::default()
            }),
            ephemeral: true,
            ..Default::default()
        };

        let json = serde_json::to_value(&agent).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["labels"][0], json!({"name": "self-hosted", "type": "system"}));
        assert_eq!(json["labels"][1]["type"], "user");
        assert_eq!(json["authorization"]["publicKey"]["exponent"], "AQAB");
        assert_eq!(json["ephemeral"], true);
    }

    #[rstest]
    #[case("PipelineAgentJobRequest", MessageType::PipelineAgentJobRequest)]
    #[case("JobCancellation", MessageType::JobCancellation)]
    #[case("AgentRefresh", MessageType::AgentRefresh)]
    #[case("JobMetadataMessage", MessageType::JobMetadata)]
    #[case("BrokerMigration", MessageType::Unknown)]
    fn test_message_type(#[case] raw: &str, #[case] expected: MessageType) {
        assert_eq!(MessageType::from(raw), expected);
    }

    #[test]
    fn test_session_layout() {
        let session: TaskAgentSession = serde_json::from_value(json!({
            "sessionId": "s-1",
            "ownerName": "kube-actions",
            "agent": {"id": 42, "name": "KA a r", "version": "2.320.0"},
            "encryptionKey": {"encrypted": true, "value": "AAEC"},
            "useFipsEncryption": false
        }))
        .unwrap();

        assert_eq!(session.session_id.as_deref(), Some("s-1"));
        assert_eq!(session.encryption_key.unwrap().value, vec![0, 1, 2]);
    }
}
