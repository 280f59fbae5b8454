//! The runner agent configuration files, persisted across restarts in a ConfigMap
//! (`.runner`, `.credentials`) and a Secret (`.credentials_rsaparams`) named after
//! the runner.
use crate::crd::runner::Runner;
use crate::k8s::labels::Labels;
use crate::k8s::utils::controller_reference;
use actions_auth::RsaParameters;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use tracing::debug;

pub const RUNNER_FILE: &str = ".runner";
pub const CREDENTIALS_FILE: &str = ".credentials";
pub const RSA_PARAMS_FILE: &str = ".credentials_rsaparams";

pub const DEFAULT_POOL_ID: u64 = 1;
pub const DEFAULT_POOL_NAME: &str = "Default";
pub const DEFAULT_WORK_FOLDER: &str = "_work";
pub const OAUTH_SCHEME: &str = "OAuth";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DotFiles {
    pub runner: RunnerSettings,
    pub credentials: Credentials,
    pub rsa_params: RsaParameters,
}

/// Contents of `.runner`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerSettings {
    #[serde(default)]
    pub agent_id: u64,
    pub agent_name: String,
    pub pool_id: u64,
    pub pool_name: String,
    #[serde(default)]
    pub server_url: String,
    #[serde(default)]
    pub git_hub_url: String,
    pub work_folder: String,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub disable_update: bool,
}

/// Contents of `.credentials`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub scheme: String,
    pub data: CredentialData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialData {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub authorization_url: String,
    #[serde(default, rename = "oauthEndpointUrl")]
    pub oauth_endpoint_url: String,
    #[serde(default, with = "title_case_bool")]
    pub require_fips_cryptography: bool,
}

/// The agent writes booleans in `.credentials` as `"True"`/`"False"` strings.
mod title_case_bool {
    use super::*;

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "True" } else { "False" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Text(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Bool(value) => value,
            Raw::Text(value) => value.eq_ignore_ascii_case("true"),
        })
    }
}

impl DotFiles {
    /// Fresh identity for `runner`, not registered yet.
    pub fn new(agent_name: impl Into<String>, rsa_params: RsaParameters) -> Self {
        DotFiles {
            runner: RunnerSettings {
                agent_id: 0,
                agent_name: agent_name.into(),
                pool_id: DEFAULT_POOL_ID,
                pool_name: DEFAULT_POOL_NAME.to_string(),
                work_folder: DEFAULT_WORK_FOLDER.to_string(),
                ephemeral: true,
                disable_update: true,
                ..Default::default()
            },
            credentials: Credentials {
                scheme: OAUTH_SCHEME.to_string(),
                data: CredentialData::default(),
            },
            rsa_params,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.runner.agent_id != 0
    }
}

fn metadata(runner: &Runner) -> ObjectMeta {
    ObjectMeta {
        name: Some(runner.name_any()),
        namespace: runner.namespace(),
        labels: Some(Labels::new(&runner.name_any()).get()),
        owner_references: Some(vec![controller_reference(runner)]),
        ..Default::default()
    }
}

fn encode<T: Serialize>(value: &T) -> ByteString {
    // Serializing plain structs with string keys into a buffer cannot fail.
    ByteString(serde_json::to_vec(value).unwrap_or_default())
}

pub fn to_config_map(runner: &Runner, dot_files: &DotFiles) -> ConfigMap {
    ConfigMap {
        metadata: metadata(runner),
        binary_data: Some(BTreeMap::from([
            (RUNNER_FILE.to_string(), encode(&dot_files.runner)),
            (CREDENTIALS_FILE.to_string(), encode(&dot_files.credentials)),
        ])),
        ..Default::default()
    }
}

pub fn to_secret(runner: &Runner, dot_files: &DotFiles) -> Secret {
    Secret {
        metadata: metadata(runner),
        data: Some(BTreeMap::from([(
            RSA_PARAMS_FILE.to_string(),
            encode(&dot_files.rsa_params),
        )])),
        ..Default::default()
    }
}

/// Reads the identity back, or nothing when any file is missing or undecodable.
pub fn to_dot_files(config_map: &ConfigMap, secret: &Secret) -> Option<DotFiles> {
    fn decode<'a, T: Deserialize<'a>>(
        data: Option<&'a BTreeMap<String, ByteString>>,
        key: &str,
    ) -> Option<T> {
        let bytes = data?.get(key)?;
        serde_json::from_slice(&bytes.0)
            .map_err(|err| debug!(%key, "discarding undecodable dot file: {err}"))
            .ok()
    }

    let runner: RunnerSettings = decode(config_map.binary_data.as_ref(), RUNNER_FILE)?;
    let credentials: Credentials = decode(config_map.binary_data.as_ref(), CREDENTIALS_FILE)?;
    let rsa_params: RsaParameters = decode(secret.data.as_ref(), RSA_PARAMS_FILE)?;
    if rsa_params.modulus.is_empty() || credentials.data.client_id.is_empty() {
        return None;
    }

    Some(DotFiles {
        runner,
        credentials,
        rsa_params,
    })
}
