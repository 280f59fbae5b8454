//! Process configuration, read from `KUBEACTIONS_*` environment variables.
use crate::converters::PodConfig;
use crate::github::auth::GitHubCredentials;
use crate::github::client::DEFAULT_API_URL;
use crate::github::types::Visibility;
use crate::github::AccessPolicy;
use crate::wire::WireSettings;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use config::{Config, Environment};
use serde::Deserialize;
use std::fmt::{Display, Formatter};
use thiserror::Error;

pub const ENV_PREFIX: &str = "KUBEACTIONS";

const DEFAULT_IMAGE_NAME: &str = "inloco/kube-actions";
const DEFAULT_ARCH: &str = "amd64";
/// Version of the agent shipped in the default runner image.
const DEFAULT_AGENT_VERSION: &str = "2.320.0";
const PEM_HEADER: &str = "-----BEGIN";
const LIST_KEYS: [&str; 2] = ["github_owners", "github_visibilities"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading the environment: {0}")]
    Load(#[from] config::ConfigError),

    #[error("no GitHub credentials, set KUBEACTIONS_GITHUB_PAT or KUBEACTIONS_GITHUB_APP_ID and KUBEACTIONS_GITHUB_APP_PK")]
    MissingCredentials,

    #[error("the GitHub App private key is neither PEM nor base64 encoded PEM")]
    InvalidPrivateKey,

    #[error("{0}")]
    InvalidVisibility(String),
}

/// Container image coordinates, `<name>:<version>[-<variant>]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageConfig {
    pub name: String,
    pub version: String,
    pub variant: Option<String>,
}

impl ImageConfig {
    /// Image reference, optionally overriding the version.
    pub fn reference(&self, version: Option<&str>) -> String {
        let version = version.unwrap_or(&self.version);
        match &self.variant {
            Some(variant) => format!("{}:{version}-{variant}", self.name),
            None => format!("{}:{version}", self.name),
        }
    }
}

impl Display for ImageConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reference(None))
    }
}

/// Flat view of the environment.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    github_pat: Option<String>,
    github_app_id: Option<u64>,
    github_app_pk: Option<String>,
    github_app_instl_id: Option<u64>,
    github_owners: Vec<String>,
    github_visibilities: Vec<String>,
    github_api_url: Option<String>,
    runner_image_name: Option<String>,
    runner_image_version: Option<String>,
    runner_image_variant: Option<String>,
    dind_image_name: Option<String>,
    dind_image_version: Option<String>,
    dind_image_variant: Option<String>,
    runner_arch: Option<String>,
    agent_version: Option<String>,
    trace: bool,
}

#[derive(Debug, Clone)]
pub struct KubeActionsConfig {
    pub credentials: GitHubCredentials,
    pub api_url: String,
    pub access: AccessPolicy,
    pub pod: PodConfig,
    pub wire: WireSettings,
    pub trace: bool,
}

impl KubeActionsConfig {
    /// Reads the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_environment(environment())
    }

    fn from_environment(environment: Environment) -> Result<Self, ConfigError> {
        let raw: RawConfig = Config::builder()
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        raw.try_into()
    }
}

fn environment() -> Environment {
    LIST_KEYS.iter().fold(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .try_parsing(true)
            .list_separator(","),
        |environment, key| environment.with_list_parse_key(key),
    )
}

fn image(name: Option<String>, version: Option<String>, variant: Option<String>, default_variant: &str) -> ImageConfig {
    ImageConfig {
        name: name.unwrap_or_else(|| DEFAULT_IMAGE_NAME.to_string()),
        version: version.unwrap_or_else(|| format!("v{}", env!("CARGO_PKG_VERSION"))),
        variant: match variant {
            Some(variant) if variant.is_empty() => None,
            Some(variant) => Some(variant),
            None => Some(default_variant.to_string()),
        },
    }
}

/// Accepts the key as PEM or as base64 encoded PEM.
fn private_key(value: String) -> Result<String, ConfigError> {
    if value.contains(PEM_HEADER) {
        return Ok(value);
    }
    STANDARD
        .decode(value.trim())
        .ok()
        .and_then(|decoded| String::from_utf8(decoded).ok())
        .filter(|decoded| decoded.contains(PEM_HEADER))
        .ok_or(ConfigError::InvalidPrivateKey)
}

fn non_empty(values: Vec<String>) -> impl Iterator<Item = String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl TryFrom<RawConfig> for KubeActionsConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let credentials = match (raw.github_app_id, raw.github_app_pk, raw.github_pat) {
            (Some(id), Some(private_key_value), _) => GitHubCredentials::App {
                id,
                private_key: private_key(private_key_value)?,
                installation_id: raw.github_app_instl_id,
            },
            (_, _, Some(token)) if !token.is_empty() => {
                GitHubCredentials::PersonalAccessToken(token)
            }
            _ => return Err(ConfigError::MissingCredentials),
        };

        let visibilities = non_empty(raw.github_visibilities)
            .map(|value| value.parse::<Visibility>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(ConfigError::InvalidVisibility)?;
        let access = AccessPolicy::new(non_empty(raw.github_owners).collect(), visibilities);

        let arch = raw.runner_arch.unwrap_or_else(|| DEFAULT_ARCH.to_string());
        Ok(Self {
            credentials,
            api_url: raw
                .github_api_url
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            access,
            pod: PodConfig {
                runner_image: image(
                    raw.runner_image_name,
                    raw.runner_image_version,
                    raw.runner_image_variant,
                    "runner",
                ),
                dind_image: image(
                    raw.dind_image_name,
                    raw.dind_image_version,
                    raw.dind_image_variant,
                    "dind",
                ),
                arch: arch.clone(),
            },
            wire: WireSettings {
                agent_version: raw
                    .agent_version
                    .unwrap_or_else(|| DEFAULT_AGENT_VERSION.to_string()),
                arch,
            },
            trace: raw.trace,
        })
    }
}
