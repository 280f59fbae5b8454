use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Repository {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub owner: Owner,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub visibility: Option<String>,
    pub html_url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Owner {
    pub login: String,
}

impl Repository {
    /// Older API servers omit `visibility`, `private` is always there.
    pub fn visibility(&self) -> Visibility {
        match self.visibility.as_deref().map(Visibility::from_str) {
            Some(Ok(visibility)) => visibility,
            _ if self.private => Visibility::Private,
            _ => Visibility::Public,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
    Internal,
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            "internal" => Ok(Visibility::Internal),
            other => Err(format!("unknown repository visibility `{other}`")),
        }
    }
}

impl Display for Visibility {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Internal => "internal",
        })
    }
}

/// Short lived token returned by the registration and remove token endpoints.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunnerToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Installation {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InstallationToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnerEvent {
    Register,
    Remove,
}

impl Display for RunnerEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RunnerEvent::Register => "register",
            RunnerEvent::Remove => "remove",
        })
    }
}

/// Credential granting access to the agent service tenant of a repository.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TenantCredential {
    pub url: String,
    pub token: String,
    #[serde(default)]
    pub token_schema: String,
}

#[derive(Debug, Serialize)]
pub(super) struct TenantCredentialRequest<'a> {
    pub url: &'a str,
    pub runner_event: String,
}
