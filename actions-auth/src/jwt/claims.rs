use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Lifetime in seconds of a client assertion sent to the agent token endpoint.
pub const CLIENT_ASSERTION_TTL_SECS: i64 = 4 * 60;
/// Clock skew in seconds tolerated by the token endpoint.
pub const CLIENT_ASSERTION_SKEW_SECS: i64 = 60;
/// Lifetime in seconds of an application token sent to the code host.
pub const APP_TOKEN_TTL_SECS: i64 = 10 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// JWT ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Audience.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub aud: Vec<String>,
    /// Expiration time (as UTC timestamp).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issued at (as UTC timestamp).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Issuer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Not before (as UTC timestamp).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Subject (whom token refers to).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
}

impl Claims {
    /// Create a new Claims instance expiring at `exp`.
    pub fn new(exp: DateTime<Utc>) -> Self {
        Self {
            jti: None,
            aud: Vec::new(),
            exp: Some(exp.timestamp()),
            iat: None,
            iss: None,
            nbf: None,
            sub: None,
        }
    }

    /// Claims of the assertion exchanged for an agent access token:
    /// `iss` and `sub` are the client id, `aud` the token endpoint.
    pub fn client_assertion(client_id: &str, token_endpoint: &str, now: DateTime<Utc>) -> Self {
        Self::new(now + Duration::seconds(CLIENT_ASSERTION_TTL_SECS))
            .with_jwt_id(Uuid::new_v4().to_string())
            .with_issuer(client_id.to_string())
            .with_subject(client_id.to_string())
            .with_audience(token_endpoint.to_string())
            .with_issued_at(now)
            .with_not_before(now - Duration::seconds(CLIENT_ASSERTION_SKEW_SECS))
    }

    /// Claims of the token identifying the code host application itself.
    pub fn app(app_id: u64, now: DateTime<Utc>) -> Self {
        Self::new(now + Duration::seconds(APP_TOKEN_TTL_SECS))
            .with_issuer(app_id.to_string())
            .with_issued_at(now)
    }

    pub fn with_jwt_id(self, jti: String) -> Self {
        Self {
            jti: Some(jti),
            ..self
        }
    }

    /// Adds an audience
    pub fn with_audience(mut self, aud: String) -> Self {
        self.aud.push(aud);
        self
    }

    pub fn with_issued_at(self, iat: DateTime<Utc>) -> Self {
        Self {
            iat: Some(iat.timestamp()),
            ..self
        }
    }

    pub fn with_issuer(self, iss: String) -> Self {
        Self {
            iss: Some(iss),
            ..self
        }
    }

    pub fn with_not_before(self, nbf: DateTime<Utc>) -> Self {
        Self {
            nbf: Some(nbf.timestamp()),
            ..self
        }
    }

    pub fn with_subject(self, sub: String) -> Self {
        Self {
            sub: Some(sub),
            ..self
        }
    }
}

/// `aud` is either a single string or an array of strings.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(aud)) => vec![aud],
        Some(OneOrMany::Many(aud)) => aud,
        None => Vec::new(),
    })
}
