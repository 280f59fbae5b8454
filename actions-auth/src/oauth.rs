//! OAuth2 client-credentials exchange authenticated with a signed client assertion.
use crate::jwt::{claims::Claims, error::JwtError, signer::RsaSigner};
use chrono::{DateTime, Duration, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const GRANT_TYPE: &str = "client_credentials";
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

#[derive(Error, Debug)]
pub enum OAuthError {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),
    #[error("invalid_client: {0}")]
    InvalidClient(String),
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),
    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),
    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),
    #[error("invalid_scope: {0}")]
    InvalidScope(String),
    #[error("{code}: {description}")]
    Other { code: String, description: String },
    #[error("unexpected token endpoint response `{status}`: {body}")]
    UnexpectedResponse { status: StatusCode, body: String },
    #[error("token endpoint request failed: `{0}`")]
    Http(#[from] reqwest::Error),
    #[error("signing client assertion: `{0}`")]
    Jwt(#[from] JwtError),
}

impl OAuthError {
    /// The client registration is gone server side, the identity has to be rotated.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, OAuthError::InvalidClient(_))
    }

    fn from_code(code: String, description: Option<String>) -> Self {
        let description = description.unwrap_or_default();
        match code.as_str() {
            "invalid_request" => Self::InvalidRequest(description),
            "invalid_client" => Self::InvalidClient(description),
            "invalid_grant" => Self::InvalidGrant(description),
            "unauthorized_client" => Self::UnauthorizedClient(description),
            "unsupported_grant_type" => Self::UnsupportedGrantType(description),
            "invalid_scope" => Self::InvalidScope(description),
            _ => Self::Other { code, description },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccessToken {
    pub value: String,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenResponse {
    Token {
        access_token: String,
        #[serde(default)]
        token_type: String,
        expires_in: Option<i64>,
    },
    Error {
        error: String,
        error_description: Option<String>,
    },
}

/// Exchanges client assertions for access tokens against a token endpoint.
#[derive(Clone)]
pub struct HttpAuthenticator {
    client: reqwest::Client,
}

impl HttpAuthenticator {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Signs a fresh assertion for `client_id` and exchanges it at `token_endpoint`.
    pub async fn exchange(
        &self,
        token_endpoint: &str,
        client_id: &str,
        signer: &RsaSigner,
    ) -> Result<AccessToken, OAuthError> {
        let now = Utc::now();
        let assertion = signer.sign(&Claims::client_assertion(client_id, token_endpoint, now))?;

        debug!(%token_endpoint, %client_id, "exchanging client assertion");
        let response = self
            .client
            .post(token_endpoint)
            .form(&[
                ("grant_type", GRANT_TYPE),
                ("client_assertion_type", CLIENT_ASSERTION_TYPE),
                ("client_assertion", assertion.value.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        match serde_json::from_str::<TokenResponse>(&body) {
            Ok(TokenResponse::Token {
                access_token,
                token_type,
                expires_in,
            }) if status.is_success() => Ok(AccessToken {
                value: access_token,
                token_type,
                expires_at: expires_in.map(|secs| now + Duration::seconds(secs)),
            }),
            Ok(TokenResponse::Error {
                error,
                error_description,
            }) => Err(OAuthError::from_code(error, error_description)),
            _ => Err(OAuthError::UnexpectedResponse { status, body }),
        }
    }
}
