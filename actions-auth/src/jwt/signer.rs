use super::{claims::Claims, error::JwtError};
use crate::rsa_params::RsaParameters;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use std::fmt::{Debug, Formatter};

pub struct SignedJwt {
    /// Expiration date
    pub expiration_date: DateTime<Utc>,
    /// Encoded value
    pub value: String,
}

/// Signs claims with RS256. The header always carries `typ: JWT`.
pub struct RsaSigner {
    encoding_key: EncodingKey,
}

impl Debug for SignedJwt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedJwt")
            .field("expiration_date", &self.expiration_date)
            .field("value", &"<redacted>")
            .finish()
    }
}

impl Debug for RsaSigner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaSigner")
            .field("encoding_key", &"<redacted>")
            .finish()
    }
}

impl RsaSigner {
    /// Builds a signer from a PEM encoded RSA private key (PKCS#1 or PKCS#8).
    pub fn from_pem(pem: &[u8]) -> Result<Self, JwtError> {
        let encoding_key =
            EncodingKey::from_rsa_pem(pem).map_err(|err| JwtError::InvalidKey(err.to_string()))?;
        Ok(Self { encoding_key })
    }

    pub fn sign(&self, claims: &Claims) -> Result<SignedJwt, JwtError> {
        let exp = claims.exp.ok_or(JwtError::MissingClaim("exp"))?;
        let expiration_date = Utc
            .timestamp_opt(exp, 0)
            .single()
            .ok_or(JwtError::InvalidTimestamp(exp))?;
        let value = jsonwebtoken::encode(&Header::new(Algorithm::RS256), claims, &self.encoding_key)?;
        Ok(SignedJwt {
            expiration_date,
            value,
        })
    }
}

impl TryFrom<&RsaParameters> for RsaSigner {
    type Error = JwtError;

    fn try_from(params: &RsaParameters) -> Result<Self, Self::Error> {
        let der = params
            .to_pkcs1_der()
            .map_err(|err| JwtError::InvalidKey(err.to_string()))?;
        Ok(Self {
            encoding_key: EncodingKey::from_rsa_der(&der),
        })
    }
}
