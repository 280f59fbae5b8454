//! JWT helpers: claims, RS256 signer and unverified expiration lookup.
pub mod claims;
pub mod error;
pub mod signer;

use chrono::{DateTime, TimeZone, Utc};
use claims::Claims;
use error::JwtError;
use jsonwebtoken::{decode, DecodingKey, Validation};

/// Reads the `exp` claim of a token without verifying its signature.
///
/// Used to decide whether a cached bearer issued by a third party is still usable;
/// the token is never trusted for anything else.
pub fn peek_expiration(token: &str) -> Result<DateTime<Utc>, JwtError> {
    let header = jsonwebtoken::decode_header(token)?;
    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    let data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    let exp = data.claims.exp.ok_or(JwtError::MissingClaim("exp"))?;
    Utc.timestamp_opt(exp, 0)
        .single()
        .ok_or(JwtError::InvalidTimestamp(exp))
}
