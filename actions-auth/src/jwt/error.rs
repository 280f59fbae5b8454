use jsonwebtoken::errors;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JwtError {
    #[error("unable to encode or decode token: `{0}`")]
    Encoding(#[from] errors::Error),

    #[error("invalid signing key: `{0}`")]
    InvalidKey(String),

    #[error("token is missing the `{0}` claim")]
    MissingClaim(&'static str),

    #[error("invalid timestamp: `{0}`")]
    InvalidTimestamp(i64),
}
