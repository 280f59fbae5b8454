use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("rsa parameters are incomplete: missing `{0}`")]
    IncompleteKey(&'static str),

    #[error("openssl operation failed: `{0}`")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("invalid base64 payload: `{0}`")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid {name} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("decrypted payload is not valid utf-8: `{0}`")]
    Utf8(#[from] std::string::FromUtf8Error),
}
