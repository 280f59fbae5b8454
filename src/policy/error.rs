use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("invalid rule `{rule}`: {message}")]
    Parse { rule: String, message: String },

    #[error("{0}")]
    Type(String),
}
