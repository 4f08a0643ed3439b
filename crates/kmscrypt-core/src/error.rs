//! Crate-wide error type.
//!
//! Every user-initiated encrypt/decrypt call propagates one of these variants.
//! Event-reporting failures are the only ones that may be swallowed, gated by
//! `event_reporting.trap_exceptions` (see [`crate::events`]).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("kms returned non-success status {status}: {body}")]
    Kms { status: u16, body: String },

    #[error("malformed ciphertext header: {0}")]
    BadHeader(String),

    #[error("AEAD authentication failed")]
    AuthFailure,

    #[error("dataset invalid or unknown: {0}")]
    DatasetInvalid(String),

    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("FF1 overflow: rendered value needs more digits than the field allows")]
    FF1Overflow,

    #[error("invalid API state: {0}")]
    State(String),

    #[error("key unwrap failed: {0}")]
    Unwrap(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Transport(format!("json: {e}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(format!("io: {e}"))
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::InputInvalid(format!("base64: {e}"))
    }
}
