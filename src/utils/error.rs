//! The `error` module defines the error taxonomy of the broker.
//!
//! Every failure that can reach a client is one of the `BrokerError`
//! variants. The router writes the `Display` form of the error into the
//! response frame, so the messages here are part of the wire contract.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Malformed frame or an empty required field.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown topic name, or a binding that should exist does not.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Connection from a port outside every configured role range.
    #[error("unauthorised")]
    Unauthorized,

    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// Encode/decode or storage failure.
    #[error("internal: {0}")]
    Internal(String),

    /// The shutdown grace period elapsed.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),
}

impl BrokerError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        Self::FailedPrecondition(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Rebuilds an error from the text a response frame carried.
    /// Text without a known prefix is reported as `Internal`.
    pub fn from_wire(text: &str) -> Self {
        if text == "unauthorised" {
            return Self::Unauthorized;
        }
        let Some((kind, detail)) = text.split_once(": ") else {
            return Self::Internal(text.to_string());
        };
        let detail = detail.to_string();
        match kind {
            "invalid argument" => Self::InvalidArgument(detail),
            "not found" => Self::NotFound(detail),
            "failed precondition" => Self::FailedPrecondition(detail),
            "unimplemented" => Self::Unimplemented(detail),
            "internal" => Self::Internal(detail),
            "deadline exceeded" => Self::DeadlineExceeded(detail),
            _ => Self::Internal(text.to_string()),
        }
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(format!("io: {err}"))
    }
}

impl From<sled::Error> for BrokerError {
    fn from(err: sled::Error) -> Self {
        Self::Internal(format!("storage: {err}"))
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization: {err}"))
    }
}
