use std::time::Duration;

use thiserror::Error;

use crate::models::FailureKind;

#[derive(Debug, Error)]
pub enum KioskError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Client error: {0}")]
    ClientError(String),
    #[error("Authentication error: {0}")]
    AuthError(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },
    #[error("Request rejected: {status} - {message}")]
    RequestRejected { status: u16, message: String },
    #[error("Decode error: {0}")]
    DecodeError(String),
    #[error("Request controller is no longer running")]
    ControllerStopped,
}

impl KioskError {
    /// How the controller should treat this error when it comes back from a
    /// generation attempt.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            KioskError::AuthError(_) => FailureKind::Auth,
            KioskError::Timeout(_) => FailureKind::Timeout,
            KioskError::NetworkError(_) => FailureKind::Network,
            KioskError::ServerError { .. } => FailureKind::Server,
            KioskError::DecodeError(_) => FailureKind::Decode,
            KioskError::RequestRejected { .. } => FailureKind::Rejected,
            KioskError::ConfigError(_)
            | KioskError::ClientError(_)
            | KioskError::ControllerStopped => FailureKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, KioskError>;
