//! Error taxonomy shared by every meshforge component.

use assetstore::PersistenceError;
use thiserror::Error;

use crate::detect::BackendVariant;

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("cannot determine backend variant for {endpoint}: {reason}")]
    DetectionFailure { endpoint: String, reason: String },

    #[error("{0}")]
    Validation(String),

    #[error("{label} failed after {attempts} attempts: {message}")]
    TransientRemote {
        label: String,
        attempts: u32,
        message: String,
    },

    #[error("{label} still over quota after {attempts} attempts: {message}")]
    QuotaExceeded {
        label: String,
        attempts: u32,
        message: String,
    },

    #[error("{label} rejected the request: {message}")]
    FatalRemote { label: String, message: String },

    #[error("{label} returned an unexpected response: {message}")]
    MalformedResponse { label: String, message: String },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("no pipeline registered for backend variant {0}")]
    UnsupportedBackend(BackendVariant),

    #[error("rate limit exceeded for {client}, retry in {retry_after_secs}s")]
    RateLimited { client: String, retry_after_secs: u64 },

    #[error("{0} not found")]
    NotFound(String),
}

impl ForgeError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn malformed(label: &str, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            label: label.to_string(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ForgeError::DetectionFailure { .. } => "detection_failure",
            ForgeError::Validation(_) => "validation_error",
            ForgeError::TransientRemote { .. } => "transient_remote_error",
            ForgeError::QuotaExceeded { .. } => "quota_exceeded",
            ForgeError::FatalRemote { .. } => "remote_error",
            ForgeError::MalformedResponse { .. } => "remote_error",
            ForgeError::Persistence(PersistenceError::NotFound(_)) => "not_found",
            ForgeError::Persistence(PersistenceError::UnsupportedUri(_)) => "validation_error",
            ForgeError::Persistence(_) => "persistence_error",
            ForgeError::UnsupportedBackend(_) => "unsupported_backend",
            ForgeError::RateLimited { .. } => "rate_limited",
            ForgeError::NotFound(_) => "not_found",
        }
    }
}
