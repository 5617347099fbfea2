use thiserror::Error;
use uuid::Uuid;

use crate::models::OutreachStatus;

/// Failure of an external collaborator (narrative or decision service).
///
/// Every call site substitutes a fallback, so these are logged and
/// never propagated past the account being processed.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service not configured: {0}")]
    NotConfigured(&'static str),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("empty response from service")]
    EmptyResponse,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown {kind} value: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("outreach is already {0}; only pending outreach can be reviewed")]
    IllegalTransition(OutreachStatus),

    #[error("anomaly {0} not found")]
    AnomalyNotFound(Uuid),

    #[error("alert {0} not found")]
    AlertNotFound(Uuid),

    #[error("no account matches {0:?}")]
    AccountNotFound(String),
}

impl ModelError {
    pub fn unknown(kind: &'static str, value: &str) -> Self {
        ModelError::UnknownVariant {
            kind,
            value: value.to_string(),
        }
    }
}
