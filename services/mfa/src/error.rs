use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};

use warden_core::serde::format_rfc3339_ms;

use crate::totp::TotpError;

/// Authenticator service error variants.
#[derive(Debug, thiserror::Error)]
pub enum AuthenticatorError {
    #[error("invalid enrollment: {0}")]
    InvalidEnrollment(String),
    #[error("already enrolled")]
    AlreadyEnrolled,
    #[error("not enrolled")]
    NotEnrolled,
    #[error("unsupported operation")]
    UnsupportedOperation,
    #[error("authenticator locked")]
    AuthenticatorLocked { until: DateTime<Utc> },
    #[error("invalid code")]
    InvalidCode,
    #[error("delivery failed")]
    DeliveryFailed(#[source] anyhow::Error),
    #[error("concurrent modification")]
    ConcurrentModification,
    #[error("insufficient entropy")]
    InsufficientEntropy,
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation timed out")]
    Timeout,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AuthenticatorError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidEnrollment(_) => "INVALID_ENROLLMENT",
            Self::AlreadyEnrolled => "ALREADY_ENROLLED",
            Self::NotEnrolled => "NOT_ENROLLED",
            Self::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            Self::AuthenticatorLocked { .. } => "AUTHENTICATOR_LOCKED",
            Self::InvalidCode => "INVALID_CODE",
            Self::DeliveryFailed(_) => "DELIVERY_FAILED",
            Self::ConcurrentModification => "CONCURRENT_MODIFICATION",
            Self::InsufficientEntropy => "INSUFFICIENT_ENTROPY",
            Self::Cancelled => "CANCELLED",
            Self::Timeout => "TIMEOUT",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidEnrollment(_) => StatusCode::BAD_REQUEST,
            Self::AlreadyEnrolled | Self::ConcurrentModification => StatusCode::CONFLICT,
            Self::NotEnrolled => StatusCode::NOT_FOUND,
            Self::UnsupportedOperation => StatusCode::UNPROCESSABLE_ENTITY,
            Self::AuthenticatorLocked { .. } => StatusCode::LOCKED,
            Self::InvalidCode => StatusCode::UNAUTHORIZED,
            Self::DeliveryFailed(_) => StatusCode::BAD_GATEWAY,
            Self::InsufficientEntropy | Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TotpError> for AuthenticatorError {
    fn from(err: TotpError) -> Self {
        match err {
            TotpError::InsufficientEntropy => Self::InsufficientEntropy,
            other => Self::Internal(other.into()),
        }
    }
}

impl IntoResponse for AuthenticatorError {
    fn into_response(self) -> Response {
        let status = self.status();
        // 4xx outcomes are recorded by TraceLayer; only 5xx log here.
        match &self {
            Self::Internal(e) | Self::DeliveryFailed(e) => {
                tracing::error!(error = %format!("{e:#}"), kind = self.kind(), "request failed");
            }
            Self::InsufficientEntropy | Self::Cancelled | Self::Timeout => {
                tracing::error!(kind = self.kind(), "request failed");
            }
            _ => {}
        }
        let mut body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if let Self::AuthenticatorLocked { until } = &self {
            body["locked_until"] = serde_json::Value::String(format_rfc3339_ms(until));
        }
        (status, axum::Json(body)).into_response()
    }
}
