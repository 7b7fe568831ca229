use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::serde::{option_to_rfc3339_ms, to_rfc3339_ms};
use warden_domain::id::{AuthenticatorId, UserId};

use crate::domain::types::{AuthenticatorKind, AuthenticatorState};
use crate::error::AuthenticatorError;
use crate::state::AppState;
use crate::totp;
use crate::usecase::authenticator::{AttemptInput, CreateAuthenticatorInput, VerifyInput};

// ── POST /users/{user_id}/authenticators ─────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateAuthenticatorRequest {
    pub kind: AuthenticatorKind,
    #[serde(default)]
    pub destination: Option<String>,
}

#[derive(Serialize)]
pub struct CreateAuthenticatorResponse {
    pub id: AuthenticatorId,
    pub kind: AuthenticatorKind,
    pub state: AuthenticatorState,
    /// Base-32 shared secret for the user's authenticator app. TOTP only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(serialize_with = "to_rfc3339_ms")]
    pub created_at: DateTime<Utc>,
}

pub async fn create_authenticator(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(body): Json<CreateAuthenticatorRequest>,
) -> Result<(StatusCode, Json<CreateAuthenticatorResponse>), AuthenticatorError> {
    let cancel = state.shutdown.child_token();
    let record = state
        .service
        .create(
            CreateAuthenticatorInput {
                user_id: UserId(user_id),
                kind: body.kind,
                destination: body.destination,
            },
            &cancel,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateAuthenticatorResponse {
            id: record.id,
            kind: record.kind,
            state: record.state,
            secret: record.secret.as_ref().map(totp::encode_secret),
            destination: record.destination,
            created_at: record.created_at,
        }),
    ))
}

// ── POST /users/{user_id}/authenticators/{kind}/attempt ──────────────────────

#[derive(Deserialize)]
pub struct AttemptRequest {
    #[serde(default)]
    pub destination: Option<String>,
}

pub async fn attempt_authenticator(
    State(state): State<AppState>,
    Path((user_id, kind)): Path<(Uuid, AuthenticatorKind)>,
    body: Option<Json<AttemptRequest>>,
) -> Result<StatusCode, AuthenticatorError> {
    let destination = body.and_then(|Json(body)| body.destination);
    let cancel = state.shutdown.child_token();
    state
        .service
        .attempt(
            AttemptInput {
                user_id: UserId(user_id),
                kind,
                destination,
            },
            &cancel,
        )
        .await?;
    Ok(StatusCode::ACCEPTED)
}

// ── POST /users/{user_id}/authenticators/{kind}/verify ───────────────────────

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub code: String,
}

pub async fn verify_authenticator(
    State(state): State<AppState>,
    Path((user_id, kind)): Path<(Uuid, AuthenticatorKind)>,
    Json(body): Json<VerifyRequest>,
) -> Result<StatusCode, AuthenticatorError> {
    let cancel = state.shutdown.child_token();
    state
        .service
        .verify(
            VerifyInput {
                user_id: UserId(user_id),
                kind,
                code: body.code,
            },
            &cancel,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── GET /users/{user_id}/authenticators/{kind} ───────────────────────────────

#[derive(Serialize)]
pub struct AuthenticatorResponse {
    pub id: AuthenticatorId,
    pub kind: AuthenticatorKind,
    pub state: AuthenticatorState,
    pub failed_attempts: u32,
    #[serde(serialize_with = "option_to_rfc3339_ms")]
    pub locked_until: Option<DateTime<Utc>>,
    pub destination: Option<String>,
    #[serde(serialize_with = "option_to_rfc3339_ms")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(serialize_with = "to_rfc3339_ms")]
    pub created_at: DateTime<Utc>,
}

pub async fn describe_authenticator(
    State(state): State<AppState>,
    Path((user_id, kind)): Path<(Uuid, AuthenticatorKind)>,
) -> Result<Json<AuthenticatorResponse>, AuthenticatorError> {
    let cancel = state.shutdown.child_token();
    let summary = state
        .service
        .describe(UserId(user_id), kind, &cancel)
        .await?;
    Ok(Json(AuthenticatorResponse {
        id: summary.id,
        kind: summary.kind,
        state: summary.state,
        failed_attempts: summary.failed_attempts,
        locked_until: summary.locked_until,
        destination: summary.destination,
        confirmed_at: summary.confirmed_at,
        created_at: summary.created_at,
    }))
}

// ── DELETE /users/{user_id}/authenticators/{kind} ────────────────────────────

pub async fn delete_authenticator(
    State(state): State<AppState>,
    Path((user_id, kind)): Path<(Uuid, AuthenticatorKind)>,
) -> Result<StatusCode, AuthenticatorError> {
    let cancel = state.shutdown.child_token();
    state
        .service
        .delete(UserId(user_id), kind, &cancel)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
