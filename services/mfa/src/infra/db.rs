use anyhow::Context as _;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, SqlErr,
};
use serde_json::json;
use uuid::Uuid;

use warden_domain::id::{AuthenticatorId, UserId};
use warden_mfa_schema::{authenticators, outbox_events};

use crate::domain::repository::{AuthenticatorStore, CodeDelivery, NotificationSender};
use crate::domain::types::{AuthenticatorKind, AuthenticatorRecord};
use crate::error::AuthenticatorError;
use crate::totp::SecretBytes;

// ── Authenticator store ───────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbAuthenticatorStore {
    pub db: DatabaseConnection,
}

impl AuthenticatorStore for DbAuthenticatorStore {
    async fn load(
        &self,
        user_id: UserId,
        kind: AuthenticatorKind,
    ) -> Result<Option<AuthenticatorRecord>, AuthenticatorError> {
        let model = authenticators::Entity::find()
            .filter(authenticators::Column::UserId.eq(user_id.0))
            .filter(authenticators::Column::Kind.eq(kind.as_str()))
            .one(&self.db)
            .await
            .context("load authenticator")?;
        model.map(record_from_model).transpose()
    }

    async fn save(
        &self,
        record: &AuthenticatorRecord,
        expected_version: Option<u64>,
    ) -> Result<(), AuthenticatorError> {
        let model = active_model(record)?;

        let Some(expected) = expected_version else {
            return match model.insert(&self.db).await {
                Ok(_) => Ok(()),
                Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                    Err(AuthenticatorError::ConcurrentModification)
                }
                Err(e) => Err(anyhow::Error::new(e).context("insert authenticator").into()),
            };
        };

        let expected = i64::try_from(expected).context("version out of range")?;
        let result = authenticators::Entity::update_many()
            .set(model)
            .filter(authenticators::Column::UserId.eq(record.user_id.0))
            .filter(authenticators::Column::Kind.eq(record.kind.as_str()))
            .filter(authenticators::Column::Version.eq(expected))
            .exec(&self.db)
            .await
            .context("update authenticator")?;
        if result.rows_affected == 0 {
            return Err(AuthenticatorError::ConcurrentModification);
        }
        Ok(())
    }

    async fn delete(
        &self,
        user_id: UserId,
        kind: AuthenticatorKind,
    ) -> Result<(), AuthenticatorError> {
        authenticators::Entity::delete_many()
            .filter(authenticators::Column::UserId.eq(user_id.0))
            .filter(authenticators::Column::Kind.eq(kind.as_str()))
            .exec(&self.db)
            .await
            .context("delete authenticator")?;
        Ok(())
    }
}

fn active_model(
    record: &AuthenticatorRecord,
) -> Result<authenticators::ActiveModel, AuthenticatorError> {
    Ok(authenticators::ActiveModel {
        id: Set(record.id.0),
        user_id: Set(record.user_id.0),
        kind: Set(record.kind.as_str().to_owned()),
        secret: Set(record.secret.as_ref().map(|s| s.as_bytes().to_vec())),
        destination: Set(record.destination.clone()),
        state: Set(record.state.as_str().to_owned()),
        failed_attempts: Set(i32::try_from(record.failed_attempts).context("failed_attempts")?),
        locked_until: Set(record.locked_until),
        last_issued_code: Set(record.last_issued_code.clone()),
        last_issued_at: Set(record.last_issued_at),
        last_used_step: Set(record
            .last_used_step
            .map(i64::try_from)
            .transpose()
            .context("last_used_step")?),
        confirmed_at: Set(record.confirmed_at),
        created_at: Set(record.created_at),
        version: Set(i64::try_from(record.version).context("version")?),
    })
}

fn record_from_model(
    model: authenticators::Model,
) -> Result<AuthenticatorRecord, AuthenticatorError> {
    Ok(AuthenticatorRecord {
        id: AuthenticatorId(model.id),
        user_id: UserId(model.user_id),
        kind: model.kind.parse().context("authenticator kind")?,
        secret: model.secret.map(SecretBytes::from_vec),
        destination: model.destination,
        state: model.state.parse().context("authenticator state")?,
        failed_attempts: u32::try_from(model.failed_attempts).context("failed_attempts")?,
        locked_until: model.locked_until,
        last_issued_code: model.last_issued_code,
        last_issued_at: model.last_issued_at,
        last_used_step: model
            .last_used_step
            .map(u64::try_from)
            .transpose()
            .context("last_used_step")?,
        confirmed_at: model.confirmed_at,
        created_at: model.created_at,
        version: u64::try_from(model.version).context("version")?,
    })
}

// ── Outbox notification sender ────────────────────────────────────────────────

/// Event kind the delivery relay picks up for SMS / email codes.
pub const CODE_ISSUED_EVENT: &str = "authenticator_code_issued";

/// Hands codes to the delivery relay by writing an outbox row.
#[derive(Clone)]
pub struct OutboxNotificationSender {
    pub db: DatabaseConnection,
}

impl NotificationSender for OutboxNotificationSender {
    async fn send(&self, delivery: &CodeDelivery) -> Result<(), AuthenticatorError> {
        let now = chrono::Utc::now();
        outbox_events::ActiveModel {
            id: Set(Uuid::now_v7()),
            kind: Set(CODE_ISSUED_EVENT.to_owned()),
            aggregate_id: Set(delivery.authenticator_id.0),
            payload: Set(json!({
                "channel": delivery.kind.as_str(),
                "destination": delivery.destination,
                "code": delivery.code,
            })),
            idempotency_key: Set(idempotency_key(delivery)),
            attempts: Set(0),
            last_error: Set(None),
            created_at: Set(now),
            next_attempt_at: Set(now),
            processed_at: Set(None),
        }
        .insert(&self.db)
        .await
        .map_err(|e| {
            AuthenticatorError::DeliveryFailed(anyhow::Error::new(e).context("enqueue code"))
        })?;
        Ok(())
    }
}

/// One event per issued code: a retried send of the same issuance collides.
fn idempotency_key(delivery: &CodeDelivery) -> String {
    format!(
        "{CODE_ISSUED_EVENT}:{}:{}",
        delivery.authenticator_id,
        delivery.issued_at.timestamp_millis()
    )
}
