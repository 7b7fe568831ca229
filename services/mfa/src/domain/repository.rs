#![allow(async_fn_in_trait)]

use chrono::{DateTime, Utc};

use warden_domain::id::{AuthenticatorId, UserId};

use crate::domain::types::{AuthenticatorKind, AuthenticatorRecord};
use crate::error::AuthenticatorError;

/// Persistence for authenticator records, at most one per (user, kind).
///
/// Each call must be atomic on its own: if the returned future is dropped
/// part-way, the write is either fully applied or not applied at all.
pub trait AuthenticatorStore: Send + Sync {
    async fn load(
        &self,
        user_id: UserId,
        kind: AuthenticatorKind,
    ) -> Result<Option<AuthenticatorRecord>, AuthenticatorError>;

    /// Conditional write.
    ///
    /// `expected_version = None` inserts and fails with
    /// `ConcurrentModification` if a record for (user, kind) already exists.
    /// `Some(v)` replaces the stored record for (user, kind) only while its
    /// version is still `v`, else `ConcurrentModification`.
    async fn save(
        &self,
        record: &AuthenticatorRecord,
        expected_version: Option<u64>,
    ) -> Result<(), AuthenticatorError>;

    /// Remove the record if present. Absence is not an error.
    async fn delete(&self, user_id: UserId, kind: AuthenticatorKind)
    -> Result<(), AuthenticatorError>;
}

/// An out-of-band code ready for delivery.
#[derive(Debug, Clone)]
pub struct CodeDelivery {
    pub authenticator_id: AuthenticatorId,
    pub kind: AuthenticatorKind,
    pub destination: String,
    pub code: String,
    pub issued_at: DateTime<Utc>,
}

/// Delivers out-of-band codes over SMS or email.
pub trait NotificationSender: Send + Sync {
    /// Fails with `AuthenticatorError::DeliveryFailed` when the message could
    /// not be handed off.
    async fn send(&self, delivery: &CodeDelivery) -> Result<(), AuthenticatorError>;
}

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
