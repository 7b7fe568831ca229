use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;

use crate::domain::repository::SystemClock;
use crate::infra::db::{DbAuthenticatorStore, OutboxNotificationSender};
use crate::usecase::authenticator::{AuthenticatorPolicy, AuthenticatorService};

pub type MfaService =
    AuthenticatorService<DbAuthenticatorStore, OutboxNotificationSender, SystemClock>;

/// Shared application state passed to every handler via axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub service: Arc<MfaService>,
    /// Cancelled when the server begins shutting down.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(db: DatabaseConnection, policy: AuthenticatorPolicy) -> Self {
        let service = AuthenticatorService::new(
            DbAuthenticatorStore { db: db.clone() },
            OutboxNotificationSender { db: db.clone() },
            SystemClock,
            policy,
        );
        Self {
            db,
            service: Arc::new(service),
            shutdown: CancellationToken::new(),
        }
    }
}
