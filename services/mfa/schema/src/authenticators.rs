use sea_orm::entity::prelude::*;

/// One enrolled second factor. At most one row per (user_id, kind).
/// `version` is bumped on every write and guards conditional updates.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "authenticators")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    /// "totp" | "sms" | "email"
    pub kind: String,
    /// Raw key bytes, TOTP only.
    pub secret: Option<Vec<u8>>,
    /// Phone number or email address, SMS / email only.
    pub destination: Option<String>,
    /// "unconfirmed" | "active" | "locked"
    pub state: String,
    pub failed_attempts: i32,
    pub locked_until: Option<chrono::DateTime<chrono::Utc>>,
    pub last_issued_code: Option<String>,
    pub last_issued_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_used_step: Option<i64>,
    pub confirmed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub version: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
