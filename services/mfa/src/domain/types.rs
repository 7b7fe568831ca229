use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_domain::id::{AuthenticatorId, UserId};

use crate::totp::SecretBytes;

/// Kind of second factor. Decides whether a record holds a secret or a
/// destination address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticatorKind {
    Totp,
    Sms,
    Email,
}

impl AuthenticatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::Sms => "sms",
            Self::Email => "email",
        }
    }

    /// Codes are delivered out of band rather than derived by the user's device.
    pub fn is_out_of_band(&self) -> bool {
        matches!(self, Self::Sms | Self::Email)
    }
}

impl fmt::Display for AuthenticatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown authenticator kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for AuthenticatorKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "totp" => Ok(Self::Totp),
            "sms" => Ok(Self::Sms),
            "email" => Ok(Self::Email),
            other => Err(UnknownKind(other.to_owned())),
        }
    }
}

/// Persisted lifecycle state. `Locked` may be stale in storage; read the
/// effective state through `AttemptGuard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticatorState {
    Unconfirmed,
    Active,
    Locked,
}

impl AuthenticatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfirmed => "unconfirmed",
            Self::Active => "active",
            Self::Locked => "locked",
        }
    }
}

impl fmt::Display for AuthenticatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown authenticator state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for AuthenticatorState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unconfirmed" => Ok(Self::Unconfirmed),
            "active" => Ok(Self::Active),
            "locked" => Ok(Self::Locked),
            other => Err(UnknownState(other.to_owned())),
        }
    }
}

/// One user's enrolled second factor.
///
/// Exactly one of `secret` (TOTP) and `destination` (SMS / email) is set;
/// the constructors are the only places records are built from scratch.
#[derive(Debug, Clone)]
pub struct AuthenticatorRecord {
    pub id: AuthenticatorId,
    pub user_id: UserId,
    pub kind: AuthenticatorKind,
    pub secret: Option<SecretBytes>,
    pub destination: Option<String>,
    pub state: AuthenticatorState,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    /// Most recent out-of-band code; cleared once consumed.
    pub last_issued_code: Option<String>,
    pub last_issued_at: Option<DateTime<Utc>>,
    /// Highest TOTP step already accepted, for replay rejection.
    pub last_used_step: Option<u64>,
    /// First successful verification; `None` while enrollment is pending.
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency token, bumped on every write.
    pub version: u64,
}

impl AuthenticatorRecord {
    pub fn new_totp(user_id: UserId, secret: SecretBytes, now: DateTime<Utc>) -> Self {
        Self::pending(user_id, AuthenticatorKind::Totp, Some(secret), None, now)
    }

    /// Pending SMS or email enrollment. `kind` must be out of band.
    pub fn new_out_of_band(
        user_id: UserId,
        kind: AuthenticatorKind,
        destination: String,
        now: DateTime<Utc>,
    ) -> Self {
        debug_assert!(kind.is_out_of_band());
        Self::pending(user_id, kind, None, Some(destination), now)
    }

    fn pending(
        user_id: UserId,
        kind: AuthenticatorKind,
        secret: Option<SecretBytes>,
        destination: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuthenticatorId::generate(),
            user_id,
            kind,
            secret,
            destination,
            state: AuthenticatorState::Unconfirmed,
            failed_attempts: 0,
            locked_until: None,
            last_issued_code: None,
            last_issued_at: None,
            last_used_step: None,
            confirmed_at: None,
            created_at: now,
            version: 0,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }

    /// State a lapsed lock falls back to.
    pub fn unlocked_state(&self) -> AuthenticatorState {
        if self.is_confirmed() {
            AuthenticatorState::Active
        } else {
            AuthenticatorState::Unconfirmed
        }
    }

    /// Forget any dispatched out-of-band code.
    pub fn consume_issued_code(&mut self) {
        self.last_issued_code = None;
        self.last_issued_at = None;
    }
}

/// Default maximum consecutive failures before a record locks.
pub const DEFAULT_MAX_FAILURES: u32 = 5;

/// Default lockout window in seconds (15 minutes).
pub const DEFAULT_LOCKOUT_SECS: i64 = 900;

/// Default validity of a dispatched out-of-band code in seconds.
pub const DEFAULT_ISSUED_CODE_TTL_SECS: i64 = 300;

/// Default bound on optimistic-concurrency retries per write path.
pub const DEFAULT_WRITE_RETRIES: u32 = 3;

/// Default deadline for a single store or sender call in milliseconds.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 5_000;
