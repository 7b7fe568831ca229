use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use rand::RngExt;
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use warden_domain::id::{AuthenticatorId, UserId};

use crate::domain::guard::{AttemptGuard, GuardDecision};
use crate::domain::repository::{AuthenticatorStore, Clock, CodeDelivery, NotificationSender};
use crate::domain::types::{
    AuthenticatorKind, AuthenticatorRecord, AuthenticatorState, DEFAULT_CALL_TIMEOUT_MS,
    DEFAULT_ISSUED_CODE_TTL_SECS, DEFAULT_WRITE_RETRIES,
};
use crate::error::AuthenticatorError;
use crate::totp::{self, MAX_DIGITS, TotpParams};
use crate::usecase::locks::{RecordGuard, RecordLocks};

/// Tunables for [`AuthenticatorService`].
#[derive(Debug, Clone)]
pub struct AuthenticatorPolicy {
    pub guard: AttemptGuard,
    pub totp: TotpParams,
    /// How long a dispatched out-of-band code stays valid.
    pub issued_code_ttl: Duration,
    /// Optimistic-concurrency retries before `ConcurrentModification`.
    pub write_retries: u32,
    /// Deadline for each store or sender call.
    pub call_timeout: std::time::Duration,
}

impl Default for AuthenticatorPolicy {
    fn default() -> Self {
        Self {
            guard: AttemptGuard::default(),
            totp: TotpParams::default(),
            issued_code_ttl: Duration::seconds(DEFAULT_ISSUED_CODE_TTL_SECS),
            write_retries: DEFAULT_WRITE_RETRIES,
            call_timeout: std::time::Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
        }
    }
}

pub struct CreateAuthenticatorInput {
    pub user_id: UserId,
    pub kind: AuthenticatorKind,
    pub destination: Option<String>,
}

pub struct AttemptInput {
    pub user_id: UserId,
    pub kind: AuthenticatorKind,
    /// Must match the enrolled destination once confirmed; re-targets a
    /// pending enrollment otherwise.
    pub destination: Option<String>,
}

pub struct VerifyInput {
    pub user_id: UserId,
    pub kind: AuthenticatorKind,
    pub code: String,
}

/// Read-only view of a record with lazy unlock applied. Never carries the
/// secret or an issued code.
#[derive(Debug, Clone)]
pub struct AuthenticatorSummary {
    pub id: AuthenticatorId,
    pub kind: AuthenticatorKind,
    pub state: AuthenticatorState,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub destination: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// What one pass over the current record decided.
struct Decision<T> {
    /// Record to persist; `None` leaves the store untouched.
    write: Option<AuthenticatorRecord>,
    outcome: Result<T, AuthenticatorError>,
}

impl<T> Decision<T> {
    fn reject(err: AuthenticatorError) -> Self {
        Self {
            write: None,
            outcome: Err(err),
        }
    }

    fn write(record: AuthenticatorRecord, value: T) -> Self {
        Self {
            write: Some(record),
            outcome: Ok(value),
        }
    }
}

enum Verdict {
    Accepted { confirmed_now: bool },
    Rejected { locked_until: Option<DateTime<Utc>> },
}

enum CodeCheck {
    /// `step` is the accepted TOTP counter; `None` for out-of-band codes.
    Accepted { step: Option<u64> },
    Rejected,
}

/// Enrollment, verification, out-of-band dispatch and removal of second
/// factors.
///
/// Every operation holds the per-record lock across load, evaluate and
/// persist, and writes conditionally on the version it loaded, so parallel
/// callers (in this process or another) never apply stale counters.
pub struct AuthenticatorService<S, N, C>
where
    S: AuthenticatorStore,
    N: NotificationSender,
    C: Clock,
{
    store: S,
    sender: N,
    clock: C,
    policy: AuthenticatorPolicy,
    locks: RecordLocks,
}

impl<S, N, C> AuthenticatorService<S, N, C>
where
    S: AuthenticatorStore,
    N: NotificationSender,
    C: Clock,
{
    pub fn new(store: S, sender: N, clock: C, policy: AuthenticatorPolicy) -> Self {
        Self {
            store,
            sender,
            clock,
            policy,
            locks: RecordLocks::new(),
        }
    }

    pub fn policy(&self) -> &AuthenticatorPolicy {
        &self.policy
    }

    /// Enroll a new factor in `Unconfirmed` state.
    ///
    /// A pending enrollment for the same (user, kind) is replaced unless it
    /// is inside its lockout window; one that was ever confirmed must be
    /// deleted first.
    pub async fn create(
        &self,
        input: CreateAuthenticatorInput,
        cancel: &CancellationToken,
    ) -> Result<AuthenticatorRecord, AuthenticatorError> {
        let CreateAuthenticatorInput {
            user_id,
            kind,
            destination,
        } = input;

        let destination = enrollment_destination(kind, destination)?;
        let secret = match kind {
            AuthenticatorKind::Totp => Some(totp::generate_secret(None)?),
            AuthenticatorKind::Sms | AuthenticatorKind::Email => None,
        };

        let guard = self.policy.guard;

        let _slot = self.lock(user_id, kind, cancel).await?;
        let ((), written) = self
            .commit(user_id, kind, cancel, |current, now| {
                if let Some(current) = &current {
                    if current.is_confirmed() {
                        return Decision::reject(AuthenticatorError::AlreadyEnrolled);
                    }
                    if let GuardDecision::Locked { until } = guard.evaluate(current, now) {
                        return Decision::reject(AuthenticatorError::AuthenticatorLocked { until });
                    }
                }
                let record = match (&secret, &destination) {
                    (Some(secret), _) => AuthenticatorRecord::new_totp(user_id, secret.clone(), now),
                    (None, Some(destination)) => AuthenticatorRecord::new_out_of_band(
                        user_id,
                        kind,
                        destination.clone(),
                        now,
                    ),
                    (None, None) => {
                        return Decision::reject(AuthenticatorError::InvalidEnrollment(
                            "destination required".to_owned(),
                        ));
                    }
                };
                Decision::write(record, ())
            })
            .await?;

        let record = written.ok_or_else(|| anyhow::anyhow!("create committed without a record"))?;
        info!(user_id = %user_id, kind = %kind, authenticator_id = %record.id, "authenticator enrolled");
        Ok(record)
    }

    /// Issue a fresh out-of-band code and dispatch it. Supersedes any code
    /// issued earlier for the record.
    pub async fn attempt(
        &self,
        input: AttemptInput,
        cancel: &CancellationToken,
    ) -> Result<(), AuthenticatorError> {
        let AttemptInput {
            user_id,
            kind,
            destination,
        } = input;

        if !kind.is_out_of_band() {
            return Err(AuthenticatorError::UnsupportedOperation);
        }
        let destination = destination
            .map(|d| validate_destination(kind, &d))
            .transpose()?;
        let code = generate_numeric_code(self.policy.totp.digits);
        let guard = self.policy.guard;

        let _slot = self.lock(user_id, kind, cancel).await?;
        let ((), written) = self
            .commit(user_id, kind, cancel, |current, now| {
                let Some(mut record) = current else {
                    return Decision::reject(AuthenticatorError::NotEnrolled);
                };
                if let GuardDecision::Locked { until } = guard.evaluate(&record, now) {
                    return Decision::reject(AuthenticatorError::AuthenticatorLocked { until });
                }
                guard.release_lapsed(&mut record, now);

                if let Some(requested) = &destination {
                    if record.destination.as_deref() != Some(requested.as_str()) {
                        if record.is_confirmed() {
                            return Decision::reject(AuthenticatorError::InvalidEnrollment(
                                "destination does not match enrollment".to_owned(),
                            ));
                        }
                        record.destination = Some(requested.clone());
                    }
                }

                record.last_issued_code = Some(code.clone());
                record.last_issued_at = Some(now);
                Decision::write(record, ())
            })
            .await?;

        let record = written.ok_or_else(|| anyhow::anyhow!("attempt committed without a record"))?;
        let (Some(destination), Some(issued_at)) = (record.destination.clone(), record.last_issued_at)
        else {
            return Err(anyhow::anyhow!("out-of-band record without destination").into());
        };
        let delivery = CodeDelivery {
            authenticator_id: record.id,
            kind,
            destination,
            code,
            issued_at,
        };

        self.bounded(cancel, self.sender.send(&delivery))
            .await
            .map_err(|e| match e {
                AuthenticatorError::DeliveryFailed(_)
                | AuthenticatorError::Cancelled
                | AuthenticatorError::Timeout => e,
                other => AuthenticatorError::DeliveryFailed(other.into()),
            })?;

        info!(user_id = %user_id, kind = %kind, authenticator_id = %record.id, "code dispatched");
        Ok(())
    }

    /// Check `code` against the record, updating counters either way.
    ///
    /// A locked record rejects every code with `AuthenticatorLocked` without
    /// looking at it.
    pub async fn verify(
        &self,
        input: VerifyInput,
        cancel: &CancellationToken,
    ) -> Result<(), AuthenticatorError> {
        let VerifyInput {
            user_id,
            kind,
            code,
        } = input;
        let guard = self.policy.guard;

        let _slot = self.lock(user_id, kind, cancel).await?;
        let (verdict, _) = self
            .commit(user_id, kind, cancel, |current, now| {
                let Some(mut record) = current else {
                    return Decision::reject(AuthenticatorError::NotEnrolled);
                };
                if let GuardDecision::Locked { until } = guard.evaluate(&record, now) {
                    return Decision::reject(AuthenticatorError::AuthenticatorLocked { until });
                }

                match self.check_code(&record, &code, now) {
                    Ok(CodeCheck::Accepted { step }) => {
                        let confirmed_now = !record.is_confirmed();
                        guard.on_success(&record).apply_to(&mut record);
                        if confirmed_now {
                            record.confirmed_at = Some(now);
                        }
                        if step.is_some() {
                            record.last_used_step = step;
                        }
                        record.consume_issued_code();
                        Decision::write(record, Verdict::Accepted { confirmed_now })
                    }
                    Ok(CodeCheck::Rejected) => {
                        let transition = guard.on_failure(&record, now);
                        transition.apply_to(&mut record);
                        Decision::write(
                            record,
                            Verdict::Rejected {
                                locked_until: transition.locked_until,
                            },
                        )
                    }
                    Err(e) => Decision::reject(e),
                }
            })
            .await?;

        match verdict {
            Verdict::Accepted { confirmed_now } => {
                if confirmed_now {
                    info!(user_id = %user_id, kind = %kind, "enrollment confirmed");
                }
                Ok(())
            }
            Verdict::Rejected {
                locked_until: Some(until),
            } => {
                warn!(user_id = %user_id, kind = %kind, locked_until = %until, "authenticator locked");
                Err(AuthenticatorError::AuthenticatorLocked { until })
            }
            Verdict::Rejected { locked_until: None } => Err(AuthenticatorError::InvalidCode),
        }
    }

    /// Remove the record. Idempotent.
    pub async fn delete(
        &self,
        user_id: UserId,
        kind: AuthenticatorKind,
        cancel: &CancellationToken,
    ) -> Result<(), AuthenticatorError> {
        let _slot = self.lock(user_id, kind, cancel).await?;
        self.bounded(cancel, self.store.delete(user_id, kind)).await?;
        info!(user_id = %user_id, kind = %kind, "authenticator deleted");
        Ok(())
    }

    /// Current view of the record, with a lapsed lock reported as unlocked.
    pub async fn describe(
        &self,
        user_id: UserId,
        kind: AuthenticatorKind,
        cancel: &CancellationToken,
    ) -> Result<AuthenticatorSummary, AuthenticatorError> {
        let record = self
            .bounded(cancel, self.store.load(user_id, kind))
            .await?
            .ok_or(AuthenticatorError::NotEnrolled)?;
        let now = self.clock.now();
        let guard = &self.policy.guard;
        let lapsed = guard.lock_lapsed(&record, now);

        Ok(AuthenticatorSummary {
            id: record.id,
            kind: record.kind,
            state: guard.effective_state(&record, now),
            failed_attempts: if lapsed { 0 } else { record.failed_attempts },
            locked_until: if lapsed { None } else { record.locked_until },
            destination: record.destination,
            confirmed_at: record.confirmed_at,
            created_at: record.created_at,
        })
    }

    fn check_code(
        &self,
        record: &AuthenticatorRecord,
        candidate: &str,
        now: DateTime<Utc>,
    ) -> Result<CodeCheck, AuthenticatorError> {
        if record.kind == AuthenticatorKind::Totp {
            let secret = record
                .secret
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("totp authenticator {} has no secret", record.id))?;
            let check = match totp::match_step(secret, candidate, now, &self.policy.totp) {
                Some(step) if record.last_used_step.is_some_and(|used| step <= used) => {
                    CodeCheck::Rejected
                }
                Some(step) => CodeCheck::Accepted { step: Some(step) },
                None => CodeCheck::Rejected,
            };
            return Ok(check);
        }

        let (Some(issued), Some(issued_at)) = (&record.last_issued_code, record.last_issued_at)
        else {
            return Ok(CodeCheck::Rejected);
        };
        let fresh = now < issued_at + self.policy.issued_code_ttl;
        let equal: bool = issued.as_bytes().ct_eq(candidate.trim().as_bytes()).into();
        Ok(if fresh && equal {
            CodeCheck::Accepted { step: None }
        } else {
            CodeCheck::Rejected
        })
    }

    async fn lock(
        &self,
        user_id: UserId,
        kind: AuthenticatorKind,
        cancel: &CancellationToken,
    ) -> Result<RecordGuard, AuthenticatorError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AuthenticatorError::Cancelled),
            slot = self.locks.acquire(user_id, kind) => Ok(slot),
        }
    }

    /// Race `fut` against the caller's cancellation and the per-call deadline.
    async fn bounded<T>(
        &self,
        cancel: &CancellationToken,
        fut: impl Future<Output = Result<T, AuthenticatorError>>,
    ) -> Result<T, AuthenticatorError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AuthenticatorError::Cancelled),
            res = tokio::time::timeout(self.policy.call_timeout, fut) => {
                res.unwrap_or(Err(AuthenticatorError::Timeout))
            }
        }
    }

    /// Load, decide, and conditionally persist, retrying the whole pass on a
    /// version conflict. Callers hold the record lock.
    ///
    /// Returns the decided value and the record written, if any.
    async fn commit<T, F>(
        &self,
        user_id: UserId,
        kind: AuthenticatorKind,
        cancel: &CancellationToken,
        mut decide: F,
    ) -> Result<(T, Option<AuthenticatorRecord>), AuthenticatorError>
    where
        F: FnMut(Option<AuthenticatorRecord>, DateTime<Utc>) -> Decision<T>,
    {
        for attempt in 0..=self.policy.write_retries {
            let current = self.bounded(cancel, self.store.load(user_id, kind)).await?;
            let expected = current.as_ref().map(|r| r.version);

            let Decision { write, outcome } = decide(current, self.clock.now());
            let Some(mut record) = write else {
                return outcome.map(|value| (value, None));
            };
            record.version = expected.map_or(0, |v| v + 1);

            match self.bounded(cancel, self.store.save(&record, expected)).await {
                Ok(()) => return outcome.map(|value| (value, Some(record))),
                Err(AuthenticatorError::ConcurrentModification) => {
                    warn!(user_id = %user_id, kind = %kind, attempt, "version conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(AuthenticatorError::ConcurrentModification)
    }
}

/// Validate `Create` input: TOTP takes no destination, SMS and email need one.
fn enrollment_destination(
    kind: AuthenticatorKind,
    destination: Option<String>,
) -> Result<Option<String>, AuthenticatorError> {
    match (kind, destination) {
        (AuthenticatorKind::Totp, None) => Ok(None),
        (AuthenticatorKind::Totp, Some(_)) => Err(AuthenticatorError::InvalidEnrollment(
            "totp takes no destination".to_owned(),
        )),
        (_, None) => Err(AuthenticatorError::InvalidEnrollment(
            "destination required".to_owned(),
        )),
        (kind, Some(d)) => validate_destination(kind, &d).map(Some),
    }
}

/// Trim and sanity-check a phone number or email address.
fn validate_destination(kind: AuthenticatorKind, raw: &str) -> Result<String, AuthenticatorError> {
    let destination = raw.trim();
    let valid = match kind {
        AuthenticatorKind::Email => {
            let mut parts = destination.split('@');
            matches!(
                (parts.next(), parts.next(), parts.next()),
                (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty()
            ) && !destination.chars().any(char::is_whitespace)
        }
        AuthenticatorKind::Sms => {
            let digits = destination.strip_prefix('+').unwrap_or(destination);
            (7..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())
        }
        AuthenticatorKind::Totp => false,
    };
    if valid {
        Ok(destination.to_owned())
    } else {
        Err(AuthenticatorError::InvalidEnrollment(format!(
            "malformed {kind} destination"
        )))
    }
}

/// Uniform random decimal code from the thread-local CSPRNG.
fn generate_numeric_code(digits: u32) -> String {
    let digits = digits.clamp(1, MAX_DIGITS);
    let mut rng = rand::rng();
    let code = rng.random_range(0..10u32.pow(digits));
    format!("{code:0width$}", width = digits as usize)
}
