//! Lockout policy over a record's attempt history.
//!
//! The guard never reads the clock and never writes: callers pass `now` and
//! apply the returned [`Transition`] to the record they persist.

use chrono::{DateTime, Duration, Utc};

use crate::domain::types::{
    AuthenticatorRecord, AuthenticatorState, DEFAULT_LOCKOUT_SECS, DEFAULT_MAX_FAILURES,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allowed,
    Locked { until: DateTime<Utc> },
}

/// Counter and state values to write back after an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub failed_attempts: u32,
    pub state: AuthenticatorState,
    pub locked_until: Option<DateTime<Utc>>,
}

impl Transition {
    pub fn apply_to(self, record: &mut AuthenticatorRecord) {
        record.failed_attempts = self.failed_attempts;
        record.state = self.state;
        record.locked_until = self.locked_until;
    }

    pub fn is_locked(&self) -> bool {
        self.state == AuthenticatorState::Locked
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptGuard {
    pub max_failures: u32,
    pub lockout_duration: Duration,
}

impl Default for AttemptGuard {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_MAX_FAILURES,
            lockout_duration: Duration::seconds(DEFAULT_LOCKOUT_SECS),
        }
    }
}

impl AttemptGuard {
    pub fn new(max_failures: u32, lockout_duration: Duration) -> Self {
        Self {
            max_failures: max_failures.max(1),
            lockout_duration,
        }
    }

    pub fn evaluate(&self, record: &AuthenticatorRecord, now: DateTime<Utc>) -> GuardDecision {
        match (record.state, record.locked_until) {
            (AuthenticatorState::Locked, Some(until)) if now < until => {
                GuardDecision::Locked { until }
            }
            _ => GuardDecision::Allowed,
        }
    }

    /// Whether `record` is stored as locked but its window has elapsed.
    pub fn lock_lapsed(&self, record: &AuthenticatorRecord, now: DateTime<Utc>) -> bool {
        record.state == AuthenticatorState::Locked
            && self.evaluate(record, now) == GuardDecision::Allowed
    }

    /// State as observed at `now`, with lazy unlock applied.
    pub fn effective_state(
        &self,
        record: &AuthenticatorRecord,
        now: DateTime<Utc>,
    ) -> AuthenticatorState {
        if self.lock_lapsed(record, now) {
            record.unlocked_state()
        } else {
            record.state
        }
    }

    /// Materialise a lapsed lock on a loaded copy before mutating it further.
    pub fn release_lapsed(&self, record: &mut AuthenticatorRecord, now: DateTime<Utc>) {
        if self.lock_lapsed(record, now) {
            Transition {
                failed_attempts: 0,
                state: record.unlocked_state(),
                locked_until: None,
            }
            .apply_to(record);
        }
    }

    pub fn on_failure(&self, record: &AuthenticatorRecord, now: DateTime<Utc>) -> Transition {
        let (failed, state) = if self.lock_lapsed(record, now) {
            (0, record.unlocked_state())
        } else {
            (record.failed_attempts, record.state)
        };

        let failed_attempts = failed.saturating_add(1);
        if failed_attempts >= self.max_failures {
            Transition {
                failed_attempts,
                state: AuthenticatorState::Locked,
                locked_until: Some(now + self.lockout_duration),
            }
        } else {
            Transition {
                failed_attempts,
                state,
                locked_until: None,
            }
        }
    }

    /// Unconditional reset; a success also confirms a pending enrollment.
    pub fn on_success(&self, _record: &AuthenticatorRecord) -> Transition {
        Transition {
            failed_attempts: 0,
            state: AuthenticatorState::Active,
            locked_until: None,
        }
    }
}
