use std::str::FromStr;

use crate::domain::guard::AttemptGuard;
use crate::domain::types::{
    DEFAULT_CALL_TIMEOUT_MS, DEFAULT_ISSUED_CODE_TTL_SECS, DEFAULT_LOCKOUT_SECS,
    DEFAULT_MAX_FAILURES, DEFAULT_WRITE_RETRIES,
};
use crate::totp::{MAX_WINDOW_STEPS, TotpParams};
use crate::usecase::authenticator::AuthenticatorPolicy;

/// MFA service configuration loaded from environment variables.
#[derive(Debug)]
pub struct MfaConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// TCP port to listen on (default 3114). Env var: `MFA_PORT`.
    pub mfa_port: u16,
    /// Consecutive failures before lockout. Env var: `MFA_MAX_FAILURES`.
    pub max_failures: u32,
    /// Lockout window in seconds. Env var: `MFA_LOCKOUT_SECS`.
    pub lockout_secs: i64,
    /// Out-of-band code validity in seconds. Env var: `MFA_CODE_TTL_SECS`.
    pub code_ttl_secs: i64,
    /// Version-conflict retries per write. Env var: `MFA_WRITE_RETRIES`.
    pub write_retries: u32,
    /// Per store / sender call deadline. Env var: `MFA_CALL_TIMEOUT_MS`.
    pub call_timeout_ms: u64,
    /// Env var: `TOTP_STEP_SECS`.
    pub totp_step_secs: u64,
    /// 6 to 8. Env var: `TOTP_DIGITS`.
    pub totp_digits: u32,
    /// Accepted drift in steps either side of now, at most `MAX_WINDOW_STEPS`.
    /// Env var: `TOTP_WINDOW_STEPS`.
    pub totp_window_steps: u64,
}

impl MfaConfig {
    pub fn from_env() -> Self {
        let totp = TotpParams::default();
        let config = Self {
            database_url: std::env::var("DATABASE_URL").expect("DATABASE_URL"),
            mfa_port: env_or("MFA_PORT", 3114),
            max_failures: env_or("MFA_MAX_FAILURES", DEFAULT_MAX_FAILURES),
            lockout_secs: env_or("MFA_LOCKOUT_SECS", DEFAULT_LOCKOUT_SECS),
            code_ttl_secs: env_or("MFA_CODE_TTL_SECS", DEFAULT_ISSUED_CODE_TTL_SECS),
            write_retries: env_or("MFA_WRITE_RETRIES", DEFAULT_WRITE_RETRIES),
            call_timeout_ms: env_or("MFA_CALL_TIMEOUT_MS", DEFAULT_CALL_TIMEOUT_MS),
            totp_step_secs: env_or("TOTP_STEP_SECS", totp.step_secs),
            totp_digits: env_or("TOTP_DIGITS", totp.digits),
            totp_window_steps: env_or("TOTP_WINDOW_STEPS", totp.window_steps),
        };
        config.check();
        config
    }

    /// Panics on values the service cannot run with.
    fn check(&self) {
        assert!(
            (6..=8).contains(&self.totp_digits),
            "TOTP_DIGITS must be between 6 and 8"
        );
        assert!(self.totp_step_secs > 0, "TOTP_STEP_SECS must be positive");
        assert!(
            self.totp_window_steps <= MAX_WINDOW_STEPS,
            "TOTP_WINDOW_STEPS must be at most {MAX_WINDOW_STEPS}"
        );
    }

    pub fn policy(&self) -> AuthenticatorPolicy {
        AuthenticatorPolicy {
            guard: AttemptGuard::new(
                self.max_failures,
                chrono::Duration::seconds(self.lockout_secs),
            ),
            totp: TotpParams {
                step_secs: self.totp_step_secs,
                digits: self.totp_digits,
                window_steps: self.totp_window_steps,
            },
            issued_code_ttl: chrono::Duration::seconds(self.code_ttl_secs),
            write_retries: self.write_retries,
            call_timeout: std::time::Duration::from_millis(self.call_timeout_ms),
        }
    }
}

/// Unset or unparsable values fall back to `default`.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
