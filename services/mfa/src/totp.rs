//! Time-based one-time passwords (RFC 4226 / RFC 6238, HMAC-SHA1 variant).
//!
//! Everything here is a pure function of its inputs: no clock reads, no shared
//! state. Callers pass the instant they want a code for.

use std::fmt;

use chrono::{DateTime, Utc};
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::TryRng;
use rand::rngs::SysRng;
use sha1::Sha1;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

/// Secret length in bytes (160 bits, the RFC 4226 recommendation).
pub const SECRET_LEN: usize = 20;

/// Largest digit count a 31-bit truncated value can fill.
pub const MAX_DIGITS: u32 = 9;

/// Largest accepted drift window, in steps either side of now.
pub const MAX_WINDOW_STEPS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum TotpError {
    #[error("insufficient entropy")]
    InsufficientEntropy,
    #[error("secret is not valid base-32")]
    InvalidEncoding,
}

/// Raw shared-secret key material. `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes([REDACTED; {}])", self.0.len())
    }
}

/// Code derivation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotpParams {
    /// Time step in seconds.
    pub step_secs: u64,
    /// Digits per code, `1..=MAX_DIGITS`.
    pub digits: u32,
    /// Accepted drift, in steps, either side of the current one.
    pub window_steps: u64,
}

impl Default for TotpParams {
    fn default() -> Self {
        Self {
            step_secs: 30,
            digits: 6,
            window_steps: 1,
        }
    }
}

/// Generate a fresh 160-bit secret from the operating system's CSPRNG.
///
/// `seed`, when given, is XOR-mixed into the random bytes. It never replaces
/// them: the output is uniformly random whatever the seed.
pub fn generate_secret(seed: Option<&[u8]>) -> Result<SecretBytes, TotpError> {
    let mut bytes = vec![0u8; SECRET_LEN];
    SysRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| TotpError::InsufficientEntropy)?;

    if let Some(seed) = seed.filter(|s| !s.is_empty()) {
        for (byte, mix) in bytes.iter_mut().zip(seed.iter().cycle()) {
            *byte ^= mix;
        }
    }
    Ok(SecretBytes(bytes))
}

/// Render a secret as unpadded upper-case base-32, the enrollment format
/// authenticator apps expect.
pub fn encode_secret(secret: &SecretBytes) -> String {
    BASE32_NOPAD.encode(secret.as_bytes())
}

/// Inverse of [`encode_secret`]. Accepts lower case and embedded spaces.
pub fn decode_secret(encoded: &str) -> Result<SecretBytes, TotpError> {
    let normalized: String = encoded
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map(SecretBytes)
        .map_err(|_| TotpError::InvalidEncoding)
}

/// Time-step counter containing `at`. Instants before the epoch map to 0.
pub fn counter_at(at: DateTime<Utc>, step_secs: u64) -> u64 {
    u64::try_from(at.timestamp()).unwrap_or(0) / step_secs.max(1)
}

/// HOTP value for an explicit counter (RFC 4226 §5.3).
pub fn hotp(secret: &SecretBytes, counter: u64, digits: u32) -> String {
    let digits = digits.clamp(1, MAX_DIGITS);
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = usize::from(digest[19] & 0x0f);
    let truncated = u32::from_be_bytes([
        digest[offset],
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]) & 0x7fff_ffff;

    let code = truncated % 10u32.pow(digits);
    format!("{code:0width$}", width = digits as usize)
}

/// TOTP value for the step containing `at`.
pub fn compute_code(secret: &SecretBytes, at: DateTime<Utc>, params: &TotpParams) -> String {
    hotp(secret, counter_at(at, params.step_secs), params.digits)
}

/// Counter of the first step in `[now - window, now + window]` whose code
/// equals `candidate`, scanning oldest first. `window` is capped at
/// [`MAX_WINDOW_STEPS`].
///
/// Every step in the window is evaluated and compared in constant time, so
/// the running time does not depend on where (or whether) a match occurs.
pub fn match_step(
    secret: &SecretBytes,
    candidate: &str,
    at: DateTime<Utc>,
    params: &TotpParams,
) -> Option<u64> {
    let candidate = normalize_candidate(candidate, params.digits)?;
    let current = counter_at(at, params.step_secs);
    let window = params.window_steps.min(MAX_WINDOW_STEPS);
    let first = current.saturating_sub(window);
    let last = current.saturating_add(window);

    let mut matched = None;
    for counter in first..=last {
        let expected = hotp(secret, counter, params.digits);
        let equal: bool = expected.as_bytes().ct_eq(candidate.as_bytes()).into();
        if equal && matched.is_none() {
            matched = Some(counter);
        }
    }
    matched
}

/// Whether `candidate` is valid at `at` within the drift window.
pub fn verify_code(
    secret: &SecretBytes,
    candidate: &str,
    at: DateTime<Utc>,
    params: &TotpParams,
) -> bool {
    match_step(secret, candidate, at, params).is_some()
}

/// Strip the separators users paste ("123 456", "123-456") and reject
/// anything that is not exactly `digits` ASCII digits.
fn normalize_candidate(candidate: &str, digits: u32) -> Option<String> {
    let cleaned: String = candidate
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect();
    let well_formed =
        cleaned.len() == digits as usize && cleaned.bytes().all(|b| b.is_ascii_digit());
    well_formed.then_some(cleaned)
}
