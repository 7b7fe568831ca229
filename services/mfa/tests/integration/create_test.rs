use chrono::Duration;
use tokio_util::sync::CancellationToken;

use warden_mfa::domain::types::{AuthenticatorKind, AuthenticatorState};
use warden_mfa::error::AuthenticatorError;
use warden_mfa::totp::{self, SECRET_LEN};
use warden_mfa::usecase::authenticator::{CreateAuthenticatorInput, VerifyInput};

use crate::helpers::{
    harness, harness_with, rfc_totp_record, sms_record, strict_policy, t0, test_user,
};

fn create(
    user_id: warden_domain::id::UserId,
    kind: AuthenticatorKind,
    destination: Option<&str>,
) -> CreateAuthenticatorInput {
    CreateAuthenticatorInput {
        user_id,
        kind,
        destination: destination.map(str::to_owned),
    }
}

#[tokio::test]
async fn should_enroll_totp_as_unconfirmed_with_fresh_secret() {
    let h = harness();
    let user = test_user();
    let cancel = CancellationToken::new();

    let record = h
        .service
        .create(create(user, AuthenticatorKind::Totp, None), &cancel)
        .await
        .unwrap();

    assert_eq!(record.state, AuthenticatorState::Unconfirmed);
    assert_eq!(record.failed_attempts, 0);
    assert!(record.destination.is_none());
    let secret = record.secret.as_ref().expect("totp record carries a secret");
    assert_eq!(secret.len(), SECRET_LEN);

    let stored = h.store.get(user, AuthenticatorKind::Totp).unwrap();
    assert_eq!(stored.id, record.id);
    assert_eq!(stored.secret, record.secret);
    assert_eq!(stored.version, 0);
}

#[tokio::test]
async fn should_issue_distinct_secrets_per_enrollment() {
    let h = harness();
    let cancel = CancellationToken::new();

    let a = h
        .service
        .create(create(test_user(), AuthenticatorKind::Totp, None), &cancel)
        .await
        .unwrap();
    let b = h
        .service
        .create(create(test_user(), AuthenticatorKind::Totp, None), &cancel)
        .await
        .unwrap();

    assert_ne!(a.secret, b.secret);
}

#[tokio::test]
async fn should_confirm_totp_enrollment_with_app_generated_code() {
    let h = harness();
    let user = test_user();
    let cancel = CancellationToken::new();

    let record = h
        .service
        .create(create(user, AuthenticatorKind::Totp, None), &cancel)
        .await
        .unwrap();

    // What the user's app derives after scanning the base-32 secret.
    let encoded = totp::encode_secret(record.secret.as_ref().unwrap());
    let scanned = totp::decode_secret(&encoded).unwrap();
    let code = totp::compute_code(&scanned, t0(), &h.service.policy().totp);

    h.service
        .verify(
            VerifyInput {
                user_id: user,
                kind: AuthenticatorKind::Totp,
                code,
            },
            &cancel,
        )
        .await
        .unwrap();

    let stored = h.store.get(user, AuthenticatorKind::Totp).unwrap();
    assert_eq!(stored.state, AuthenticatorState::Active);
    assert_eq!(stored.confirmed_at, Some(t0()));
}

#[tokio::test]
async fn should_enroll_email_without_dispatching_code() {
    let h = harness();
    let user = test_user();

    let record = h
        .service
        .create(
            create(user, AuthenticatorKind::Email, Some(" user@example.com ")),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(record.state, AuthenticatorState::Unconfirmed);
    assert!(record.secret.is_none());
    assert_eq!(record.destination.as_deref(), Some("user@example.com"));
    assert!(h.sender.deliveries().is_empty(), "create must not dispatch");
}

#[tokio::test]
async fn should_reject_totp_with_destination() {
    let h = harness();
    let user = test_user();

    let result = h
        .service
        .create(
            create(user, AuthenticatorKind::Totp, Some("user@example.com")),
            &CancellationToken::new(),
        )
        .await;

    assert!(
        matches!(result, Err(AuthenticatorError::InvalidEnrollment(_))),
        "expected InvalidEnrollment, got {result:?}"
    );
    assert!(h.store.get(user, AuthenticatorKind::Totp).is_none());
}

#[tokio::test]
async fn should_reject_totp_with_blank_destination() {
    let h = harness();
    let user = test_user();
    let cancel = CancellationToken::new();

    for destination in ["", "   "] {
        let result = h
            .service
            .create(create(user, AuthenticatorKind::Totp, Some(destination)), &cancel)
            .await;
        assert!(
            matches!(result, Err(AuthenticatorError::InvalidEnrollment(_))),
            "expected InvalidEnrollment for {destination:?}, got {result:?}"
        );
    }
    assert!(h.store.get(user, AuthenticatorKind::Totp).is_none());
}

#[tokio::test]
async fn should_reject_out_of_band_without_destination() {
    let h = harness();
    let user = test_user();
    let cancel = CancellationToken::new();

    for destination in [None, Some(""), Some("   ")] {
        let result = h
            .service
            .create(create(user, AuthenticatorKind::Sms, destination), &cancel)
            .await;
        assert!(
            matches!(result, Err(AuthenticatorError::InvalidEnrollment(_))),
            "expected InvalidEnrollment for {destination:?}, got {result:?}"
        );
    }
    assert_eq!(h.store.saves(), 0);
}

#[tokio::test]
async fn should_refuse_to_replace_confirmed_enrollment() {
    let h = harness();
    let user = test_user();
    let existing = sms_record(user, "+15550100");
    h.store.insert(existing.clone());

    let result = h
        .service
        .create(
            create(user, AuthenticatorKind::Sms, Some("+15550199")),
            &CancellationToken::new(),
        )
        .await;

    assert!(
        matches!(result, Err(AuthenticatorError::AlreadyEnrolled)),
        "expected AlreadyEnrolled, got {result:?}"
    );
    let stored = h.store.get(user, AuthenticatorKind::Sms).unwrap();
    assert_eq!(stored.id, existing.id);
    assert_eq!(stored.destination.as_deref(), Some("+15550100"));
}

#[tokio::test]
async fn should_replace_pending_enrollment() {
    let h = harness();
    let user = test_user();
    let pending = rfc_totp_record(user, false);
    h.store.insert(pending.clone());

    let record = h
        .service
        .create(create(user, AuthenticatorKind::Totp, None), &CancellationToken::new())
        .await
        .unwrap();

    assert_ne!(record.id, pending.id);
    assert_ne!(record.secret, pending.secret);
    let stored = h.store.get(user, AuthenticatorKind::Totp).unwrap();
    assert_eq!(stored.id, record.id);
    assert_eq!(stored.version, pending.version + 1);
}

#[tokio::test]
async fn should_keep_kinds_independent_per_user() {
    let h = harness();
    let user = test_user();
    let cancel = CancellationToken::new();

    h.service
        .create(create(user, AuthenticatorKind::Totp, None), &cancel)
        .await
        .unwrap();
    h.service
        .create(create(user, AuthenticatorKind::Email, Some("a@example.com")), &cancel)
        .await
        .unwrap();

    assert!(h.store.get(user, AuthenticatorKind::Totp).is_some());
    assert!(h.store.get(user, AuthenticatorKind::Email).is_some());
}

#[tokio::test]
async fn should_not_replace_pending_enrollment_while_locked() {
    let h = harness_with(strict_policy(), t0());
    let user = test_user();
    let cancel = CancellationToken::new();
    let mut pending = sms_record(user, "+15550100");
    pending.state = AuthenticatorState::Unconfirmed;
    pending.confirmed_at = None;
    h.store.insert(pending.clone());

    for _ in 0..3 {
        let _ = h
            .service
            .verify(
                VerifyInput {
                    user_id: user,
                    kind: AuthenticatorKind::Sms,
                    code: "111111".to_owned(),
                },
                &cancel,
            )
            .await;
    }
    let until = t0() + Duration::minutes(10);

    let result = h
        .service
        .create(create(user, AuthenticatorKind::Sms, Some("+15550100")), &cancel)
        .await;

    assert!(
        matches!(result, Err(AuthenticatorError::AuthenticatorLocked { until: u }) if u == until),
        "expected AuthenticatorLocked, got {result:?}"
    );
    let stored = h.store.get(user, AuthenticatorKind::Sms).unwrap();
    assert_eq!(stored.id, pending.id);
    assert_eq!(stored.state, AuthenticatorState::Locked);
    assert_eq!(stored.failed_attempts, 3);
    assert_eq!(stored.locked_until, Some(until));
}

#[tokio::test]
async fn should_replace_pending_enrollment_once_lock_lapses() {
    let h = harness_with(strict_policy(), t0());
    let user = test_user();
    let mut pending = sms_record(user, "+15550100");
    pending.state = AuthenticatorState::Locked;
    pending.confirmed_at = None;
    pending.failed_attempts = 3;
    pending.locked_until = Some(t0() + Duration::minutes(10));
    h.store.insert(pending.clone());

    h.clock.advance(Duration::minutes(10));
    let record = h
        .service
        .create(
            create(user, AuthenticatorKind::Sms, Some("+15550100")),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_ne!(record.id, pending.id);
    assert_eq!(record.state, AuthenticatorState::Unconfirmed);
    assert_eq!(record.failed_attempts, 0);
}
