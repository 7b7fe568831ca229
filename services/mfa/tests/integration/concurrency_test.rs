use std::sync::Arc;

use chrono::Duration;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use warden_mfa::domain::guard::AttemptGuard;
use warden_mfa::domain::types::{AuthenticatorKind, AuthenticatorState};
use warden_mfa::error::AuthenticatorError;
use warden_mfa::usecase::authenticator::{AuthenticatorPolicy, AuthenticatorService, VerifyInput};

use crate::helpers::{
    MockNotificationSender, RFC_CODE_STEP_1, WRONG_CODE, harness_with, rfc_time,
    rfc_totp_record, test_user,
};

const MAX_FAILURES: u32 = 5;

fn policy(write_retries: u32) -> AuthenticatorPolicy {
    AuthenticatorPolicy {
        guard: AttemptGuard::new(MAX_FAILURES, Duration::minutes(15)),
        write_retries,
        ..AuthenticatorPolicy::default()
    }
}

fn wrong(user_id: warden_domain::id::UserId) -> VerifyInput {
    VerifyInput {
        user_id,
        kind: AuthenticatorKind::Totp,
        code: WRONG_CODE.to_owned(),
    }
}

fn tally(results: &[Result<(), AuthenticatorError>]) -> (usize, usize) {
    let invalid = results
        .iter()
        .filter(|r| matches!(r, Err(AuthenticatorError::InvalidCode)))
        .count();
    let locked = results
        .iter()
        .filter(|r| matches!(r, Err(AuthenticatorError::AuthenticatorLocked { .. })))
        .count();
    (invalid, locked)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_count_every_parallel_failure_exactly_once() {
    let h = harness_with(policy(3), rfc_time());
    let user = test_user();
    h.store.insert(rfc_totp_record(user, true));

    let tasks = (0..MAX_FAILURES).map(|_| {
        let service = Arc::clone(&h.service);
        tokio::spawn(async move { service.verify(wrong(user), &CancellationToken::new()).await })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let (invalid, locked) = tally(&results);
    assert_eq!(locked, 1, "exactly one caller observes the lock: {results:?}");
    assert_eq!(invalid, MAX_FAILURES as usize - 1, "{results:?}");

    let stored = h.store.get(user, AuthenticatorKind::Totp).unwrap();
    assert_eq!(stored.failed_attempts, MAX_FAILURES);
    assert_eq!(stored.state, AuthenticatorState::Locked);
    assert_eq!(stored.version, u64::from(MAX_FAILURES));
}

/// Two service instances over one store stand in for two processes: no
/// shared in-memory lock, only the store's conditional write.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_not_lose_updates_across_instances() {
    let h = harness_with(policy(MAX_FAILURES), rfc_time());
    let other = Arc::new(AuthenticatorService::new(
        h.store.clone(),
        MockNotificationSender::new(),
        h.clock.clone(),
        policy(MAX_FAILURES),
    ));
    let user = test_user();
    h.store.insert(rfc_totp_record(user, true));

    let tasks = (0..MAX_FAILURES).map(|i| {
        let first = Arc::clone(&h.service);
        let second = Arc::clone(&other);
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            if i % 2 == 0 {
                first.verify(wrong(user), &cancel).await
            } else {
                second.verify(wrong(user), &cancel).await
            }
        })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let (invalid, locked) = tally(&results);
    assert_eq!(locked, 1, "{results:?}");
    assert_eq!(invalid, MAX_FAILURES as usize - 1, "{results:?}");
    let stored = h.store.get(user, AuthenticatorKind::Totp).unwrap();
    assert_eq!(stored.failed_attempts, MAX_FAILURES);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_accept_single_use_code_once_under_contention() {
    let h = harness_with(policy(3), rfc_time());
    let user = test_user();
    h.store.insert(rfc_totp_record(user, true));

    let tasks = (0..4).map(|_| {
        let service = Arc::clone(&h.service);
        tokio::spawn(async move {
            service
                .verify(
                    VerifyInput {
                        user_id: user,
                        kind: AuthenticatorKind::Totp,
                        code: RFC_CODE_STEP_1.to_owned(),
                    },
                    &CancellationToken::new(),
                )
                .await
        })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 1, "{results:?}");
    let stored = h.store.get(user, AuthenticatorKind::Totp).unwrap();
    assert_eq!(stored.last_used_step, Some(1));
    assert_eq!(stored.failed_attempts, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_not_block_different_users() {
    let h = harness_with(policy(3), rfc_time());
    let users: Vec<_> = (0..8).map(|_| test_user()).collect();
    for user in &users {
        h.store.insert(rfc_totp_record(*user, true));
    }

    let tasks = users.iter().map(|&user| {
        let service = Arc::clone(&h.service);
        tokio::spawn(async move {
            service
                .verify(
                    VerifyInput {
                        user_id: user,
                        kind: AuthenticatorKind::Totp,
                        code: RFC_CODE_STEP_1.to_owned(),
                    },
                    &CancellationToken::new(),
                )
                .await
        })
    });
    for joined in join_all(tasks).await {
        joined.unwrap().unwrap();
    }
}
