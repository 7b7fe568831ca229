use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use warden_domain::id::UserId;

use crate::domain::types::AuthenticatorKind;

type RecordKey = (UserId, AuthenticatorKind);

/// Per-(user, kind) async mutexes. Operations on different keys never
/// contend; a key's slot is evicted once nobody holds or awaits it.
#[derive(Clone, Default)]
pub struct RecordLocks {
    slots: Arc<DashMap<RecordKey, Arc<Mutex<()>>>>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to the record for `(user_id, kind)`.
    pub async fn acquire(&self, user_id: UserId, kind: AuthenticatorKind) -> RecordGuard {
        let key = (user_id, kind);
        // Clone out of the map before awaiting so no shard lock is held.
        let slot = Arc::clone(self.slots.entry(key).or_default().value());
        let held = slot.lock_owned().await;
        RecordGuard {
            key,
            slots: Arc::clone(&self.slots),
            held: Some(held),
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.slots.len()
    }
}

pub struct RecordGuard {
    key: RecordKey,
    slots: Arc<DashMap<RecordKey, Arc<Mutex<()>>>>,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        drop(self.held.take());
        // Only the map's own reference left: no holder, no waiter.
        self.slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}
