use std::sync::Weak;

use tokio::sync::watch;

use super::cache::{Inner, QueryState};
use super::key::QueryKey;

/// A mounted view's hold on one key. Keeps the key eligible for re-fetch on
/// invalidation until dropped.
pub struct Subscription {
    key: QueryKey,
    rx: watch::Receiver<QueryState>,
    cache: Weak<Inner>,
}

impl Subscription {
    pub(super) fn new(key: QueryKey, rx: watch::Receiver<QueryState>, cache: Weak<Inner>) -> Self {
        Self { key, rx, cache }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn state(&self) -> QueryState {
        self.rx.borrow().clone()
    }

    /// Wait for the next state change. `None` once the cache entry is gone.
    pub async fn changed(&mut self) -> Option<QueryState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.release(&self.key);
        }
    }
}
