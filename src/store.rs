//! Single slot holding the current immutable snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::models::EnvironmentCache;

/// Owns the current snapshot. Writers swap the whole `Arc`; readers clone it
/// and keep a consistent view for as long as they hold it.
#[derive(Debug, Default)]
pub struct CacheStore {
    slot: RwLock<Arc<EnvironmentCache>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot. Never blocks on a running refresh.
    pub async fn snapshot(&self) -> Arc<EnvironmentCache> {
        Arc::clone(&*self.slot.read().await)
    }

    /// Publish a new snapshot in one assignment.
    pub(crate) async fn replace(&self, snapshot: EnvironmentCache) {
        *self.slot.write().await = Arc::new(snapshot);
    }
}

/// Source of wall-clock time for billing.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Environment;

    #[tokio::test]
    async fn test_readers_keep_their_snapshot_across_replace() {
        let store = CacheStore::new();
        let before = store.snapshot().await;
        assert!(before.environments.is_empty());

        store
            .replace(EnvironmentCache {
                environments: vec![Environment::new("aws", "us-east-1", "dev")],
                ..Default::default()
            })
            .await;

        let after = store.snapshot().await;
        assert!(before.environments.is_empty());
        assert_eq!(after.environments.len(), 1);
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::hours(1));
        assert_eq!(clock.now() - start, chrono::Duration::hours(1));
    }
}
