//! Entitlement cache trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::AppUserId;

use crate::entitlements::EntitlementSnapshot;

/// Last-known entitlement snapshot per subscriber.
#[async_trait]
pub trait EntitlementCache: Send + Sync {
    /// Returns the cached snapshot, if any.
    async fn cached(&self, app_user_id: &AppUserId) -> Option<EntitlementSnapshot>;

    /// Overwrites the cached snapshot.
    async fn store(&self, app_user_id: &AppUserId, snapshot: EntitlementSnapshot);

    /// Drops the cached snapshot.
    async fn invalidate(&self, app_user_id: &AppUserId);
}

#[derive(Debug, Default)]
struct InMemoryCacheState {
    snapshots: HashMap<AppUserId, EntitlementSnapshot>,
    writes: usize,
}

/// In-memory entitlement cache for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEntitlementCache {
    state: Arc<RwLock<InMemoryCacheState>>,
}

impl InMemoryEntitlementCache {
    /// Creates a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryCacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryCacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds the cache without counting a write.
    pub fn seed(&self, snapshot: EntitlementSnapshot) {
        self.write()
            .snapshots
            .insert(snapshot.app_user_id.clone(), snapshot);
    }

    /// Returns the cached snapshot without going through the trait.
    pub fn snapshot(&self, app_user_id: &AppUserId) -> Option<EntitlementSnapshot> {
        self.read().snapshots.get(app_user_id).cloned()
    }

    /// Returns the number of overwrites performed through the trait.
    pub fn write_count(&self) -> usize {
        self.read().writes
    }
}

#[async_trait]
impl EntitlementCache for InMemoryEntitlementCache {
    async fn cached(&self, app_user_id: &AppUserId) -> Option<EntitlementSnapshot> {
        self.snapshot(app_user_id)
    }

    async fn store(&self, app_user_id: &AppUserId, snapshot: EntitlementSnapshot) {
        let mut state = self.write();
        state.snapshots.insert(app_user_id.clone(), snapshot);
        state.writes += 1;
    }

    async fn invalidate(&self, app_user_id: &AppUserId) {
        self.write().snapshots.remove(app_user_id);
    }
}
