//! In-memory lock store for unit testing
//!
//! Several [`MemoryLock`]s sharing one [`MemoryLockStore`] behave like
//! replicas contending for the same lease. Each lock can be cut off from
//! the store to simulate a partition.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::ElectionError;
use crate::lock::{LeaderElectionRecord, ResourceLock, VersionedRecord};

/// Shared backing state for [`MemoryLock`]s.
#[derive(Debug, Clone, Default)]
pub struct MemoryLockStore {
    state: Arc<Mutex<Option<(LeaderElectionRecord, u64)>>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryLockStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle on the store writing as `identity`
    pub fn lock(&self, identity: &str) -> MemoryLock {
        MemoryLock {
            store: self.clone(),
            identity: identity.to_string(),
            unreachable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current record, if the lock object exists
    pub fn record(&self) -> Option<LeaderElectionRecord> {
        self.state.lock().unwrap().as_ref().map(|(r, _)| r.clone())
    }

    /// Current holder identity, if the lock object exists
    pub fn holder(&self) -> Option<String> {
        self.record().map(|r| r.holder_identity)
    }

    /// Number of successful writes
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

/// A [`ResourceLock`] over a [`MemoryLockStore`].
#[derive(Debug, Clone)]
pub struct MemoryLock {
    store: MemoryLockStore,
    identity: String,
    unreachable: Arc<AtomicBool>,
}

impl MemoryLock {
    /// Make every subsequent call from this handle fail (or succeed again)
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<(), ElectionError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ElectionError::LockUnavailable(format!(
                "{} cannot reach the lock store",
                self.identity
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceLock for MemoryLock {
    async fn get(&self) -> Result<Option<VersionedRecord>, ElectionError> {
        self.check_reachable()?;
        Ok(self
            .store
            .state
            .lock()
            .unwrap()
            .as_ref()
            .map(|(record, version)| VersionedRecord {
                record: record.clone(),
                version: version.to_string(),
            }))
    }

    async fn create(
        &self,
        record: &LeaderElectionRecord,
    ) -> Result<Option<String>, ElectionError> {
        self.check_reachable()?;
        let mut state = self.store.state.lock().unwrap();
        if state.is_some() {
            return Ok(None);
        }
        *state = Some((record.clone(), 1));
        self.store.writes.fetch_add(1, Ordering::SeqCst);
        Ok(Some(1.to_string()))
    }

    async fn update(
        &self,
        record: &LeaderElectionRecord,
        version: &str,
    ) -> Result<Option<String>, ElectionError> {
        self.check_reachable()?;
        let mut state = self.store.state.lock().unwrap();
        let next = match state.as_ref() {
            Some((_, current)) if current.to_string() == version => current + 1,
            _ => return Ok(None),
        };
        *state = Some((record.clone(), next));
        self.store.writes.fetch_add(1, Ordering::SeqCst);
        Ok(Some(next.to_string()))
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    fn describe(&self) -> String {
        "memory/vc-controllers".to_string()
    }
}
