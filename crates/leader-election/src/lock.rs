//! Lock record and the storage seam behind it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ElectionError;

/// Contents of the lock object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderElectionRecord {
    /// Current holder, empty when released
    pub holder_identity: String,
    /// Validity of the lease without renewal
    pub lease_duration: Duration,
    /// When the current holder acquired the lease
    pub acquire_time: DateTime<Utc>,
    /// When the current holder last renewed
    pub renew_time: DateTime<Utc>,
    /// Number of holder changes
    pub leader_transitions: i32,
}

/// A record read from the store together with its version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRecord {
    /// Record contents
    pub record: LeaderElectionRecord,
    /// Opaque version used for compare-and-swap
    pub version: String,
}

/// Storage for a single named lock.
///
/// Writes are compare-and-swap: `create` and `update` return the version
/// they wrote, or `Ok(None)` when another writer got there first.
#[async_trait]
pub trait ResourceLock: Send + Sync {
    /// Reads the record, `None` when the lock object does not exist.
    async fn get(&self) -> Result<Option<VersionedRecord>, ElectionError>;

    /// Creates the lock object.
    async fn create(&self, record: &LeaderElectionRecord)
        -> Result<Option<String>, ElectionError>;

    /// Replaces the record if its version is still `version`.
    async fn update(
        &self,
        record: &LeaderElectionRecord,
        version: &str,
    ) -> Result<Option<String>, ElectionError>;

    /// Identity this lock writes as holder.
    fn identity(&self) -> &str;

    /// Human readable lock location for logs.
    fn describe(&self) -> String;
}
